//! Statistics kernel shared by the risk engines.
//!
//! Conventions used throughout:
//! - variance and covariance use the plug-in (1/N) divisor;
//! - skewness and kurtosis are the third and fourth standardized moments
//!   (kurtosis is raw, not excess: a normal sample converges to 3.0);
//! - percentiles interpolate linearly between order statistics.

use crate::domain::errors::RiskError;
use statrs::distribution::{ContinuousCDF, Normal};

/// Simple returns from a price series. Non-positive reference prices are
/// skipped rather than producing infinities.
pub fn returns(prices: &[f64]) -> Vec<f64> {
    let mut out = Vec::with_capacity(prices.len().saturating_sub(1));
    for window in prices.windows(2) {
        let (prev, curr) = (window[0], window[1]);
        if prev > 0.0 && prev.is_finite() && curr.is_finite() {
            out.push((curr - prev) / prev);
        }
    }
    out
}

pub fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        return 0.0;
    }
    xs.iter().sum::<f64>() / xs.len() as f64
}

/// Plug-in (1/N) variance.
pub fn variance(xs: &[f64]) -> f64 {
    if xs.len() < 2 {
        return 0.0;
    }
    let m = mean(xs);
    xs.iter().map(|x| (x - m) * (x - m)).sum::<f64>() / xs.len() as f64
}

pub fn std_dev(xs: &[f64]) -> f64 {
    variance(xs).sqrt()
}

/// Third standardized moment. Zero-variance samples return 0.
pub fn skewness(xs: &[f64]) -> f64 {
    if xs.len() < 3 {
        return 0.0;
    }
    let m = mean(xs);
    let sd = std_dev(xs);
    if sd <= f64::EPSILON {
        return 0.0;
    }
    let n = xs.len() as f64;
    xs.iter().map(|x| ((x - m) / sd).powi(3)).sum::<f64>() / n
}

/// Fourth standardized moment, raw (normal ≈ 3.0). Zero-variance samples
/// return 3.0 so downstream excess-kurtosis adjustments vanish.
pub fn kurtosis(xs: &[f64]) -> f64 {
    if xs.len() < 4 {
        return 3.0;
    }
    let m = mean(xs);
    let sd = std_dev(xs);
    if sd <= f64::EPSILON {
        return 3.0;
    }
    let n = xs.len() as f64;
    xs.iter().map(|x| ((x - m) / sd).powi(4)).sum::<f64>() / n
}

/// Linear-interpolation percentile, `p` in [0, 1].
pub fn percentile(xs: &[f64], p: f64) -> Result<f64, RiskError> {
    if xs.is_empty() {
        return Err(RiskError::invalid_input("percentile of empty sample"));
    }
    if !(0.0..=1.0).contains(&p) {
        return Err(RiskError::invalid_input(format!(
            "percentile rank {p} outside [0, 1]"
        )));
    }
    let mut sorted = xs.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));

    let rank = p * (sorted.len() - 1) as f64;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        return Ok(sorted[lo]);
    }
    let frac = rank - lo as f64;
    Ok(sorted[lo] * (1.0 - frac) + sorted[hi] * frac)
}

/// Pearson correlation over the overlapping prefix of the two series.
/// Degenerate (constant) inputs return 0.
pub fn correlation(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let mx = mean(xs);
    let my = mean(ys);

    let mut num = 0.0;
    let mut dx = 0.0;
    let mut dy = 0.0;
    for i in 0..n {
        let a = xs[i] - mx;
        let b = ys[i] - my;
        num += a * b;
        dx += a * a;
        dy += b * b;
    }
    if dx <= f64::EPSILON || dy <= f64::EPSILON {
        return 0.0;
    }
    num / (dx.sqrt() * dy.sqrt())
}

/// Relative Strength Index with Wilder's smoothing.
///
/// Needs `period + 1` prices; anything less returns the neutral 50.0.
pub fn rsi(prices: &[f64], period: usize) -> f64 {
    if period == 0 || prices.len() < period + 1 {
        return 50.0;
    }

    let mut avg_gain = 0.0;
    let mut avg_loss = 0.0;
    for window in prices[..period + 1].windows(2) {
        let change = window[1] - window[0];
        if change > 0.0 {
            avg_gain += change;
        } else {
            avg_loss += -change;
        }
    }
    avg_gain /= period as f64;
    avg_loss /= period as f64;

    for window in prices[period..].windows(2) {
        let change = window[1] - window[0];
        let (gain, loss) = if change > 0.0 {
            (change, 0.0)
        } else {
            (0.0, -change)
        };
        avg_gain = (avg_gain * (period as f64 - 1.0) + gain) / period as f64;
        avg_loss = (avg_loss * (period as f64 - 1.0) + loss) / period as f64;
    }

    if avg_loss <= f64::EPSILON {
        return 100.0;
    }
    let rs = avg_gain / avg_loss;
    100.0 - 100.0 / (1.0 + rs)
}

/// Exponentially weighted moving average with decay `lambda` in (0, 1):
/// `ewma_t = lambda * ewma_{t-1} + (1 - lambda) * x_t`, seeded on the first
/// observation. Returns the final smoothed value.
pub fn ewma(xs: &[f64], lambda: f64) -> f64 {
    let mut iter = xs.iter();
    let Some(&first) = iter.next() else {
        return 0.0;
    };
    let mut smoothed = first;
    for &x in iter {
        smoothed = lambda * smoothed + (1.0 - lambda) * x;
    }
    smoothed
}

/// RiskMetrics-style EWMA volatility of a return series:
/// `sigma2_t = lambda * sigma2_{t-1} + (1 - lambda) * r_t^2`.
pub fn ewma_volatility(returns: &[f64], lambda: f64) -> f64 {
    let mut iter = returns.iter();
    let Some(&first) = iter.next() else {
        return 0.0;
    };
    let mut var = first * first;
    for &r in iter {
        var = lambda * var + (1.0 - lambda) * r * r;
    }
    var.sqrt()
}

/// Running-peak maximum drawdown of a value path, as a positive fraction.
pub fn max_drawdown(values: &[f64]) -> f64 {
    let mut peak = f64::MIN;
    let mut max_dd = 0.0;
    for &v in values {
        if v > peak {
            peak = v;
        } else if peak > 0.0 {
            let dd = (peak - v) / peak;
            if dd > max_dd {
                max_dd = dd;
            }
        }
    }
    max_dd
}

/// Pairwise plug-in covariance matrix, rows/columns aligned to the order of
/// `series`. Each pair is computed over its overlapping prefix.
pub fn covariance_matrix(series: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = series.len();
    let mut matrix = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in i..n {
            let cov = covariance(&series[i], &series[j]);
            matrix[i][j] = cov;
            matrix[j][i] = cov;
        }
    }
    matrix
}

fn covariance(xs: &[f64], ys: &[f64]) -> f64 {
    let n = xs.len().min(ys.len());
    if n < 2 {
        return 0.0;
    }
    let xs = &xs[..n];
    let ys = &ys[..n];
    let mx = mean(xs);
    let my = mean(ys);
    xs.iter()
        .zip(ys)
        .map(|(x, y)| (x - mx) * (y - my))
        .sum::<f64>()
        / n as f64
}

/// Lower-triangular Cholesky factor of a symmetric PSD matrix.
///
/// Fails when a diagonal entry drops to zero or below during the reduction;
/// the caller is expected to regularize (add `eps * I`) and retry.
pub fn cholesky(matrix: &[Vec<f64>]) -> Result<Vec<Vec<f64>>, RiskError> {
    let n = matrix.len();
    if n == 0 || matrix.iter().any(|row| row.len() != n) {
        return Err(RiskError::invalid_input("cholesky requires a square matrix"));
    }

    let mut lower = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let mut sum = matrix[i][j];
            for k in 0..j {
                sum -= lower[i][k] * lower[j][k];
            }
            if i == j {
                if sum <= 0.0 {
                    return Err(RiskError::numeric(
                        "cholesky",
                        format!("matrix not positive definite (pivot {i} = {sum:.3e})"),
                    ));
                }
                lower[i][j] = sum.sqrt();
            } else {
                lower[i][j] = sum / lower[j][j];
            }
        }
    }
    Ok(lower)
}

/// Add `eps` to the diagonal. Used to regularize a near-singular covariance
/// matrix before retrying `cholesky`.
pub fn regularize(matrix: &[Vec<f64>], eps: f64) -> Vec<Vec<f64>> {
    let mut out = matrix.to_vec();
    for (i, row) in out.iter_mut().enumerate() {
        if i < row.len() {
            row[i] += eps;
        }
    }
    out
}

/// Standard normal quantile.
pub fn normal_inverse_cdf(p: f64) -> Result<f64, RiskError> {
    if !(p > 0.0 && p < 1.0) {
        return Err(RiskError::invalid_input(format!(
            "normal quantile requires p in (0, 1), got {p}"
        )));
    }
    Ok(standard_normal().inverse_cdf(p))
}

/// Standard normal CDF.
pub fn normal_cdf(x: f64) -> f64 {
    standard_normal().cdf(x)
}

/// Standard normal density.
pub fn normal_pdf(x: f64) -> f64 {
    (-0.5 * x * x).exp() / (2.0 * std::f64::consts::PI).sqrt()
}

fn standard_normal() -> Normal {
    // Constant parameters; construction cannot fail.
    Normal::new(0.0, 1.0).unwrap()
}

/// Third-order Cornish–Fisher expansion of a normal quantile:
/// `z' = z + (S/6)(z^2 - 1) + ((K - 3)/24) z (z^2 - 3) + (S^2/72) z (2 z^2 - 5)`.
pub fn cornish_fisher_z(z: f64, skew: f64, kurt: f64) -> f64 {
    z + (skew / 6.0) * (z * z - 1.0)
        + ((kurt - 3.0) / 24.0) * z * (z * z - 3.0)
        + (skew * skew / 72.0) * z * (2.0 * z * z - 5.0)
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOL: f64 = 1e-9;

    #[test]
    fn test_returns_skip_bad_reference() {
        let prices = vec![100.0, 110.0, 0.0, 50.0, 55.0];
        let rets = returns(&prices);
        // 0.0 is skipped both as a numerator base and the transition into it
        // still uses the valid 110.0 reference.
        assert_eq!(rets.len(), 3);
        assert!((rets[0] - 0.10).abs() < TOL);
        assert!((rets[2] - 0.10).abs() < TOL);
    }

    #[test]
    fn test_variance_plug_in_divisor() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        // mean 2.5, sum of squared deviations 5.0, divisor N = 4
        assert!((variance(&xs) - 1.25).abs() < TOL);
    }

    #[test]
    fn test_skewness_symmetric_is_zero() {
        let xs = vec![-2.0, -1.0, 0.0, 1.0, 2.0];
        assert!(skewness(&xs).abs() < TOL);
    }

    #[test]
    fn test_kurtosis_of_flat_sample_is_normal() {
        assert!((kurtosis(&[1.0, 1.0, 1.0, 1.0]) - 3.0).abs() < TOL);
    }

    #[test]
    fn test_percentile_interpolates() {
        let xs = vec![10.0, 20.0, 30.0, 40.0];
        assert!((percentile(&xs, 0.5).unwrap() - 25.0).abs() < TOL);
        assert!((percentile(&xs, 0.0).unwrap() - 10.0).abs() < TOL);
        assert!((percentile(&xs, 1.0).unwrap() - 40.0).abs() < TOL);
        assert!(percentile(&[], 0.5).is_err());
        assert!(percentile(&xs, 1.5).is_err());
    }

    #[test]
    fn test_rsi_insufficient_data_is_neutral() {
        assert!((rsi(&[100.0, 101.0], 14) - 50.0).abs() < TOL);
    }

    #[test]
    fn test_rsi_all_gains_saturates() {
        let prices: Vec<f64> = (0..20).map(|i| 100.0 + i as f64).collect();
        assert!((rsi(&prices, 14) - 100.0).abs() < TOL);
    }

    #[test]
    fn test_rsi_alternating_is_balanced() {
        // Equal-magnitude gains and losses: RSI near 50.
        let mut prices = vec![100.0];
        for i in 0..30 {
            let last = *prices.last().unwrap();
            prices.push(if i % 2 == 0 { last + 1.0 } else { last - 1.0 });
        }
        let value = rsi(&prices, 14);
        assert!((40.0..=60.0).contains(&value), "rsi = {value}");
    }

    #[test]
    fn test_correlation_perfect() {
        let xs = vec![1.0, 2.0, 3.0, 4.0];
        let ys = vec![2.0, 4.0, 6.0, 8.0];
        assert!((correlation(&xs, &ys) - 1.0).abs() < 1e-6);
        let zs = vec![8.0, 6.0, 4.0, 2.0];
        assert!((correlation(&xs, &zs) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_max_drawdown() {
        let path = vec![100.0, 120.0, 90.0, 110.0, 80.0];
        // Peak 120, trough 80 -> 1/3.
        assert!((max_drawdown(&path) - 1.0 / 3.0).abs() < TOL);
        assert_eq!(max_drawdown(&[100.0, 110.0, 120.0]), 0.0);
    }

    #[test]
    fn test_cholesky_round_trip() {
        let matrix = vec![
            vec![4.0, 2.0, 0.6],
            vec![2.0, 5.0, 1.0],
            vec![0.6, 1.0, 3.0],
        ];
        let lower = cholesky(&matrix).unwrap();
        // L * L^T reproduces the input.
        for i in 0..3 {
            for j in 0..3 {
                let mut sum = 0.0;
                for k in 0..3 {
                    sum += lower[i][k] * lower[j][k];
                }
                assert!((sum - matrix[i][j]).abs() < 1e-6, "entry ({i},{j})");
            }
        }
    }

    #[test]
    fn test_cholesky_rejects_non_psd() {
        let matrix = vec![vec![1.0, 2.0], vec![2.0, 1.0]];
        let err = cholesky(&matrix).unwrap_err();
        assert!(err.to_string().contains("not positive definite"));

        // Regularizing hard enough makes it factorable.
        let fixed = regularize(&matrix, 1.1);
        assert!(cholesky(&fixed).is_ok());
    }

    #[test]
    fn test_normal_inverse_cdf_known_values() {
        assert!((normal_inverse_cdf(0.95).unwrap() - 1.6449).abs() < 1e-3);
        assert!((normal_inverse_cdf(0.99).unwrap() - 2.3263).abs() < 1e-3);
        assert!(normal_inverse_cdf(0.5).unwrap().abs() < 1e-9);
        assert!(normal_inverse_cdf(0.0).is_err());
        assert!(normal_inverse_cdf(1.0).is_err());
    }

    #[test]
    fn test_cornish_fisher_identity_for_normal_moments() {
        // Zero skew, kurtosis 3: the adjustment is the identity.
        let z = 1.645;
        assert!((cornish_fisher_z(z, 0.0, 3.0) - z).abs() < TOL);
    }

    #[test]
    fn test_cornish_fisher_negative_skew_raises_loss_quantile() {
        // Negative skew fattens the left tail; the adjusted upper quantile
        // used for VaR shrinks while the lower grows in magnitude.
        let z = 1.645;
        let adjusted = cornish_fisher_z(z, -0.8, 3.0);
        assert!(adjusted < z);
    }

    #[test]
    fn test_ewma_weights_recent() {
        let xs = vec![1.0, 1.0, 1.0, 10.0];
        let smoothed = ewma(&xs, 0.9);
        assert!(smoothed > 1.0 && smoothed < 10.0);
    }

    #[test]
    fn test_ewma_volatility_positive() {
        let rets = vec![0.01, -0.02, 0.015, -0.005];
        assert!(ewma_volatility(&rets, 0.94) > 0.0);
    }

    #[test]
    fn test_covariance_matrix_symmetric() {
        let series = vec![
            vec![0.01, -0.02, 0.03, 0.01],
            vec![0.02, -0.01, 0.02, 0.00],
        ];
        let m = covariance_matrix(&series);
        assert!((m[0][1] - m[1][0]).abs() < TOL);
        assert!(m[0][0] > 0.0);
    }
}
