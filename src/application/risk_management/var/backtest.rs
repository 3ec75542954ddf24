use crate::domain::errors::RiskError;
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF};

use super::VaRConfidence;

/// Chi-squared(1) critical value at the 95% level, shared by both tests.
pub const CHI2_CRITICAL_95: f64 = 3.84;

/// Outcome of backtesting a VaR series against realized returns.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestResult {
    pub confidence: VaRConfidence,
    pub total_observations: usize,
    pub var_breaches: usize,
    pub breach_rate: f64,
    pub expected_breach_rate: f64,

    /// Kupiec proportion-of-failures LR statistic (unconditional coverage).
    pub kupiec_statistic: f64,
    pub kupiec_p_value: f64,
    pub kupiec_test_passed: bool,

    /// Christoffersen independence LR statistic (breach clustering).
    pub christoffersen_statistic: f64,
    pub christoffersen_p_value: f64,
    pub christoffersen_test_passed: bool,

    /// Mean absolute error of realized loss vs the VaR estimate.
    pub mean_absolute_error: f64,
    pub root_mean_square_error: f64,
    /// mean(max(0, 1 - |loss - var| / var)), in [0, 1].
    pub average_var_accuracy: f64,

    /// Breach indicator per observation, in input order.
    pub breaches: Vec<bool>,
}

/// Backtests paired (realized return, VaR estimate) series.
///
/// A breach is a realized return worse than the (positive) VaR estimate:
/// `r_t < -var_t`. P-values come from the chi-squared CDF, not the
/// `exp(-LR/2)` shortcut.
pub struct VaRBacktester {
    min_observations: usize,
}

impl VaRBacktester {
    pub fn new(min_observations: usize) -> Self {
        Self { min_observations }
    }

    pub fn run(
        &self,
        realized_returns: &[f64],
        var_estimates: &[f64],
        confidence: VaRConfidence,
    ) -> Result<BacktestResult, RiskError> {
        if realized_returns.len() != var_estimates.len() {
            return Err(RiskError::invalid_input(format!(
                "{} returns but {} VaR estimates",
                realized_returns.len(),
                var_estimates.len()
            )));
        }
        if realized_returns.len() < self.min_observations {
            return Err(RiskError::InsufficientData {
                required: self.min_observations,
                available: realized_returns.len(),
            });
        }
        if var_estimates.iter().any(|v| !v.is_finite() || *v < 0.0) {
            return Err(RiskError::invalid_input(
                "VaR estimates must be finite positive loss fractions",
            ));
        }

        let breaches: Vec<bool> = realized_returns
            .iter()
            .zip(var_estimates)
            .map(|(r, v)| *r < -*v)
            .collect();
        let n = breaches.len();
        let n1 = breaches.iter().filter(|b| **b).count();
        let breach_rate = n1 as f64 / n as f64;
        let expected = confidence.tail();

        let kupiec_statistic = kupiec_pof(n, n1, expected)?;
        let kupiec_p_value = chi2_p_value(kupiec_statistic);
        let christoffersen_statistic = christoffersen_independence(&breaches)?;
        let christoffersen_p_value = chi2_p_value(christoffersen_statistic);

        let (mae, rmse, accuracy) = error_metrics(realized_returns, var_estimates);

        Ok(BacktestResult {
            confidence,
            total_observations: n,
            var_breaches: n1,
            breach_rate,
            expected_breach_rate: expected,
            kupiec_statistic,
            kupiec_p_value,
            kupiec_test_passed: kupiec_statistic < CHI2_CRITICAL_95,
            christoffersen_statistic,
            christoffersen_p_value,
            christoffersen_test_passed: christoffersen_statistic < CHI2_CRITICAL_95,
            mean_absolute_error: mae,
            root_mean_square_error: rmse,
            average_var_accuracy: accuracy,
            breaches,
        })
    }
}

impl Default for VaRBacktester {
    fn default() -> Self {
        Self::new(20)
    }
}

/// Kupiec proportion-of-failures likelihood ratio:
/// `LR = 2 [ n1 ln(p_hat / p) + n0 ln((1 - p_hat) / (1 - p)) ]`,
/// with the usual `0 * ln(0) = 0` convention at the boundaries.
fn kupiec_pof(n: usize, n1: usize, expected: f64) -> Result<f64, RiskError> {
    if !(0.0..1.0).contains(&expected) || expected <= 0.0 {
        return Err(RiskError::numeric(
            "kupiec",
            format!("expected breach rate {expected} outside (0, 1)"),
        ));
    }
    let n0 = n - n1;
    let p_hat = n1 as f64 / n as f64;

    let mut lr = 0.0;
    if n1 > 0 {
        lr += n1 as f64 * (p_hat / expected).ln();
    }
    if n0 > 0 {
        lr += n0 as f64 * ((1.0 - p_hat) / (1.0 - expected)).ln();
    }
    Ok(2.0 * lr)
}

/// Christoffersen independence LR from the breach transition counts. Zero
/// when the series cannot exhibit clustering (no breaches or all breaches).
fn christoffersen_independence(breaches: &[bool]) -> Result<f64, RiskError> {
    let mut n00 = 0.0;
    let mut n01 = 0.0;
    let mut n10 = 0.0;
    let mut n11 = 0.0;
    for window in breaches.windows(2) {
        match (window[0], window[1]) {
            (false, false) => n00 += 1.0,
            (false, true) => n01 += 1.0,
            (true, false) => n10 += 1.0,
            (true, true) => n11 += 1.0,
        }
    }

    let transitions = n00 + n01 + n10 + n11;
    if transitions == 0.0 {
        return Ok(0.0);
    }
    let pi = (n01 + n11) / transitions;
    let from0 = n00 + n01;
    let from1 = n10 + n11;
    if pi <= 0.0 || pi >= 1.0 || from0 == 0.0 || from1 == 0.0 {
        // Degenerate transition structure carries no clustering evidence.
        return Ok(0.0);
    }
    let pi0 = n01 / from0;
    let pi1 = n11 / from1;

    let xlnx = |x: f64, p: f64| if x > 0.0 { x * p.ln() } else { 0.0 };

    let log_l0 = xlnx(n00 + n10, 1.0 - pi) + xlnx(n01 + n11, pi);
    let log_l1 = xlnx(n00, 1.0 - pi0) + xlnx(n01, pi0) + xlnx(n10, 1.0 - pi1) + xlnx(n11, pi1);

    let lr = -2.0 * (log_l0 - log_l1);
    if !lr.is_finite() {
        return Err(RiskError::numeric(
            "christoffersen",
            "non-finite likelihood ratio",
        ));
    }
    Ok(lr.max(0.0))
}

fn chi2_p_value(statistic: f64) -> f64 {
    // One degree of freedom; constant parameter, construction cannot fail.
    let chi2 = ChiSquared::new(1.0).unwrap();
    1.0 - chi2.cdf(statistic.max(0.0))
}

/// MAE / RMSE / accuracy of realized loss (negated return) against the VaR
/// estimate.
fn error_metrics(returns: &[f64], var_estimates: &[f64]) -> (f64, f64, f64) {
    let n = returns.len() as f64;
    let mut abs_sum = 0.0;
    let mut sq_sum = 0.0;
    let mut accuracy_sum = 0.0;
    for (r, v) in returns.iter().zip(var_estimates) {
        let loss = -r;
        let error = loss - v;
        abs_sum += error.abs();
        sq_sum += error * error;
        if *v > f64::EPSILON {
            accuracy_sum += (1.0 - (loss - v).abs() / v).max(0.0);
        }
    }
    (abs_sum / n, (sq_sum / n).sqrt(), accuracy_sum / n)
}
