use crate::domain::data_quality::DataQuality;
use crate::domain::errors::RiskError;
use crate::domain::risk::alerts::{AlertKind, AlertLevel, RiskAlert};
use crate::domain::stats;
use crate::domain::trading::params::TrsRiskParameters;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;
use tracing::{debug, warn};

use super::{
    HistoricalConfig, Methodology, MethodologyKind, MonteCarloConfig, ParametricConfig,
    VaRConfidence, VaRHorizon, VaRResult,
};

/// Default daily volatility assumed for assets without usable history.
pub const DEFAULT_DAILY_VOL: f64 = 0.02;
/// Default pairwise correlation assumed when either side lacks history.
pub const DEFAULT_CORRELATION: f64 = 0.6;
/// Observations below which an asset's volatility is considered unmeasured.
const MIN_MEASURED_OBSERVATIONS: usize = 20;
/// Diagonal bump used to regularize a near-singular covariance matrix.
const CHOLESKY_REGULARIZATION: f64 = 1e-8;

/// Read-only inputs for one VaR calculation. The orchestrator assembles
/// these from its caches; the engine never touches shared state.
#[derive(Debug)]
pub struct VaRInputs<'a> {
    pub assets: &'a [String],
    /// Long-only weight vector aligned to `assets`, summing to ~1.
    pub weights: &'a [f64],
    /// Daily return series per symbol, oldest first.
    pub returns_by_symbol: &'a HashMap<String, Vec<f64>>,
    pub portfolio_value: f64,
}

/// Per-asset volatilities and the correlation/covariance structure derived
/// from cached returns, with documented defaults standing in where history
/// is missing. Shared with the stress engine, which perturbs it.
pub(crate) struct RiskModel {
    pub(crate) sigmas: Vec<f64>,
    pub(crate) correlations: Vec<Vec<f64>>,
    pub(crate) covariance: Vec<Vec<f64>>,
    pub(crate) quality: DataQuality,
}

/// Four interchangeable VaR methodologies behind one dispatch point, plus
/// the derived measures (CVaR, component, incremental, correlation risk)
/// and TRS limit validation.
pub struct VaREngine {
    trs: TrsRiskParameters,
}

impl VaREngine {
    pub fn new(trs: TrsRiskParameters) -> Self {
        Self { trs }
    }

    pub fn trs_parameters(&self) -> &TrsRiskParameters {
        &self.trs
    }

    /// Calculate VaR with the requested methodology. All methodologies share
    /// the same result contract: `var_pct` is a positive loss fraction and
    /// `var_amount = portfolio_value * var_pct`.
    pub fn calculate(
        &self,
        methodology: &Methodology,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        now: DateTime<Utc>,
    ) -> Result<VaRResult, RiskError> {
        validate_inputs(inputs)?;
        let started = Instant::now();

        let model = self.build_risk_model(inputs);
        let mut result = match methodology {
            Methodology::Parametric(config) => {
                self.parametric(config, confidence, horizon, inputs, &model, now)?
            }
            Methodology::Historical(config) => {
                self.historical(config, confidence, horizon, inputs, &model, now)?
            }
            Methodology::MonteCarlo(config) => {
                self.monte_carlo(config, confidence, horizon, inputs, &model, now)?
            }
            Methodology::CornishFisher => {
                self.cornish_fisher(confidence, horizon, inputs, &model, now)?
            }
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        result.duration_ms = duration_ms;
        if duration_ms > self.trs.max_calculation_time_ms {
            // Soft budget: record, never cancel.
            result.warnings.push(format!(
                "calculation took {}ms, budget {}ms",
                duration_ms, self.trs.max_calculation_time_ms
            ));
        }
        self.validate_result(&mut result);
        Ok(result)
    }

    /// Run all four methodologies with default configurations and a shared
    /// seed, skipping any that fail cleanly (e.g. too little history for the
    /// historical simulation).
    pub fn calculate_multi_method(
        &self,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        seed: Option<u64>,
        now: DateTime<Utc>,
    ) -> BTreeMap<MethodologyKind, VaRResult> {
        let methodologies = [
            Methodology::Parametric(ParametricConfig::default()),
            Methodology::Historical(HistoricalConfig::default()),
            Methodology::MonteCarlo(MonteCarloConfig {
                seed,
                ..MonteCarloConfig::default()
            }),
            Methodology::CornishFisher,
        ];

        let mut results = BTreeMap::new();
        for methodology in methodologies {
            match self.calculate(&methodology, confidence, horizon, inputs, now) {
                Ok(result) => {
                    results.insert(methodology.kind(), result);
                }
                Err(err) => {
                    debug!(kind = ?methodology.kind(), %err, "methodology skipped");
                }
            }
        }
        results
    }

    /// Alerts for a finished calculation against the TRS limits. Limit
    /// breaches are alerts, not errors: they block new pair formation
    /// downstream but never abort the calculation itself.
    pub fn check_risk_limits(&self, result: &VaRResult, now: DateTime<Utc>) -> Vec<RiskAlert> {
        let mut alerts = Vec::new();

        if let Some(limit) = self.applicable_limit(result.confidence, result.horizon) {
            let ratio = result.var_pct / limit;
            if ratio >= 1.0 {
                alerts.push(
                    RiskAlert::new(
                        AlertLevel::Critical,
                        AlertKind::VarLimitBreach,
                        format!(
                            "VaR {:.2}% exceeds {:.2}% limit",
                            result.var_pct * 100.0,
                            limit * 100.0
                        ),
                        ratio.min(2.0) / 2.0,
                        now,
                    )
                    .with_actions(vec![
                        "block new pair formation".to_string(),
                        "reduce gross exposure".to_string(),
                    ]),
                );
            } else if ratio >= self.trs.var_breach_warning_ratio {
                alerts.push(RiskAlert::new(
                    AlertLevel::Warning,
                    AlertKind::VarLimitBreach,
                    format!(
                        "VaR {:.2}% at {:.0}% of the {:.2}% limit",
                        result.var_pct * 100.0,
                        ratio * 100.0,
                        limit * 100.0
                    ),
                    ratio,
                    now,
                ));
            }
        }

        if result.var_pct > 0.0 && result.cvar_pct > self.trs.cvar_limit_multiple * result.var_pct
        {
            alerts.push(RiskAlert::new(
                AlertLevel::Warning,
                AlertKind::CvarDominanceBreach,
                format!(
                    "CVaR {:.2}% exceeds {:.1}x VaR, tail heavier than modeled",
                    result.cvar_pct * 100.0,
                    self.trs.cvar_limit_multiple
                ),
                (result.cvar_pct / (self.trs.cvar_limit_multiple * result.var_pct)).min(1.0),
                now,
            ));
        }

        if result.correlation_risk > self.trs.correlation_risk_limit {
            alerts.push(
                RiskAlert::new(
                    AlertLevel::Warning,
                    AlertKind::CorrelationRiskLimit,
                    format!(
                        "correlation risk {:.2} above {:.2} limit",
                        result.correlation_risk, self.trs.correlation_risk_limit
                    ),
                    result.correlation_risk,
                    now,
                )
                .with_assets(result.asset_weights.keys().cloned().collect()),
            );
        }

        alerts
    }

    // === methodologies ===

    fn parametric(
        &self,
        config: &ParametricConfig,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        model: &RiskModel,
        now: DateTime<Utc>,
    ) -> Result<VaRResult, RiskError> {
        let mut model_cov = model.covariance.clone();
        let mut quality = model.quality;

        if config.use_ewma {
            // Replace diagonal variances with EWMA estimates where history
            // exists; correlations keep the sample structure.
            let mut sigmas = model.sigmas.clone();
            for (i, asset) in inputs.assets.iter().enumerate() {
                if let Some(series) = inputs.returns_by_symbol.get(asset) {
                    if series.len() >= MIN_MEASURED_OBSERVATIONS {
                        sigmas[i] = stats::ewma_volatility(series, config.ewma_decay);
                        continue;
                    }
                }
                quality = quality.merge(DataQuality::Defaulted);
            }
            model_cov = covariance_from(&sigmas, &model.correlations);
        }

        let sigma = portfolio_sigma(inputs.weights, &model_cov);
        let z = confidence.z_score();
        let scale = horizon.scaling();

        let var_pct = sigma * z * scale;
        // Analytic normal expected shortfall: sigma * phi(z) / tail.
        let cvar_pct = sigma * stats::normal_pdf(z) / confidence.tail() * scale;

        let mut result = self.base_result(
            MethodologyKind::Parametric,
            confidence,
            horizon,
            inputs,
            model,
            var_pct,
            cvar_pct.max(var_pct),
            now,
        );
        result.data_quality = quality;
        self.attach_decomposition(&mut result, inputs, &model_cov, z * scale, var_pct);
        Ok(result)
    }

    fn cornish_fisher(
        &self,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        model: &RiskModel,
        now: DateTime<Utc>,
    ) -> Result<VaRResult, RiskError> {
        let portfolio_returns = portfolio_return_series(inputs);
        if portfolio_returns.len() < 3 {
            return Err(RiskError::InsufficientData {
                required: 3,
                available: portfolio_returns.len(),
            });
        }

        let skew = stats::skewness(&portfolio_returns);
        let kurt = stats::kurtosis(&portfolio_returns);
        let z = confidence.z_score();
        // Adjust the loss-tail quantile: evaluate the expansion at -z so
        // negative skew deepens the loss estimate.
        let z_adjusted = -stats::cornish_fisher_z(-z, skew, kurt);

        let sigma = portfolio_sigma(inputs.weights, &model.covariance);
        let scale = horizon.scaling();
        let var_pct = sigma * z_adjusted * scale;
        let normal_es = sigma * stats::normal_pdf(z) / confidence.tail() * scale;
        // ES under the adjusted quantile, kept consistent with the VaR shift.
        let cvar_pct = if z > f64::EPSILON {
            normal_es * (z_adjusted / z).max(1.0)
        } else {
            normal_es
        };

        let mut result = self.base_result(
            MethodologyKind::CornishFisher,
            confidence,
            horizon,
            inputs,
            model,
            var_pct,
            cvar_pct.max(var_pct),
            now,
        );
        if (kurt - 3.0).abs() > 6.0 || skew.abs() > 2.0 {
            result.warnings.push(format!(
                "extreme sample moments (skew {skew:.2}, kurtosis {kurt:.2}), expansion may be unstable"
            ));
        }
        self.attach_decomposition(
            &mut result,
            inputs,
            &model.covariance,
            z_adjusted * scale,
            var_pct,
        );
        Ok(result)
    }

    fn historical(
        &self,
        config: &HistoricalConfig,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        model: &RiskModel,
        now: DateTime<Utc>,
    ) -> Result<VaRResult, RiskError> {
        let mut portfolio_returns = portfolio_return_series(inputs);
        if portfolio_returns.len() < config.min_data_points {
            return Err(RiskError::InsufficientData {
                required: config.min_data_points,
                available: portfolio_returns.len(),
            });
        }

        let mut warnings = Vec::new();
        if config.remove_outliers {
            let before = portfolio_returns.len();
            portfolio_returns = remove_outliers(&portfolio_returns, config.outlier_threshold);
            let removed = before - portfolio_returns.len();
            if removed > 0 {
                warnings.push(format!("removed {removed} outlier observations"));
            }
            if portfolio_returns.len() < config.min_data_points {
                return Err(RiskError::InsufficientData {
                    required: config.min_data_points,
                    available: portfolio_returns.len(),
                });
            }
        }

        let tail = confidence.tail();
        let quantile = if config.use_weighted_returns {
            weighted_quantile(&portfolio_returns, tail, config.decay_factor)
        } else {
            stats::percentile(&portfolio_returns, tail)?
        };

        let scale = horizon.scaling();
        let var_pct = -quantile * scale;
        let cvar_pct = conditional_var(&portfolio_returns, quantile) * scale;

        let mut result = self.base_result(
            MethodologyKind::HistoricalSimulation,
            confidence,
            horizon,
            inputs,
            model,
            var_pct,
            cvar_pct.max(var_pct),
            now,
        );
        result.warnings.extend(warnings);
        let z_equiv = confidence.z_score() * scale;
        self.attach_decomposition(&mut result, inputs, &model.covariance, z_equiv, var_pct);
        Ok(result)
    }

    fn monte_carlo(
        &self,
        config: &MonteCarloConfig,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        model: &RiskModel,
        now: DateTime<Utc>,
    ) -> Result<VaRResult, RiskError> {
        if config.simulation_count < 100 {
            return Err(RiskError::invalid_input(
                "Monte Carlo requires at least 100 simulations",
            ));
        }

        let mut warnings = Vec::new();
        let lower = match stats::cholesky(&model.covariance) {
            Ok(lower) => lower,
            Err(_) => {
                // Near-singular covariance: regularize once and retry.
                warnings.push("covariance regularized before factorization".to_string());
                let fixed = stats::regularize(&model.covariance, CHOLESKY_REGULARIZATION);
                stats::cholesky(&fixed)?
            }
        };

        let mut rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_os_rng(),
        };

        let n = inputs.assets.len();
        let mut simulated = Vec::with_capacity(config.simulation_count);
        let mut draw = vec![0.0; n];
        while simulated.len() < config.simulation_count {
            for slot in draw.iter_mut() {
                *slot = sample_standard_normal(&mut rng);
            }
            simulated.push(portfolio_shock(inputs.weights, &lower, &draw, 1.0));
            if config.use_antithetic && simulated.len() < config.simulation_count {
                simulated.push(portfolio_shock(inputs.weights, &lower, &draw, -1.0));
            }
        }

        let tail = confidence.tail();
        let quantile = stats::percentile(&simulated, tail)?;
        let scale = horizon.scaling();
        let var_pct = -quantile * scale;
        let cvar_pct = conditional_var(&simulated, quantile) * scale;

        let mut result = self.base_result(
            MethodologyKind::MonteCarlo,
            confidence,
            horizon,
            inputs,
            model,
            var_pct,
            cvar_pct.max(var_pct),
            now,
        );
        result.warnings.extend(warnings);
        let z_equiv = confidence.z_score() * scale;
        self.attach_decomposition(&mut result, inputs, &model.covariance, z_equiv, var_pct);
        Ok(result)
    }

    // === shared pieces ===

    #[allow(clippy::too_many_arguments)]
    fn base_result(
        &self,
        methodology: MethodologyKind,
        confidence: VaRConfidence,
        horizon: VaRHorizon,
        inputs: &VaRInputs<'_>,
        model: &RiskModel,
        var_pct: f64,
        cvar_pct: f64,
        now: DateTime<Utc>,
    ) -> VaRResult {
        let asset_weights: BTreeMap<String, f64> = inputs
            .assets
            .iter()
            .cloned()
            .zip(inputs.weights.iter().copied())
            .collect();

        VaRResult {
            methodology,
            confidence,
            horizon,
            portfolio_value: inputs.portfolio_value,
            var_amount: inputs.portfolio_value * var_pct,
            var_pct,
            cvar_pct,
            component_var: BTreeMap::new(),
            incremental_var: BTreeMap::new(),
            asset_weights,
            systematic_risk: 0.0,
            idiosyncratic_risk: 0.0,
            correlation_risk: correlation_risk(inputs.weights, &model.correlations),
            calculated_at: now,
            duration_ms: 0,
            data_quality: model.quality,
            warnings: Vec::new(),
            is_valid: true,
        }
    }

    /// Component VaR (Euler allocation on the covariance structure) and
    /// incremental VaR (finite difference, normalized by the weight). Both
    /// are computed on the parametric risk model; for simulation
    /// methodologies the components are rescaled so they sum to the
    /// methodology's own var_pct.
    fn attach_decomposition(
        &self,
        result: &mut VaRResult,
        inputs: &VaRInputs<'_>,
        covariance: &[Vec<f64>],
        z_scaled: f64,
        var_pct: f64,
    ) {
        let weights = inputs.weights;
        let sigma = portfolio_sigma(weights, covariance);
        if sigma <= f64::EPSILON {
            return;
        }

        let sigma_w = mat_vec(covariance, weights);
        let parametric_var = sigma * z_scaled;
        let rescale = if parametric_var > f64::EPSILON {
            var_pct / parametric_var
        } else {
            1.0
        };

        let mut component = BTreeMap::new();
        let mut incremental = BTreeMap::new();
        for (i, asset) in inputs.assets.iter().enumerate() {
            let c = weights[i] * sigma_w[i] / sigma * z_scaled * rescale;
            component.insert(asset.clone(), c);

            let iv = if weights[i].abs() > f64::EPSILON {
                let mut without = weights.to_vec();
                without[i] = 0.0;
                let sigma_without = portfolio_sigma(&without, covariance);
                (sigma - sigma_without) * z_scaled * rescale / weights[i]
            } else {
                0.0
            };
            incremental.insert(asset.clone(), iv);
        }
        result.component_var = component;
        result.incremental_var = incremental;

        // Variance decomposition: own-variance terms vs cross covariance.
        let total_var = sigma * sigma;
        let own_var: f64 = weights
            .iter()
            .enumerate()
            .map(|(i, w)| w * w * covariance[i][i])
            .sum();
        if total_var > f64::EPSILON {
            result.idiosyncratic_risk = (own_var / total_var).clamp(0.0, 1.0);
            result.systematic_risk = (1.0 - own_var / total_var).clamp(0.0, 1.0);
        }
    }

    pub(crate) fn build_risk_model(&self, inputs: &VaRInputs<'_>) -> RiskModel {
        let n = inputs.assets.len();
        let mut sigmas = Vec::with_capacity(n);
        let mut measured = Vec::with_capacity(n);
        let mut quality = DataQuality::Measured;

        for asset in inputs.assets {
            match inputs.returns_by_symbol.get(asset) {
                Some(series) if series.len() >= MIN_MEASURED_OBSERVATIONS => {
                    sigmas.push(stats::std_dev(series));
                    measured.push(true);
                }
                _ => {
                    sigmas.push(DEFAULT_DAILY_VOL);
                    measured.push(false);
                    quality = DataQuality::Defaulted;
                    debug!(asset = %asset, "using default volatility, history too thin");
                }
            }
        }

        let mut correlations = vec![vec![0.0; n]; n];
        for i in 0..n {
            correlations[i][i] = 1.0;
            for j in (i + 1)..n {
                let rho = if measured[i] && measured[j] {
                    stats::correlation(
                        &inputs.returns_by_symbol[&inputs.assets[i]],
                        &inputs.returns_by_symbol[&inputs.assets[j]],
                    )
                } else {
                    DEFAULT_CORRELATION
                };
                correlations[i][j] = rho;
                correlations[j][i] = rho;
            }
        }

        let covariance = covariance_from(&sigmas, &correlations);
        RiskModel {
            sigmas,
            correlations,
            covariance,
            quality,
        }
    }

    fn applicable_limit(&self, confidence: VaRConfidence, horizon: VaRHorizon) -> Option<f64> {
        match (horizon, confidence) {
            (VaRHorizon::Daily, VaRConfidence::P95) => Some(self.trs.max_daily_var95),
            (VaRHorizon::Daily, VaRConfidence::P99) => Some(self.trs.max_daily_var99),
            (VaRHorizon::Weekly, VaRConfidence::P95) => Some(self.trs.max_weekly_var95),
            (VaRHorizon::Monthly, VaRConfidence::P95) => Some(self.trs.max_monthly_var95),
            _ => None,
        }
    }

    fn validate_result(&self, result: &mut VaRResult) {
        if !result.var_pct.is_finite() || result.var_pct < 0.0 {
            result.is_valid = false;
            result
                .warnings
                .push(format!("var_pct {} is not a valid loss fraction", result.var_pct));
            return;
        }
        if let Some(limit) = self.applicable_limit(result.confidence, result.horizon) {
            if result.var_pct > limit {
                result.is_valid = false;
                warn!(
                    var_pct = result.var_pct,
                    limit, "VaR exceeds the TRS limit for its horizon"
                );
            }
        }
    }
}

impl Default for VaREngine {
    fn default() -> Self {
        Self::new(TrsRiskParameters::default())
    }
}

// === free helpers ===

fn validate_inputs(inputs: &VaRInputs<'_>) -> Result<(), RiskError> {
    if inputs.assets.is_empty() {
        return Err(RiskError::invalid_input("empty asset list"));
    }
    if inputs.assets.len() != inputs.weights.len() {
        return Err(RiskError::invalid_input(format!(
            "{} assets but {} weights",
            inputs.assets.len(),
            inputs.weights.len()
        )));
    }
    if inputs.weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
        return Err(RiskError::invalid_input(
            "weights must be finite and non-negative",
        ));
    }
    let total: f64 = inputs.weights.iter().sum();
    if (total - 1.0).abs() > 1e-6 {
        return Err(RiskError::invalid_input(format!(
            "weights sum to {total}, expected 1"
        )));
    }
    if !inputs.portfolio_value.is_finite() || inputs.portfolio_value < 0.0 {
        return Err(RiskError::invalid_input("portfolio value must be non-negative"));
    }
    Ok(())
}

pub(crate) fn covariance_from(sigmas: &[f64], correlations: &[Vec<f64>]) -> Vec<Vec<f64>> {
    let n = sigmas.len();
    let mut cov = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..n {
            cov[i][j] = correlations[i][j] * sigmas[i] * sigmas[j];
        }
    }
    cov
}

fn mat_vec(matrix: &[Vec<f64>], vector: &[f64]) -> Vec<f64> {
    matrix
        .iter()
        .map(|row| row.iter().zip(vector).map(|(m, v)| m * v).sum())
        .collect()
}

pub(crate) fn portfolio_sigma(weights: &[f64], covariance: &[Vec<f64>]) -> f64 {
    let sigma_w = mat_vec(covariance, weights);
    weights
        .iter()
        .zip(&sigma_w)
        .map(|(w, s)| w * s)
        .sum::<f64>()
        .max(0.0)
        .sqrt()
}

/// Historical portfolio returns: r_t = sum_i w_i r_{i,t} over the aligned
/// tail of every asset's series. Assets with no series contribute nothing
/// (their weight simply dampens the portfolio series).
fn portfolio_return_series(inputs: &VaRInputs<'_>) -> Vec<f64> {
    let lengths: Vec<usize> = inputs
        .assets
        .iter()
        .filter_map(|a| inputs.returns_by_symbol.get(a).map(Vec::len))
        .collect();
    let Some(&min_len) = lengths.iter().min() else {
        return Vec::new();
    };
    if min_len == 0 || lengths.len() != inputs.assets.len() {
        return Vec::new();
    }

    let mut series = vec![0.0; min_len];
    for (asset, weight) in inputs.assets.iter().zip(inputs.weights) {
        let returns = &inputs.returns_by_symbol[asset];
        let offset = returns.len() - min_len;
        for (t, slot) in series.iter_mut().enumerate() {
            *slot += weight * returns[offset + t];
        }
    }
    series
}

/// Mean of returns at or below the tail quantile, reported positive.
fn conditional_var(returns: &[f64], quantile: f64) -> f64 {
    let tail: Vec<f64> = returns.iter().copied().filter(|r| *r <= quantile).collect();
    if tail.is_empty() {
        return -quantile;
    }
    -stats::mean(&tail)
}

fn remove_outliers(returns: &[f64], threshold: f64) -> Vec<f64> {
    let m = stats::mean(returns);
    let sd = stats::std_dev(returns);
    if sd <= f64::EPSILON {
        return returns.to_vec();
    }
    returns
        .iter()
        .copied()
        .filter(|r| ((r - m) / sd).abs() <= threshold)
        .collect()
}

/// Exponentially weighted empirical quantile: recent observations carry
/// weight 1, each step back multiplies by `decay`.
fn weighted_quantile(returns: &[f64], tail: f64, decay: f64) -> f64 {
    let n = returns.len();
    let mut weighted: Vec<(f64, f64)> = returns
        .iter()
        .enumerate()
        .map(|(i, &r)| (r, decay.powi((n - 1 - i) as i32)))
        .collect();
    weighted.sort_by(|a, b| a.0.partial_cmp(&b.0).unwrap_or(std::cmp::Ordering::Equal));

    let total: f64 = weighted.iter().map(|(_, w)| w).sum();
    let mut cumulative = 0.0;
    for (r, w) in &weighted {
        cumulative += w / total;
        if cumulative >= tail {
            return *r;
        }
    }
    weighted.last().map(|(r, _)| *r).unwrap_or(0.0)
}

/// `|w' rho w| / sum_ij |w_i w_j|`, a [0, 1] score of how much correlation
/// structure amplifies the portfolio.
fn correlation_risk(weights: &[f64], correlations: &[Vec<f64>]) -> f64 {
    let n = weights.len();
    let mut numerator = 0.0;
    let mut denominator = 0.0;
    for i in 0..n {
        for j in 0..n {
            numerator += weights[i] * correlations[i][j] * weights[j];
            denominator += (weights[i] * weights[j]).abs();
        }
    }
    if denominator <= f64::EPSILON {
        return 0.0;
    }
    (numerator.abs() / denominator).clamp(0.0, 1.0)
}

fn portfolio_shock(weights: &[f64], lower: &[Vec<f64>], draw: &[f64], sign: f64) -> f64 {
    let n = weights.len();
    let mut shock = 0.0;
    for i in 0..n {
        let mut asset_shock = 0.0;
        for k in 0..=i {
            asset_shock += lower[i][k] * draw[k] * sign;
        }
        shock += weights[i] * asset_shock;
    }
    shock
}

/// Box-Muller standard normal draw. Kept local so simulation stays on one
/// RNG stream and reproducible from a single seed.
fn sample_standard_normal(rng: &mut StdRng) -> f64 {
    let u1: f64 = rng.random::<f64>().max(f64::MIN_POSITIVE);
    let u2: f64 = rng.random::<f64>();
    (-2.0 * u1.ln()).sqrt() * (2.0 * std::f64::consts::PI * u2).cos()
}
