use crate::application::risk_management::var::engine::{
    covariance_from, portfolio_sigma, VaREngine, VaRInputs,
};
use crate::application::risk_management::var::{
    MethodologyKind, VaRConfidence, VaRHorizon, VaRResult,
};
use crate::domain::errors::RiskError;
use crate::domain::trading::params::TrsRiskParameters;
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, info, warn};

use super::protection::{ProtectionAction, ProtectionActionType};
use super::scenarios::{
    calibration, AssetClass, CustomScenario, StressHorizon, StressScenario, StressSeverity,
};

/// Hard per-scenario calculation budget. Exceeding it aborts that scenario
/// only; the rest of a suite continues.
pub const SCENARIO_BUDGET_MS: u64 = 500;

/// Outcome of one stress scenario applied to the portfolio.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StressResult {
    pub scenario: String,
    pub severity: StressSeverity,
    pub horizon: StressHorizon,

    pub portfolio_value: f64,
    pub stressed_value: f64,
    /// Dollar loss, positive.
    pub absolute_loss: f64,
    /// Loss as a positive fraction of portfolio value.
    pub pct_loss: f64,

    /// Positive loss fraction attributed to each asset.
    pub asset_losses: BTreeMap<String, f64>,
    /// Stressed pairwise correlations, keyed "A/B" (upper triangle).
    pub stressed_correlations: BTreeMap<String, f64>,

    /// VaR recomputed under the stressed covariance structure.
    pub stressed_var: Option<VaRResult>,
    /// Stressed VaR relative to the unstressed baseline.
    pub stress_var_multiplier: f64,

    pub recovery_seconds: u64,
    /// Probability of recovering to the pre-stress value, [0, 1].
    pub recovery_probability: f64,

    pub recommended_actions: Vec<ProtectionAction>,
    pub warnings: Vec<String>,
    pub calculated_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub is_valid: bool,
}

/// Per-asset shock set resolved from a calibration or a custom scenario.
struct ShockSet {
    price_shocks: Vec<f64>,
    vol_multipliers: Vec<f64>,
    liquidity_costs: Vec<f64>,
    correlation_shift: f64,
    pair_correlation_shocks: Vec<(String, String, f64)>,
    recovery_days: f64,
}

/// Applies named and custom scenarios to the portfolio, producing
/// stress-adjusted VaR and ranked protection recommendations.
pub struct StressEngine {
    trs: TrsRiskParameters,
    budget_ms: u64,
}

impl StressEngine {
    pub fn new(trs: TrsRiskParameters) -> Self {
        Self {
            trs,
            budget_ms: SCENARIO_BUDGET_MS,
        }
    }

    #[cfg(test)]
    fn with_budget_ms(trs: TrsRiskParameters, budget_ms: u64) -> Self {
        Self { trs, budget_ms }
    }

    /// Run one scenario. Fails with `Timeout` if the hard budget is blown,
    /// leaving sibling scenarios unaffected.
    pub fn run_scenario(
        &self,
        var_engine: &VaREngine,
        scenario: &StressScenario,
        severity: StressSeverity,
        horizon: StressHorizon,
        inputs: &VaRInputs<'_>,
        now: DateTime<Utc>,
    ) -> Result<StressResult, RiskError> {
        let started = Instant::now();
        let shocks = self.resolve_shocks(scenario, severity, inputs)?;

        // Per-asset and portfolio impact. Shocks are negative fractions;
        // liquidity costs always subtract.
        let mut asset_losses = BTreeMap::new();
        let mut portfolio_return = 0.0;
        for (i, asset) in inputs.assets.iter().enumerate() {
            let contribution =
                inputs.weights[i] * (shocks.price_shocks[i] - shocks.liquidity_costs[i]);
            portfolio_return += contribution;
            asset_losses.insert(asset.clone(), (-contribution).max(0.0));
        }
        let pct_loss = (-portfolio_return).max(0.0);
        let stressed_value = inputs.portfolio_value * (1.0 + portfolio_return);
        let absolute_loss = inputs.portfolio_value * pct_loss;

        // Stressed covariance: inflated vols, correlations shifted toward 1.
        let model = var_engine.build_risk_model(inputs);
        let stressed_sigmas: Vec<f64> = model
            .sigmas
            .iter()
            .zip(&shocks.vol_multipliers)
            .map(|(s, m)| s * m)
            .collect();
        let mut stressed_correlations = model.correlations.clone();
        let n = inputs.assets.len();
        for i in 0..n {
            for j in 0..n {
                if i != j {
                    stressed_correlations[i][j] =
                        (stressed_correlations[i][j] + shocks.correlation_shift).clamp(-1.0, 1.0);
                }
            }
        }
        for (a, b, delta) in &shocks.pair_correlation_shocks {
            if let (Some(i), Some(j)) = (index_of(inputs.assets, a), index_of(inputs.assets, b)) {
                let shifted = (model.correlations[i][j] + delta).clamp(-1.0, 1.0);
                stressed_correlations[i][j] = shifted;
                stressed_correlations[j][i] = shifted;
            }
        }

        let baseline_sigma = portfolio_sigma(inputs.weights, &model.covariance);
        let stressed_cov = covariance_from(&stressed_sigmas, &stressed_correlations);
        let stressed_sigma = portfolio_sigma(inputs.weights, &stressed_cov);

        let z = VaRConfidence::P95.z_score();
        let stressed_var_pct = stressed_sigma * z;
        let stress_var_multiplier = if baseline_sigma > f64::EPSILON {
            stressed_sigma / baseline_sigma
        } else {
            1.0
        };

        let stressed_var = VaRResult {
            methodology: MethodologyKind::Parametric,
            confidence: VaRConfidence::P95,
            horizon: VaRHorizon::Daily,
            portfolio_value: inputs.portfolio_value,
            var_amount: inputs.portfolio_value * stressed_var_pct,
            var_pct: stressed_var_pct,
            cvar_pct: stressed_sigma * crate::domain::stats::normal_pdf(z)
                / VaRConfidence::P95.tail(),
            component_var: BTreeMap::new(),
            incremental_var: BTreeMap::new(),
            asset_weights: inputs
                .assets
                .iter()
                .cloned()
                .zip(inputs.weights.iter().copied())
                .collect(),
            systematic_risk: 0.0,
            idiosyncratic_risk: 0.0,
            correlation_risk: 0.0,
            calculated_at: now,
            duration_ms: 0,
            data_quality: model.quality,
            warnings: vec![format!("stress-adjusted under {}", scenario.name())],
            is_valid: stressed_var_pct.is_finite(),
        };

        // Recovery model: base recovery time scales with severity; the
        // probability of full recovery decays with the depth of the loss.
        let recovery_seconds =
            (shocks.recovery_days * 86_400.0 * severity.multiplier()) as u64;
        let recovery_probability = (0.95 - pct_loss).clamp(0.05, 0.95);

        let recommended_actions = self.recommend_actions(pct_loss, &asset_losses);

        // Hard target: the scenario must finish inside the budget.
        let duration_ms = started.elapsed().as_millis() as u64;
        if duration_ms >= self.budget_ms {
            warn!(
                scenario = %scenario.name(),
                duration_ms,
                budget_ms = self.budget_ms,
                "stress scenario aborted on hard budget"
            );
            return Err(RiskError::Timeout {
                context: format!("stress scenario {}", scenario.name()),
                budget_ms: self.budget_ms,
            });
        }

        let mut warnings = Vec::new();
        if model.quality.is_defaulted() {
            warnings.push("risk model built on defaulted volatilities".to_string());
        }
        if stressed_value < 0.0 {
            warnings.push("stressed value below zero, shocks exceed portfolio".to_string());
        }

        info!(
            scenario = %scenario.name(),
            pct_loss,
            stress_var_multiplier,
            "stress scenario complete"
        );

        Ok(StressResult {
            scenario: scenario.name(),
            severity,
            horizon,
            portfolio_value: inputs.portfolio_value,
            stressed_value,
            absolute_loss,
            pct_loss,
            asset_losses,
            stressed_correlations: upper_triangle(inputs.assets, &stressed_correlations),
            stressed_var: Some(stressed_var),
            stress_var_multiplier,
            recovery_seconds,
            recovery_probability,
            recommended_actions,
            warnings,
            calculated_at: now,
            duration_ms,
            is_valid: stressed_value.is_finite() && pct_loss <= 1.0,
        })
    }

    /// Run every named scenario at the given severity. Individual failures
    /// (including per-scenario timeouts) are logged and skipped.
    pub fn run_comprehensive(
        &self,
        var_engine: &VaREngine,
        severity: StressSeverity,
        horizon: StressHorizon,
        inputs: &VaRInputs<'_>,
        now: DateTime<Utc>,
    ) -> BTreeMap<String, StressResult> {
        let mut results = BTreeMap::new();
        for scenario in StressScenario::all_named() {
            match self.run_scenario(var_engine, &scenario, severity, horizon, inputs, now) {
                Ok(result) => {
                    results.insert(scenario.name(), result);
                }
                Err(err) => {
                    debug!(scenario = %scenario.name(), %err, "scenario skipped");
                }
            }
        }
        results
    }

    pub fn trs_parameters(&self) -> &TrsRiskParameters {
        &self.trs
    }

    fn resolve_shocks(
        &self,
        scenario: &StressScenario,
        severity: StressSeverity,
        inputs: &VaRInputs<'_>,
    ) -> Result<ShockSet, RiskError> {
        let multiplier = severity.multiplier();
        match scenario {
            StressScenario::Custom(custom) => Ok(resolve_custom(custom, multiplier, inputs)),
            named => {
                let cal = calibration(named).ok_or_else(|| {
                    RiskError::invalid_input(format!(
                        "no calibration for scenario {}",
                        named.name()
                    ))
                })?;
                let price_shocks = inputs
                    .assets
                    .iter()
                    .map(|asset| {
                        let factor = cal.class_factor(AssetClass::of(asset));
                        (cal.base_price_shock * factor * multiplier).max(-0.95)
                    })
                    .collect();
                Ok(ShockSet {
                    price_shocks,
                    vol_multipliers: vec![cal.vol_multiplier; inputs.assets.len()],
                    liquidity_costs: vec![cal.liquidity_cost; inputs.assets.len()],
                    correlation_shift: (cal.correlation_shift * multiplier).min(1.0),
                    pair_correlation_shocks: Vec::new(),
                    recovery_days: cal.recovery_days,
                })
            }
        }
    }

    fn recommend_actions(
        &self,
        pct_loss: f64,
        asset_losses: &BTreeMap<String, f64>,
    ) -> Vec<ProtectionAction> {
        let mut actions = Vec::new();
        if pct_loss < 0.02 {
            return actions;
        }

        let worst_assets: Vec<String> = {
            let mut ranked: Vec<(&String, &f64)> = asset_losses.iter().collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(a.1).unwrap_or(std::cmp::Ordering::Equal));
            ranked.into_iter().take(3).map(|(s, _)| s.clone()).collect()
        };

        actions.push(
            ProtectionAction::new(
                ProtectionActionType::ReducePositions,
                pct_loss.min(1.0),
                1,
                format!("cut exposure after a {:.1}% modeled loss", pct_loss * 100.0),
            )
            .targeting(worst_assets.clone()),
        );
        actions.push(ProtectionAction::new(
            ProtectionActionType::IncreaseCash,
            (pct_loss * 0.5).min(1.0),
            2,
            "raise the cash buffer while stress persists",
        ));

        if pct_loss >= 0.25 {
            actions.push(
                ProtectionAction::new(
                    ProtectionActionType::ActivateStopLosses,
                    1.0,
                    3,
                    "arm stop-losses on surviving positions",
                )
                .targeting(worst_assets),
            );
            actions.push(ProtectionAction::new(
                ProtectionActionType::StopTrading,
                1.0,
                4,
                "halt new pair formation until the desk reviews",
            ));
        }
        actions.push(
            ProtectionAction::new(
                ProtectionActionType::NotifyOperators,
                1.0,
                9,
                "notify operators of the stress outcome",
            )
            .within_minutes(5),
        );
        actions
    }
}

impl Default for StressEngine {
    fn default() -> Self {
        Self::new(TrsRiskParameters::default())
    }
}

fn resolve_custom(custom: &CustomScenario, multiplier: f64, inputs: &VaRInputs<'_>) -> ShockSet {
    // An evolution curve scales shocks by its peak intensity.
    let peak_intensity = custom
        .time_evolution
        .iter()
        .map(|(_, intensity)| *intensity)
        .fold(1.0_f64, f64::max)
        .clamp(0.0, 2.0);

    let lookup = |pairs: &[(String, f64)], symbol: &str, default: f64| {
        pairs
            .iter()
            .find(|(s, _)| s == symbol)
            .map(|(_, v)| *v)
            .unwrap_or(default)
    };

    ShockSet {
        price_shocks: inputs
            .assets
            .iter()
            .map(|a| (lookup(&custom.price_shocks, a, 0.0) * multiplier * peak_intensity).max(-0.95))
            .collect(),
        vol_multipliers: inputs
            .assets
            .iter()
            .map(|a| lookup(&custom.vol_shocks, a, 1.0).max(1.0))
            .collect(),
        liquidity_costs: inputs
            .assets
            .iter()
            .map(|a| lookup(&custom.liquidity_shocks, a, 0.0).max(0.0))
            .collect(),
        correlation_shift: 0.0,
        pair_correlation_shocks: custom.correlation_shocks.clone(),
        recovery_days: 30.0,
    }
}

fn index_of(assets: &[String], symbol: &str) -> Option<usize> {
    assets.iter().position(|a| a == symbol)
}

fn upper_triangle(assets: &[String], matrix: &[Vec<f64>]) -> BTreeMap<String, f64> {
    let mut out = BTreeMap::new();
    for i in 0..assets.len() {
        for j in (i + 1)..assets.len() {
            out.insert(format!("{}/{}", assets[i], assets[j]), matrix[i][j]);
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use std::collections::HashMap;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn inputs<'a>(
        assets: &'a [String],
        weights: &'a [f64],
        returns: &'a HashMap<String, Vec<f64>>,
    ) -> VaRInputs<'a> {
        VaRInputs {
            assets,
            weights,
            returns_by_symbol: returns,
            portfolio_value: 1_000_000.0,
        }
    }

    #[test]
    fn test_flash_crash_severity_ordering() {
        let assets = vec!["BTC".to_string(), "ADA".to_string()];
        let weights = [0.5, 0.5];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::default();

        let mild = engine
            .run_scenario(
                &var_engine,
                &StressScenario::FlashCrash,
                StressSeverity::Mild,
                StressHorizon::Immediate,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap();
        let severe = engine
            .run_scenario(
                &var_engine,
                &StressScenario::FlashCrash,
                StressSeverity::Severe,
                StressHorizon::Immediate,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap();

        assert!(severe.pct_loss > mild.pct_loss);
        assert!(severe.recovery_seconds > mild.recovery_seconds);
        assert!(severe.recovery_probability <= mild.recovery_probability);
        assert!((mild.absolute_loss - mild.pct_loss * 1_000_000.0).abs() < 1e-6);
    }

    #[test]
    fn test_stressed_var_exceeds_baseline() {
        let assets = vec!["BTC".to_string(), "ETH".to_string()];
        let weights = [0.6, 0.4];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::default();

        let result = engine
            .run_scenario(
                &var_engine,
                &StressScenario::VolatilitySpike,
                StressSeverity::Moderate,
                StressHorizon::Intraday,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap();

        assert!(result.stress_var_multiplier > 1.0);
        let stressed = result.stressed_var.as_ref().unwrap();
        assert!(stressed.var_pct > 0.0);
        // Correlations were pushed toward 1 and stay clipped.
        for rho in result.stressed_correlations.values() {
            assert!(*rho <= 1.0 && *rho >= -1.0);
        }
    }

    #[test]
    fn test_stablecoin_depeg_hits_stables() {
        let assets = vec!["USDC".to_string(), "BTC".to_string()];
        let weights = [0.5, 0.5];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::default();

        let result = engine
            .run_scenario(
                &var_engine,
                &StressScenario::StablecoinDepeg,
                StressSeverity::Mild,
                StressHorizon::MultiDay,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap();

        let usdc_loss = result.asset_losses["USDC"];
        let btc_loss = result.asset_losses["BTC"];
        assert!(
            usdc_loss > btc_loss,
            "depeg should hit the stable hardest: {usdc_loss} vs {btc_loss}"
        );
    }

    #[test]
    fn test_severe_loss_recommends_protection() {
        let assets = vec!["BTC".to_string(), "ADA".to_string()];
        let weights = [0.5, 0.5];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::default();

        let result = engine
            .run_scenario(
                &var_engine,
                &StressScenario::CryptoWinter,
                StressSeverity::Mild,
                StressHorizon::Extended,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap();

        assert!(result.pct_loss > 0.25);
        let types: Vec<ProtectionActionType> = result
            .recommended_actions
            .iter()
            .map(|a| a.action_type)
            .collect();
        assert!(types.contains(&ProtectionActionType::ReducePositions));
        assert!(types.contains(&ProtectionActionType::StopTrading));
        assert!(types.contains(&ProtectionActionType::NotifyOperators));
    }

    #[test]
    fn test_custom_scenario_shocks() {
        let assets = vec!["BTC".to_string(), "ETH".to_string()];
        let weights = [0.5, 0.5];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::default();

        let custom = StressScenario::Custom(CustomScenario {
            name: "btc-only-crash".to_string(),
            description: "BTC drops 30%, ETH untouched".to_string(),
            price_shocks: vec![("BTC".to_string(), -0.30)],
            vol_shocks: vec![("BTC".to_string(), 2.0)],
            correlation_shocks: vec![("BTC".to_string(), "ETH".to_string(), 0.3)],
            liquidity_shocks: vec![],
            time_evolution: vec![(0, 0.5), (5, 1.0)],
        });

        let result = engine
            .run_scenario(
                &var_engine,
                &custom,
                StressSeverity::Mild,
                StressHorizon::Immediate,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap();

        // Only the BTC leg loses.
        assert!((result.asset_losses["BTC"] - 0.15).abs() < 1e-9);
        assert_eq!(result.asset_losses["ETH"], 0.0);
        assert!((result.pct_loss - 0.15).abs() < 1e-9);
        assert_eq!(result.scenario, "Custom:btc-only-crash");
    }

    #[test]
    fn test_comprehensive_suite_covers_all_scenarios() {
        let assets = vec!["BTC".to_string(), "ETH".to_string()];
        let weights = [0.5, 0.5];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::default();

        let results = engine.run_comprehensive(
            &var_engine,
            StressSeverity::Severe,
            StressHorizon::Intraday,
            &inputs(&assets, &weights, &returns),
            now(),
        );
        assert_eq!(results.len(), StressScenario::all_named().len());
        assert!(results.values().all(|r| r.pct_loss > 0.0));
    }

    #[test]
    fn test_zero_budget_times_out_scenario_only() {
        let assets = vec!["BTC".to_string()];
        let weights = [1.0];
        let returns = HashMap::new();
        let var_engine = VaREngine::default();
        let engine = StressEngine::with_budget_ms(TrsRiskParameters::default(), 0);

        let err = engine
            .run_scenario(
                &var_engine,
                &StressScenario::FlashCrash,
                StressSeverity::Mild,
                StressHorizon::Immediate,
                &inputs(&assets, &weights, &returns),
                now(),
            )
            .unwrap_err();
        assert!(matches!(err, RiskError::Timeout { .. }));

        // The suite still produces the sibling results it can afford.
        let results = engine.run_comprehensive(
            &var_engine,
            StressSeverity::Mild,
            StressHorizon::Immediate,
            &inputs(&assets, &weights, &returns),
            now(),
        );
        assert!(results.is_empty());
    }
}
