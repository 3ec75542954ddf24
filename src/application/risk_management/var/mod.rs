pub mod backtest;
pub mod engine;

use crate::domain::data_quality::DataQuality;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub use backtest::{BacktestResult, VaRBacktester};
pub use engine::{VaREngine, VaRInputs};

/// VaR confidence levels. The z-scores are the documented regulatory
/// constants, not recomputed quantiles, so results match the published
/// limits bit-for-bit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaRConfidence {
    P90,
    P95,
    P99,
    P999,
}

impl VaRConfidence {
    /// Confidence level as a probability.
    pub fn alpha(&self) -> f64 {
        match self {
            VaRConfidence::P90 => 0.90,
            VaRConfidence::P95 => 0.95,
            VaRConfidence::P99 => 0.99,
            VaRConfidence::P999 => 0.999,
        }
    }

    /// One-sided normal quantile for the level.
    pub fn z_score(&self) -> f64 {
        match self {
            VaRConfidence::P90 => 1.282,
            VaRConfidence::P95 => 1.645,
            VaRConfidence::P99 => 2.326,
            VaRConfidence::P999 => 3.090,
        }
    }

    /// Tail probability (expected breach rate).
    pub fn tail(&self) -> f64 {
        1.0 - self.alpha()
    }
}

/// Calculation horizons. Scaling uses the square-root-of-time rule, which is
/// an approximation (it assumes i.i.d. returns) and is documented as such.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VaRHorizon {
    OneHour,
    FourHours,
    Daily,
    Weekly,
    Monthly,
}

impl VaRHorizon {
    pub fn days(&self) -> f64 {
        match self {
            VaRHorizon::OneHour => 1.0 / 24.0,
            VaRHorizon::FourHours => 4.0 / 24.0,
            VaRHorizon::Daily => 1.0,
            VaRHorizon::Weekly => 7.0,
            VaRHorizon::Monthly => 30.0,
        }
    }

    /// sqrt-of-time multiplier applied to a daily figure.
    pub fn scaling(&self) -> f64 {
        self.days().sqrt()
    }
}

/// Methodology tag carried on results and used as a comparison key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MethodologyKind {
    Parametric,
    HistoricalSimulation,
    MonteCarlo,
    CornishFisher,
}

/// Parametric VaR configuration.
#[derive(Debug, Clone)]
pub struct ParametricConfig {
    /// Use EWMA volatility instead of the plain sample estimate.
    pub use_ewma: bool,
    /// RiskMetrics decay factor.
    pub ewma_decay: f64,
}

impl Default for ParametricConfig {
    fn default() -> Self {
        Self {
            use_ewma: false,
            ewma_decay: 0.94,
        }
    }
}

/// Historical-simulation configuration.
#[derive(Debug, Clone)]
pub struct HistoricalConfig {
    pub min_data_points: usize,
    /// Weight recent observations more via exponential decay.
    pub use_weighted_returns: bool,
    pub decay_factor: f64,
    pub remove_outliers: bool,
    /// Z-score beyond which an observation is discarded as an outlier.
    pub outlier_threshold: f64,
}

impl Default for HistoricalConfig {
    fn default() -> Self {
        Self {
            min_data_points: 100,
            use_weighted_returns: false,
            decay_factor: 0.94,
            remove_outliers: false,
            outlier_threshold: 3.0,
        }
    }
}

/// Monte Carlo configuration.
#[derive(Debug, Clone)]
pub struct MonteCarloConfig {
    pub simulation_count: usize,
    /// Fixed seed for reproducible simulation; `None` seeds from entropy.
    pub seed: Option<u64>,
    /// Antithetic variance reduction (pairs each draw with its negation).
    pub use_antithetic: bool,
}

impl Default for MonteCarloConfig {
    fn default() -> Self {
        Self {
            simulation_count: 10_000,
            seed: None,
            use_antithetic: true,
        }
    }
}

/// The four interchangeable methodologies behind one dispatch point.
#[derive(Debug, Clone)]
pub enum Methodology {
    Parametric(ParametricConfig),
    Historical(HistoricalConfig),
    MonteCarlo(MonteCarloConfig),
    CornishFisher,
}

impl Methodology {
    pub fn kind(&self) -> MethodologyKind {
        match self {
            Methodology::Parametric(_) => MethodologyKind::Parametric,
            Methodology::Historical(_) => MethodologyKind::HistoricalSimulation,
            Methodology::MonteCarlo(_) => MethodologyKind::MonteCarlo,
            Methodology::CornishFisher => MethodologyKind::CornishFisher,
        }
    }
}

/// Result of one VaR calculation. `var_pct` is a positive loss fraction of
/// portfolio value; `var_amount = portfolio_value * var_pct`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VaRResult {
    pub methodology: MethodologyKind,
    pub confidence: VaRConfidence,
    pub horizon: VaRHorizon,

    pub portfolio_value: f64,
    pub var_amount: f64,
    pub var_pct: f64,
    /// Expected shortfall beyond VaR, positive, >= var_pct.
    pub cvar_pct: f64,

    /// Risk contribution per asset (sums to var_pct for parametric).
    pub component_var: BTreeMap<String, f64>,
    /// Marginal VaR per unit of weight per asset.
    pub incremental_var: BTreeMap<String, f64>,
    pub asset_weights: BTreeMap<String, f64>,

    /// Share of portfolio variance from cross-asset covariance, [0, 1].
    pub systematic_risk: f64,
    /// Share of portfolio variance from own-variance terms, [0, 1].
    pub idiosyncratic_risk: f64,
    /// |w' rho w| / sum |w_i w_j|.
    pub correlation_risk: f64,

    pub calculated_at: DateTime<Utc>,
    pub duration_ms: u64,
    pub data_quality: DataQuality,
    pub warnings: Vec<String>,
    pub is_valid: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_z_scores_match_documented_constants() {
        assert!((VaRConfidence::P95.z_score() - 1.645).abs() < 1e-12);
        assert!((VaRConfidence::P99.z_score() - 2.326).abs() < 1e-12);
    }

    #[test]
    fn test_horizon_scaling_is_sqrt_time() {
        assert!((VaRHorizon::Daily.scaling() - 1.0).abs() < 1e-12);
        assert!((VaRHorizon::Weekly.scaling() - 7.0_f64.sqrt()).abs() < 1e-12);
        assert!(VaRHorizon::OneHour.scaling() < 1.0);
    }

    #[test]
    fn test_methodology_kind_mapping() {
        assert_eq!(
            Methodology::Parametric(Default::default()).kind(),
            MethodologyKind::Parametric
        );
        assert_eq!(Methodology::CornishFisher.kind(), MethodologyKind::CornishFisher);
    }
}
