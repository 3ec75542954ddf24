pub mod confidence;
pub mod liquidity;
pub mod news;
pub mod technical;
pub mod volatility;

use crate::domain::data_quality::DataQuality;
use crate::domain::market::SentimentSample;
use crate::domain::risk::alerts::AlertLevel;
use crate::domain::trading::types::Prediction;
use serde::{Deserialize, Serialize};

pub use confidence::{ConfidenceGate, ConfidenceGateConfig};
pub use liquidity::{LiquidityGate, LiquidityGateConfig};
pub use news::{NewsGate, NewsGateConfig};
pub use technical::{TechnicalGate, TechnicalGateConfig};
pub use volatility::{VolatilityGate, VolatilityGateConfig};

/// Why a gate wants a symbol out of the investable universe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExclusionReason {
    LiquidityCrisis,
    ExtremeVolatility,
    ModelConfidenceLow,
    TechnicalBreakdown,
    NewsEventRisk,
    MissingData,
}

/// Verdict of one gate for one symbol.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GateVerdict {
    pub level: AlertLevel,
    pub reason: ExclusionReason,
    /// Contribution to the composite exclusion score, [0, 1].
    pub score: f64,
    pub should_exclude: bool,
    pub message: String,
}

impl GateVerdict {
    pub fn clear(reason: ExclusionReason) -> Self {
        Self {
            level: AlertLevel::Info,
            reason,
            score: 0.0,
            should_exclude: false,
            message: String::new(),
        }
    }

    pub fn exclude(
        level: AlertLevel,
        reason: ExclusionReason,
        score: f64,
        message: impl Into<String>,
    ) -> Self {
        Self {
            level,
            reason,
            score: score.clamp(0.0, 1.0),
            should_exclude: true,
            message: message.into(),
        }
    }
}

/// Everything a gate may look at for one symbol. Borrowed views only; gates
/// never mutate shared state.
#[derive(Debug)]
pub struct GateContext<'a> {
    pub symbol: &'a str,
    /// Recent closes, oldest first (up to the 30-day analysis window).
    pub prices: &'a [f64],
    /// Recent daily USD volumes, oldest first (up to 7 days).
    pub volumes: &'a [f64],
    /// Recent sentiment readings, oldest first.
    pub sentiment: &'a [SentimentSample],
    /// Latest prediction for the symbol, if the model produced one.
    pub prediction: Option<&'a Prediction>,
    /// Set when the model has recently failed validation for this symbol.
    pub recent_model_failure: bool,
    /// Provenance of the volatility inputs (Defaulted when the fallback
    /// constants stood in for measured history).
    pub volatility_quality: DataQuality,
}

/// A single exclusion criterion. Implementations are pure: same context,
/// same verdict.
pub trait ExclusionGate: Send + Sync {
    fn name(&self) -> &'static str;

    fn assess(&self, ctx: &GateContext<'_>) -> GateVerdict;
}
