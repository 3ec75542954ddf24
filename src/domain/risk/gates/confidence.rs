use crate::domain::risk::alerts::AlertLevel;
use crate::domain::risk::gates::{ExclusionGate, ExclusionReason, GateContext, GateVerdict};

#[derive(Debug, Clone)]
pub struct ConfidenceGateConfig {
    /// Composite confidence below this excludes the symbol.
    pub min_model_confidence: f64,
    /// Weight of the model R^2 in the composite (the rest is raw confidence).
    pub r2_blend_weight: f64,
}

impl Default for ConfidenceGateConfig {
    fn default() -> Self {
        Self {
            min_model_confidence: 0.30,
            r2_blend_weight: 0.25,
        }
    }
}

/// Excludes symbols the prediction model is not confident about, or for
/// which the model has recently failed validation.
pub struct ConfidenceGate {
    config: ConfidenceGateConfig,
}

impl ConfidenceGate {
    pub fn new(config: ConfidenceGateConfig) -> Self {
        Self { config }
    }

    fn composite_confidence(&self, confidence: f64, model_r2: f64) -> f64 {
        let w = self.config.r2_blend_weight;
        (1.0 - w) * confidence + w * model_r2.clamp(0.0, 1.0)
    }
}

impl ExclusionGate for ConfidenceGate {
    fn name(&self) -> &'static str {
        "model_confidence"
    }

    fn assess(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let Some(prediction) = ctx.prediction else {
            return GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::ModelConfidenceLow,
                0.4,
                format!("{}: no prediction available", ctx.symbol),
            );
        };

        if ctx.recent_model_failure {
            return GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::ModelConfidenceLow,
                0.3,
                format!("{}: model recently failed validation", ctx.symbol),
            );
        }

        let composite = self.composite_confidence(prediction.confidence, prediction.model_r2);
        if composite < self.config.min_model_confidence {
            GateVerdict::exclude(
                AlertLevel::Critical,
                ExclusionReason::ModelConfidenceLow,
                0.5,
                format!(
                    "{}: composite confidence {:.2} below {:.2} floor",
                    ctx.symbol, composite, self.config.min_model_confidence
                ),
            )
        } else {
            GateVerdict::clear(ExclusionReason::ModelConfidenceLow)
        }
    }
}
