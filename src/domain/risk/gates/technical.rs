use crate::domain::risk::alerts::AlertLevel;
use crate::domain::risk::gates::{ExclusionGate, ExclusionReason, GateContext, GateVerdict};
use crate::domain::stats;

#[derive(Debug, Clone)]
pub struct TechnicalGateConfig {
    pub rsi_period: usize,
    /// RSI above this is overbought.
    pub overbought_rsi: f64,
    /// RSI below this is oversold.
    pub oversold_rsi: f64,
}

impl Default for TechnicalGateConfig {
    fn default() -> Self {
        Self {
            rsi_period: 14,
            overbought_rsi: 85.0,
            oversold_rsi: 15.0,
        }
    }
}

/// Excludes symbols at technical extremes. RSI's own insufficient-data
/// contract (neutral 50.0) means a thin history simply passes here; the
/// liquidity and volatility gates carry the missing-data caution.
pub struct TechnicalGate {
    config: TechnicalGateConfig,
}

impl TechnicalGate {
    pub fn new(config: TechnicalGateConfig) -> Self {
        Self { config }
    }
}

impl ExclusionGate for TechnicalGate {
    fn name(&self) -> &'static str {
        "technical"
    }

    fn assess(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let rsi = stats::rsi(ctx.prices, self.config.rsi_period);

        if rsi > self.config.overbought_rsi {
            GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::TechnicalBreakdown,
                0.3,
                format!(
                    "{}: RSI({}) {:.1} overbought (> {:.0})",
                    ctx.symbol, self.config.rsi_period, rsi, self.config.overbought_rsi
                ),
            )
        } else if rsi < self.config.oversold_rsi {
            GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::TechnicalBreakdown,
                0.3,
                format!(
                    "{}: RSI({}) {:.1} oversold (< {:.0})",
                    ctx.symbol, self.config.rsi_period, rsi, self.config.oversold_rsi
                ),
            )
        } else {
            GateVerdict::clear(ExclusionReason::TechnicalBreakdown)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::data_quality::DataQuality;

    fn ctx<'a>(prices: &'a [f64]) -> GateContext<'a> {
        GateContext {
            symbol: "BTC",
            prices,
            volumes: &[],
            sentiment: &[],
            prediction: None,
            recent_model_failure: false,
            volatility_quality: DataQuality::Measured,
        }
    }

    #[test]
    fn test_relentless_rally_is_overbought() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 + 2.0 * i as f64).collect();
        let verdict = TechnicalGate::new(Default::default()).assess(&ctx(&prices));
        assert!(verdict.should_exclude);
        assert!(verdict.message.contains("overbought"));
    }

    #[test]
    fn test_relentless_selloff_is_oversold() {
        let prices: Vec<f64> = (0..30).map(|i| 100.0 - 2.0 * i as f64).collect();
        let verdict = TechnicalGate::new(Default::default()).assess(&ctx(&prices));
        assert!(verdict.should_exclude);
        assert!(verdict.message.contains("oversold"));
    }

    #[test]
    fn test_short_history_is_neutral() {
        let prices = vec![100.0, 101.0];
        let verdict = TechnicalGate::new(Default::default()).assess(&ctx(&prices));
        assert!(!verdict.should_exclude);
    }
}
