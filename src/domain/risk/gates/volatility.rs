use crate::domain::risk::alerts::AlertLevel;
use crate::domain::risk::gates::{ExclusionGate, ExclusionReason, GateContext, GateVerdict};
use crate::domain::stats;

#[derive(Debug, Clone)]
pub struct VolatilityGateConfig {
    /// Maximum acceptable realized daily volatility.
    pub max_daily_volatility: f64,
    /// Maximum ratio of recent to historical volatility.
    pub max_volatility_spike: f64,
    /// Returns used for the "recent" window of the spike ratio.
    pub recent_window: usize,
    /// Minimum price observations for a measured assessment.
    pub min_observations: usize,
}

impl Default for VolatilityGateConfig {
    fn default() -> Self {
        Self {
            max_daily_volatility: 0.25,
            max_volatility_spike: 3.0,
            recent_window: 7,
            min_observations: 10,
        }
    }
}

/// Excludes assets whose realized volatility is beyond acceptable bounds or
/// whose recent volatility has spiked against its own history.
pub struct VolatilityGate {
    config: VolatilityGateConfig,
}

impl VolatilityGate {
    pub fn new(config: VolatilityGateConfig) -> Self {
        Self { config }
    }
}

impl ExclusionGate for VolatilityGate {
    fn name(&self) -> &'static str {
        "volatility"
    }

    fn assess(&self, ctx: &GateContext<'_>) -> GateVerdict {
        let returns = stats::returns(ctx.prices);
        if returns.len() < self.config.min_observations {
            // Thin history is grounds for caution, not a free pass. The
            // documented fallback stands in as the working estimate until
            // real history accrues (the context is tagged Defaulted).
            let fallback = fallback_annualized_volatility(ctx.symbol);
            return GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::MissingData,
                0.3,
                format!(
                    "{}: only {} return observations, assuming {:.0}% annualized vol",
                    ctx.symbol,
                    returns.len(),
                    fallback * 100.0
                ),
            );
        }

        let realized_vol = stats::std_dev(&returns);
        let recent_start = returns.len().saturating_sub(self.config.recent_window);
        let recent_vol = stats::std_dev(&returns[recent_start..]);
        // Spike baseline deliberately excludes the recent window, otherwise a
        // sustained spike dilutes its own reference.
        let baseline_vol = if recent_start >= 2 {
            stats::std_dev(&returns[..recent_start])
        } else {
            realized_vol
        };

        let mut score = 0.0;
        let mut problems = Vec::new();

        if realized_vol > self.config.max_daily_volatility {
            score += 0.6;
            problems.push(format!(
                "realized daily vol {:.1}% above {:.1}% cap",
                realized_vol * 100.0,
                self.config.max_daily_volatility * 100.0
            ));
        }
        if baseline_vol > f64::EPSILON
            && recent_vol / baseline_vol > self.config.max_volatility_spike
        {
            score += 0.4;
            problems.push(format!(
                "recent vol {:.1}x historical, spike cap {:.1}x",
                recent_vol / baseline_vol,
                self.config.max_volatility_spike
            ));
        }

        if problems.is_empty() {
            GateVerdict::clear(ExclusionReason::ExtremeVolatility)
        } else {
            GateVerdict::exclude(
                AlertLevel::Critical,
                ExclusionReason::ExtremeVolatility,
                score,
                format!("{}: {}", ctx.symbol, problems.join("; ")),
            )
        }
    }
}

/// Annualized volatility fallbacks for symbols with insufficient history.
/// Documented defaults, tagged `DataQuality::Defaulted` by the caller.
pub fn fallback_annualized_volatility(symbol: &str) -> f64 {
    match symbol {
        "BTC" => 0.6,
        "ETH" => 0.8,
        "USDT" | "USDC" | "DAI" | "BUSD" | "TUSD" => 0.05,
        _ => 0.9,
    }
}
