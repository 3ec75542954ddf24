use crate::domain::market::types::{estimated_exchange_count, estimated_spread};
use crate::domain::risk::alerts::AlertLevel;
use crate::domain::risk::gates::{ExclusionGate, ExclusionReason, GateContext, GateVerdict};
use crate::domain::stats;

#[derive(Debug, Clone)]
pub struct LiquidityGateConfig {
    /// Minimum average daily volume, USD.
    pub min_daily_volume_usd: f64,
    /// Maximum tolerated bid-ask spread, fraction.
    pub max_bid_ask_spread: f64,
    /// Minimum number of venues the asset must trade on.
    pub min_exchange_count: u32,
}

impl Default for LiquidityGateConfig {
    fn default() -> Self {
        Self {
            min_daily_volume_usd: 100e6,
            max_bid_ask_spread: 0.005,
            min_exchange_count: 3,
        }
    }
}

/// Excludes assets too thin to pair: low volume, wide spreads, or too few
/// venues. Spread and venue count are volume-tier proxies, not measurements.
pub struct LiquidityGate {
    config: LiquidityGateConfig,
}

impl LiquidityGate {
    pub fn new(config: LiquidityGateConfig) -> Self {
        Self { config }
    }
}

impl ExclusionGate for LiquidityGate {
    fn name(&self) -> &'static str {
        "liquidity"
    }

    fn assess(&self, ctx: &GateContext<'_>) -> GateVerdict {
        if ctx.volumes.is_empty() {
            return GateVerdict::exclude(
                AlertLevel::Warning,
                ExclusionReason::MissingData,
                0.3,
                format!("{}: no volume history, excluding until data arrives", ctx.symbol),
            );
        }

        let avg_volume = stats::mean(ctx.volumes);
        let spread = estimated_spread(avg_volume);
        let exchanges = estimated_exchange_count(avg_volume);

        let mut score = 0.0;
        let mut problems = Vec::new();

        if avg_volume < self.config.min_daily_volume_usd {
            score += 0.5;
            problems.push(format!(
                "avg 7d volume ${:.0}M below ${:.0}M floor",
                avg_volume / 1e6,
                self.config.min_daily_volume_usd / 1e6
            ));
        }
        if spread > self.config.max_bid_ask_spread {
            score += 0.3;
            problems.push(format!(
                "estimated spread {:.2}% above {:.2}% cap",
                spread * 100.0,
                self.config.max_bid_ask_spread * 100.0
            ));
        }
        if exchanges < self.config.min_exchange_count {
            score += 0.2;
            problems.push(format!(
                "listed on ~{} venues, need {}",
                exchanges, self.config.min_exchange_count
            ));
        }

        if problems.is_empty() {
            GateVerdict::clear(ExclusionReason::LiquidityCrisis)
        } else {
            let level = if score >= 0.5 {
                AlertLevel::Critical
            } else {
                AlertLevel::Warning
            };
            GateVerdict::exclude(
                level,
                ExclusionReason::LiquidityCrisis,
                score,
                format!("{}: {}", ctx.symbol, problems.join("; ")),
            )
        }
    }
}
