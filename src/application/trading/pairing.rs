use crate::domain::trading::params::StrategyParameters;
use crate::domain::trading::types::{Prediction, TargetPosition, TradingPair};
use std::collections::HashMap;
use tracing::{debug, info};

/// Average pair confidence at or above which capital concentrates into the
/// top pairs. The boundary is inclusive.
pub const CONCENTRATION_CONFIDENCE: f64 = 0.80;
/// Investable share each of the top two pairs receives when concentrating.
const CONCENTRATED_TOP_SHARE: f64 = 0.40;

/// Ranks predictions, forms market-neutral pairs and allocates capital.
///
/// Every step is deterministic: ties on predicted return break on
/// confidence, then on the symbol itself, so identical inputs always
/// produce identical pairs.
pub struct PairingEngine {
    params: StrategyParameters,
}

impl PairingEngine {
    pub fn new(params: StrategyParameters) -> Self {
        Self { params }
    }

    pub fn set_parameters(&mut self, params: StrategyParameters) {
        self.params = params;
    }

    /// Drop invalid or under-confident predictions and rank the rest:
    /// return descending, then confidence descending, then symbol.
    pub fn rank_predictions(&self, predictions: &[Prediction]) -> Vec<Prediction> {
        let mut ranked: Vec<Prediction> = predictions
            .iter()
            .filter(|p| p.is_valid() && p.confidence >= self.params.min_confidence_threshold)
            .cloned()
            .collect();
        ranked.sort_by(|a, b| {
            b.predicted_return
                .partial_cmp(&a.predicted_return)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(
                    b.confidence
                        .partial_cmp(&a.confidence)
                        .unwrap_or(std::cmp::Ordering::Equal),
                )
                .then_with(|| a.symbol.cmp(&b.symbol))
        });
        ranked
    }

    /// Pair the best-ranked prediction with the worst, the second best with
    /// the second worst, and so on, up to the configured pair budget.
    pub fn create_pairs(&self, ranked: &[Prediction]) -> Vec<TradingPair> {
        let n = ranked.len();
        let pair_count = self.params.max_pairs_to_create.min(n / 2);

        let mut pairs = Vec::with_capacity(pair_count);
        for i in 0..pair_count {
            let long = &ranked[i];
            let short = &ranked[n - 1 - i];
            let pair = TradingPair {
                long_symbol: long.symbol.clone(),
                short_symbol: short.symbol.clone(),
                long_expected_return: long.predicted_return,
                short_expected_return: short.predicted_return,
                pair_confidence: (long.confidence + short.confidence) / 2.0,
                allocation_weight: 0.0,
            };
            if pair.is_valid() {
                pairs.push(pair);
            } else {
                debug!(
                    long = %long.symbol,
                    short = %short.symbol,
                    "skipping degenerate pair"
                );
            }
        }
        pairs
    }

    /// Allocate the investable fraction across pairs.
    ///
    /// High average confidence (>= 0.80, boundary inclusive) concentrates
    /// capital: the top two pairs take 40% of the investable fraction each
    /// and the remainder splits across the rest. Otherwise pairs weight
    /// equally, capped per pair when two or more compete; a lone pair
    /// deploys the full investable fraction (the cap diversifies between
    /// pairs and has nothing to bind against with one).
    pub fn allocate_capital(&self, mut pairs: Vec<TradingPair>) -> Vec<TradingPair> {
        if pairs.is_empty() {
            return pairs;
        }
        let investable = self.params.total_investment_ratio;
        let n = pairs.len();
        let avg_confidence =
            pairs.iter().map(|p| p.pair_confidence).sum::<f64>() / n as f64;

        if avg_confidence >= CONCENTRATION_CONFIDENCE {
            match n {
                1 => pairs[0].allocation_weight = investable,
                2 => {
                    pairs[0].allocation_weight = investable / 2.0;
                    pairs[1].allocation_weight = investable / 2.0;
                }
                _ => {
                    let rest_share =
                        investable * (1.0 - 2.0 * CONCENTRATED_TOP_SHARE) / (n - 2) as f64;
                    for (i, pair) in pairs.iter_mut().enumerate() {
                        pair.allocation_weight = if i < 2 {
                            investable * CONCENTRATED_TOP_SHARE
                        } else {
                            rest_share
                        };
                    }
                }
            }
            info!(
                pairs = n,
                avg_confidence, "confidence tiering: concentrated allocation"
            );
        } else {
            let equal_share = investable / n as f64;
            let share = if n >= 2 {
                equal_share.min(self.params.max_single_pair_allocation)
            } else {
                equal_share
            };
            for pair in &mut pairs {
                pair.allocation_weight = share;
            }
        }
        pairs
    }

    /// Emit the two target positions for each allocated pair. Stop-losses
    /// sit half the drawdown stop away from the current price, on the
    /// losing side. Leverage is fixed at 1.0.
    pub fn to_targets(
        &self,
        pairs: &[TradingPair],
        current_prices: &HashMap<String, f64>,
    ) -> Vec<TargetPosition> {
        let stop_fraction = 0.5 * self.params.portfolio_drawdown_stop;
        let investable = self.params.total_investment_ratio.max(f64::EPSILON);

        let mut targets = Vec::with_capacity(pairs.len() * 2);
        for pair in pairs {
            let w = pair.allocation_weight;
            if w <= 0.0 {
                continue;
            }
            let concentration = (w / investable).clamp(0.0, 1.0);

            let long_price = current_prices.get(&pair.long_symbol).copied().unwrap_or(0.0);
            targets.push(TargetPosition {
                symbol: pair.long_symbol.clone(),
                target_weight: w,
                confidence: pair.pair_confidence,
                expected_return: pair.long_expected_return,
                is_long: true,
                is_short: false,
                stop_loss_price: long_price * (1.0 - stop_fraction),
                concentration_risk: concentration,
            });

            let short_price = current_prices
                .get(&pair.short_symbol)
                .copied()
                .unwrap_or(0.0);
            targets.push(TargetPosition {
                symbol: pair.short_symbol.clone(),
                target_weight: -w,
                confidence: pair.pair_confidence,
                expected_return: pair.short_expected_return,
                is_long: false,
                is_short: true,
                stop_loss_price: short_price * (1.0 + stop_fraction),
                concentration_risk: concentration,
            });
        }
        targets
    }

    /// The full pipeline: rank, pair, allocate, convert.
    pub fn build_targets(
        &self,
        predictions: &[Prediction],
        current_prices: &HashMap<String, f64>,
    ) -> (Vec<TradingPair>, Vec<TargetPosition>) {
        let ranked = self.rank_predictions(predictions);
        let pairs = self.allocate_capital(self.create_pairs(&ranked));
        let targets = self.to_targets(&pairs, current_prices);
        (pairs, targets)
    }
}
