use crate::domain::trading::params::StrategyParameters;
use crate::domain::trading::types::{OrderStatus, OrderType, TargetPosition, TradeOrder};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::{FromPrimitive, ToPrimitive};
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, info, warn};

/// Why (or why not) this cycle rebalances.
#[derive(Debug, Clone, PartialEq)]
pub struct RebalanceDecision {
    pub should_rebalance: bool,
    pub is_emergency: bool,
    pub reasons: Vec<String>,
}

/// A cycle's planned orders with the aggregate cost/benefit estimate used
/// by the gate, both as fractions of portfolio value.
#[derive(Debug, Clone, PartialEq)]
pub struct OrderPlan {
    pub orders: Vec<TradeOrder>,
    pub expected_benefit: f64,
    pub expected_cost: f64,
}

impl OrderPlan {
    pub fn empty() -> Self {
        Self {
            orders: Vec::new(),
            expected_benefit: 0.0,
            expected_cost: 0.0,
        }
    }

    /// Trade only when the expected benefit clears costs plus the
    /// configured hurdle.
    pub fn passes_cost_gate(&self, params: &StrategyParameters) -> bool {
        if self.orders.is_empty() {
            return false;
        }
        let hurdle = params.min_expected_benefit_bps / 10_000.0;
        self.expected_benefit >= self.expected_cost + hurdle
    }
}

/// Turns target positions into rebalancing orders.
pub struct OrderPlanner {
    params: StrategyParameters,
}

impl OrderPlanner {
    pub fn new(params: StrategyParameters) -> Self {
        Self { params }
    }

    pub fn set_parameters(&mut self, params: StrategyParameters) {
        self.params = params;
    }

    /// Rebalance when the interval elapsed and some weight drifted past the
    /// threshold, or immediately when drawdown approaches the stop.
    pub fn should_rebalance(
        &self,
        now: DateTime<Utc>,
        last_rebalance: Option<DateTime<Utc>>,
        current_weights: &HashMap<String, f64>,
        targets: &[TargetPosition],
        current_drawdown: f64,
    ) -> RebalanceDecision {
        let emergency_level = 0.8 * self.params.portfolio_drawdown_stop;
        if current_drawdown >= emergency_level {
            return RebalanceDecision {
                should_rebalance: true,
                is_emergency: true,
                reasons: vec![format!(
                    "drawdown {:.1}% at emergency level {:.1}%",
                    current_drawdown * 100.0,
                    emergency_level * 100.0
                )],
            };
        }

        let interval_elapsed = match last_rebalance {
            Some(last) => now - last >= self.params.rebalance_interval(),
            None => true,
        };
        if !interval_elapsed {
            return RebalanceDecision {
                should_rebalance: false,
                is_emergency: false,
                reasons: vec!["rebalance interval not yet elapsed".to_string()],
            };
        }

        let max_drift = targets
            .iter()
            .map(|t| {
                let current = current_weights.get(&t.symbol).copied().unwrap_or(0.0);
                (t.target_weight - current).abs()
            })
            .fold(0.0_f64, f64::max);
        // Abandoned positions drift too.
        let abandoned_drift = current_weights
            .iter()
            .filter(|(symbol, _)| targets.iter().all(|t| &t.symbol != *symbol))
            .map(|(_, w)| w.abs())
            .fold(0.0_f64, f64::max);
        let drift = max_drift.max(abandoned_drift);

        if drift >= self.params.min_rebalance_threshold {
            RebalanceDecision {
                should_rebalance: true,
                is_emergency: false,
                reasons: vec![format!(
                    "max weight drift {:.2}% above {:.2}% threshold",
                    drift * 100.0,
                    self.params.min_rebalance_threshold * 100.0
                )],
            }
        } else {
            RebalanceDecision {
                should_rebalance: false,
                is_emergency: false,
                reasons: vec!["no weight deviation worth trading".to_string()],
            }
        }
    }

    /// Build the orders moving current weights to the targets. Positions
    /// without a target are flattened. Orders are assigned ids by the
    /// caller-supplied generator, in planning order.
    #[allow(clippy::too_many_arguments)]
    pub fn plan_orders(
        &self,
        targets: &[TargetPosition],
        current_weights: &HashMap<String, f64>,
        current_prices: &HashMap<String, Decimal>,
        portfolio_value: Decimal,
        slippage_estimates: &HashMap<String, f64>,
        now: DateTime<Utc>,
        mut next_order_id: impl FnMut() -> String,
    ) -> OrderPlan {
        let pv = portfolio_value.to_f64().unwrap_or(0.0);
        if pv <= 0.0 {
            warn!("cannot plan orders without a positive portfolio value");
            return OrderPlan::empty();
        }

        let mut plan = OrderPlan::empty();
        let fee_fraction = self.params.estimated_trading_fee_bps / 10_000.0;

        let mut entries: Vec<(String, f64, f64, f64)> = Vec::new();
        for target in targets {
            let current = current_weights.get(&target.symbol).copied().unwrap_or(0.0);
            let delta = target.target_weight - current;
            entries.push((
                target.symbol.clone(),
                delta,
                target.expected_return,
                target.confidence,
            ));
        }
        for (symbol, weight) in current_weights {
            if targets.iter().all(|t| &t.symbol != symbol) && weight.abs() > 0.0 {
                // Flatten abandoned positions; no expected benefit attached.
                entries.push((symbol.clone(), -weight, 0.0, 0.0));
            }
        }

        for (symbol, delta, expected_return, confidence) in entries {
            if delta.abs() < self.params.min_rebalance_threshold {
                debug!(symbol = %symbol, delta, "drift below rebalance threshold, skipping");
                continue;
            }
            let Some(price) = current_prices.get(&symbol).copied() else {
                warn!(symbol = %symbol, "no price for planned order, skipping symbol");
                continue;
            };
            if price <= Decimal::ZERO {
                warn!(symbol = %symbol, "non-positive price, skipping symbol");
                continue;
            }

            let slippage = slippage_estimates.get(&symbol).copied().unwrap_or(0.001);
            let notional = delta * pv;
            let quantity = Decimal::from_f64(notional).unwrap_or(Decimal::ZERO) / price;
            if quantity == Decimal::ZERO {
                continue;
            }

            let cost_fraction = delta.abs() * (fee_fraction + slippage);
            plan.expected_cost += cost_fraction;
            plan.expected_benefit += delta.abs() * expected_return.abs() * confidence;

            plan.orders.push(TradeOrder {
                id: next_order_id(),
                symbol: symbol.clone(),
                order_type: if delta > 0.0 {
                    OrderType::MarketBuy
                } else {
                    OrderType::MarketSell
                },
                status: OrderStatus::Pending,
                quantity,
                limit_price: Decimal::ZERO,
                executed_quantity: Decimal::ZERO,
                average_fill_price: Decimal::ZERO,
                created_at: now,
                executed_at: None,
                reason: format!("rebalance to target weight, drift {delta:+.4}"),
                expected_slippage: slippage,
                estimated_cost: Decimal::from_f64(cost_fraction * pv).unwrap_or(Decimal::ZERO),
                is_rebalance: true,
                is_risk_control: false,
            });
        }

        info!(
            orders = plan.orders.len(),
            benefit = plan.expected_benefit,
            cost = plan.expected_cost,
            "order plan built"
        );
        plan
    }

    /// Scale buy-side order quantities down so the hypothetical fill leaves
    /// cash at or above the buffer. Sells raise cash and are never scaled.
    pub fn enforce_cash_buffer(
        &self,
        orders: &mut Vec<TradeOrder>,
        cash: Decimal,
        portfolio_value: Decimal,
        current_prices: &HashMap<String, Decimal>,
    ) {
        let buffer = portfolio_value
            * Decimal::from_f64(self.params.cash_buffer_pct).unwrap_or(Decimal::ZERO);

        let mut net_outflow = Decimal::ZERO;
        let mut buy_outflow = Decimal::ZERO;
        for order in orders.iter() {
            let Some(price) = current_prices.get(&order.symbol) else {
                continue;
            };
            let notional = order.quantity * *price;
            net_outflow += notional + order.estimated_cost;
            if notional > Decimal::ZERO {
                buy_outflow += notional;
            }
        }

        let projected_cash = cash - net_outflow;
        if projected_cash >= buffer || buy_outflow <= Decimal::ZERO {
            return;
        }

        let shortfall = buffer - projected_cash;
        let scale = if shortfall >= buy_outflow {
            Decimal::ZERO
        } else {
            (buy_outflow - shortfall) / buy_outflow
        };
        warn!(
            %shortfall,
            %scale,
            "scaling buy orders to protect the cash buffer"
        );
        orders.retain_mut(|order| {
            if order.quantity > Decimal::ZERO {
                order.quantity *= scale;
                order.estimated_cost *= scale;
                order.quantity != Decimal::ZERO
            } else {
                true
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    fn target(symbol: &str, weight: f64, er: f64, confidence: f64) -> TargetPosition {
        TargetPosition {
            symbol: symbol.to_string(),
            target_weight: weight,
            confidence,
            expected_return: er,
            is_long: weight >= 0.0,
            is_short: weight < 0.0,
            stop_loss_price: 0.0,
            concentration_risk: weight.abs(),
        }
    }

    fn planner() -> OrderPlanner {
        OrderPlanner::new(StrategyParameters::default())
    }

    #[test]
    fn test_rebalance_waits_for_interval() {
        let planner = planner();
        let targets = vec![target("BTC", 0.5, 0.05, 0.8)];
        let weights = HashMap::new();

        let early = planner.should_rebalance(
            now(),
            Some(now() - chrono::Duration::hours(1)),
            &weights,
            &targets,
            0.0,
        );
        assert!(!early.should_rebalance);

        let due = planner.should_rebalance(
            now(),
            Some(now() - chrono::Duration::days(2)),
            &weights,
            &targets,
            0.0,
        );
        assert!(due.should_rebalance);
        assert!(!due.is_emergency);
    }

    #[test]
    fn test_emergency_rebalance_overrides_interval() {
        let planner = planner();
        // Drawdown stop 0.15 -> emergency at 0.12.
        let decision = planner.should_rebalance(
            now(),
            Some(now() - chrono::Duration::minutes(5)),
            &HashMap::new(),
            &[],
            0.125,
        );
        assert!(decision.should_rebalance);
        assert!(decision.is_emergency);
    }

    #[test]
    fn test_small_drift_is_ignored() {
        let planner = planner();
        let targets = vec![target("BTC", 0.51, 0.05, 0.8)];
        let weights: HashMap<String, f64> = [("BTC".to_string(), 0.50)].into();
        let decision = planner.should_rebalance(now(), None, &weights, &targets, 0.0);
        // 1% drift < 2% threshold.
        assert!(!decision.should_rebalance);
    }

    #[test]
    fn test_plan_builds_buy_and_sell_orders() {
        let planner = planner();
        let targets = vec![
            target("BTC", 0.45, 0.05, 0.8),
            target("ADA", -0.45, -0.02, 0.8),
        ];
        let prices: HashMap<String, Decimal> =
            [("BTC".to_string(), dec!(50000)), ("ADA".to_string(), dec!(0.5))].into();
        let mut seq = 0;
        let plan = planner.plan_orders(
            &targets,
            &HashMap::new(),
            &prices,
            dec!(1000000),
            &HashMap::new(),
            now(),
            || {
                seq += 1;
                format!("ord-{seq:03}")
            },
        );

        assert_eq!(plan.orders.len(), 2);
        let btc = plan.orders.iter().find(|o| o.symbol == "BTC").unwrap();
        let ada = plan.orders.iter().find(|o| o.symbol == "ADA").unwrap();
        assert_eq!(btc.order_type, OrderType::MarketBuy);
        assert_eq!(btc.quantity, dec!(9)); // 450k / 50k
        assert_eq!(ada.order_type, OrderType::MarketSell);
        assert!(ada.quantity < Decimal::ZERO);
        assert_eq!(btc.status, OrderStatus::Pending);
        assert!(plan.expected_benefit > 0.0);
    }

    #[test]
    fn test_abandoned_position_is_flattened() {
        let planner = planner();
        let weights: HashMap<String, f64> = [("DOGE".to_string(), 0.2)].into();
        let prices: HashMap<String, Decimal> = [("DOGE".to_string(), dec!(0.1))].into();
        let plan = planner.plan_orders(
            &[],
            &weights,
            &prices,
            dec!(1000000),
            &HashMap::new(),
            now(),
            || "ord-1".to_string(),
        );
        assert_eq!(plan.orders.len(), 1);
        assert_eq!(plan.orders[0].order_type, OrderType::MarketSell);
    }

    #[test]
    fn test_cost_gate_blocks_marginal_trades() {
        let params = StrategyParameters::default();
        let mut plan = OrderPlan::empty();
        assert!(!plan.passes_cost_gate(&params));

        plan.orders.push(TradeOrder {
            id: "x".to_string(),
            symbol: "BTC".to_string(),
            order_type: OrderType::MarketBuy,
            status: OrderStatus::Pending,
            quantity: dec!(1),
            limit_price: Decimal::ZERO,
            executed_quantity: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            created_at: now(),
            executed_at: None,
            reason: String::new(),
            expected_slippage: 0.001,
            estimated_cost: dec!(100),
            is_rebalance: true,
            is_risk_control: false,
        });

        // Benefit below cost + 20bps hurdle: blocked.
        plan.expected_benefit = 0.002;
        plan.expected_cost = 0.001;
        assert!(!plan.passes_cost_gate(&params));

        // Clear benefit: passes.
        plan.expected_benefit = 0.01;
        assert!(plan.passes_cost_gate(&params));
    }

    #[test]
    fn test_cash_buffer_scaling() {
        let planner = planner();
        let prices: HashMap<String, Decimal> = [("BTC".to_string(), dec!(50000))].into();
        let mut orders = vec![TradeOrder {
            id: "x".to_string(),
            symbol: "BTC".to_string(),
            order_type: OrderType::MarketBuy,
            status: OrderStatus::Pending,
            quantity: dec!(4),
            limit_price: Decimal::ZERO,
            executed_quantity: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            created_at: now(),
            executed_at: None,
            reason: String::new(),
            expected_slippage: 0.001,
            estimated_cost: Decimal::ZERO,
            is_rebalance: true,
            is_risk_control: false,
        }];

        // Portfolio 1M, cash 150k, buffer 10% = 100k. The planned 4 BTC
        // (200k) would overdraw; only 50k of buying fits above the buffer.
        planner.enforce_cash_buffer(&mut orders, dec!(150000), dec!(1000000), &prices);
        assert_eq!(orders.len(), 1);
        assert_eq!(orders[0].quantity, dec!(1));
    }
}
