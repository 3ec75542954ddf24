use crate::domain::trading::types::{OrderStatus, TradeOrder};
use chrono::{DateTime, Utc};
use rust_decimal::prelude::FromPrimitive;
use rust_decimal::Decimal;
use std::collections::HashMap;
use tracing::{debug, warn};

/// Summary of one batch execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ExecutionSummary {
    pub filled: usize,
    pub rejected: usize,
}

/// Simulated order execution: market orders fill at the current price
/// adjusted by the expected slippage, walking PENDING -> SUBMITTED ->
/// FILLED. Orders without a valid price are REJECTED.
#[derive(Debug, Default)]
pub struct SimulatedExecutor;

impl SimulatedExecutor {
    pub fn new() -> Self {
        Self
    }

    pub fn execute_batch(
        &self,
        orders: &mut [TradeOrder],
        current_prices: &HashMap<String, Decimal>,
        now: DateTime<Utc>,
    ) -> ExecutionSummary {
        let mut summary = ExecutionSummary::default();
        for order in orders.iter_mut() {
            if order.status != OrderStatus::Pending {
                continue;
            }
            order.status = OrderStatus::Submitted;

            let Some(&price) = current_prices.get(&order.symbol) else {
                warn!(order = %order.id, symbol = %order.symbol, "no price, rejecting order");
                order.status = OrderStatus::Rejected;
                summary.rejected += 1;
                continue;
            };
            if price <= Decimal::ZERO {
                order.status = OrderStatus::Rejected;
                summary.rejected += 1;
                continue;
            }

            // Slippage works against the order: buys fill above the quote,
            // sells below it.
            let slip =
                Decimal::from_f64(order.expected_slippage).unwrap_or(Decimal::ZERO);
            let fill_price = if order.is_buy() {
                price * (Decimal::ONE + slip)
            } else {
                price * (Decimal::ONE - slip)
            };

            order.average_fill_price = fill_price;
            order.executed_quantity = order.quantity;
            order.executed_at = Some(now);
            order.status = OrderStatus::Filled;
            summary.filled += 1;
            debug!(
                order = %order.id,
                symbol = %order.symbol,
                %fill_price,
                quantity = %order.quantity,
                "order filled"
            );
        }
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::trading::types::OrderType;
    use chrono::TimeZone;
    use rust_decimal_macros::dec;

    fn order(symbol: &str, quantity: Decimal) -> TradeOrder {
        TradeOrder {
            id: "ord-1".to_string(),
            symbol: symbol.to_string(),
            order_type: if quantity > Decimal::ZERO {
                OrderType::MarketBuy
            } else {
                OrderType::MarketSell
            },
            status: OrderStatus::Pending,
            quantity,
            limit_price: Decimal::ZERO,
            executed_quantity: Decimal::ZERO,
            average_fill_price: Decimal::ZERO,
            created_at: Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap(),
            executed_at: None,
            reason: String::new(),
            expected_slippage: 0.001,
            estimated_cost: Decimal::ZERO,
            is_rebalance: true,
            is_risk_control: false,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 5, 0).unwrap()
    }

    #[test]
    fn test_buy_fills_above_quote() {
        let mut orders = vec![order("BTC", dec!(2))];
        let prices: HashMap<String, Decimal> = [("BTC".to_string(), dec!(50000))].into();

        let summary = SimulatedExecutor::new().execute_batch(&mut orders, &prices, now());
        assert_eq!(summary.filled, 1);
        assert_eq!(orders[0].status, OrderStatus::Filled);
        assert_eq!(orders[0].average_fill_price, dec!(50050));
        assert_eq!(orders[0].executed_quantity, dec!(2));
        assert_eq!(orders[0].executed_at, Some(now()));
    }

    #[test]
    fn test_sell_fills_below_quote() {
        let mut orders = vec![order("BTC", dec!(-2))];
        let prices: HashMap<String, Decimal> = [("BTC".to_string(), dec!(50000))].into();

        SimulatedExecutor::new().execute_batch(&mut orders, &prices, now());
        assert_eq!(orders[0].average_fill_price, dec!(49950));
    }

    #[test]
    fn test_missing_price_rejects() {
        let mut orders = vec![order("GHOST", dec!(1))];
        let summary =
            SimulatedExecutor::new().execute_batch(&mut orders, &HashMap::new(), now());
        assert_eq!(summary.rejected, 1);
        assert_eq!(orders[0].status, OrderStatus::Rejected);
        assert!(orders[0].is_terminal());
    }

    #[test]
    fn test_non_pending_orders_untouched() {
        let mut filled = order("BTC", dec!(1));
        filled.status = OrderStatus::Filled;
        let mut orders = vec![filled.clone()];
        let prices: HashMap<String, Decimal> = [("BTC".to_string(), dec!(50000))].into();
        let summary = SimulatedExecutor::new().execute_batch(&mut orders, &prices, now());
        assert_eq!(summary.filled, 0);
        assert_eq!(orders[0], filled);
    }
}
