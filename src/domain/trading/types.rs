use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// A model prediction for one symbol. Predictions enter the core as typed
/// input; the model itself lives outside.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Prediction {
    pub symbol: String,
    /// Expected return over the prediction horizon.
    pub predicted_return: f64,
    /// Model confidence in [0, 1].
    pub confidence: f64,
    /// Historical model R^2 for this asset.
    pub model_r2: f64,
    /// Annualized volatility forecast.
    pub volatility_forecast: f64,
    pub timestamp: DateTime<Utc>,
}

impl Prediction {
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.predicted_return.is_finite()
            && (0.0..=1.0).contains(&self.confidence)
    }
}

/// A market-neutral long/short pair with its capital allocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradingPair {
    pub long_symbol: String,
    pub short_symbol: String,
    pub long_expected_return: f64,
    pub short_expected_return: f64,
    /// Combined confidence in [0, 1].
    pub pair_confidence: f64,
    /// Fraction of portfolio value allocated to this pair, >= 0.
    pub allocation_weight: f64,
}

impl TradingPair {
    /// Market-neutral expected return of the pair.
    pub fn expected_return(&self) -> f64 {
        self.long_expected_return - self.short_expected_return
    }

    pub fn is_valid(&self) -> bool {
        !self.long_symbol.is_empty()
            && !self.short_symbol.is_empty()
            && self.long_symbol != self.short_symbol
            && (0.0..=1.0).contains(&self.pair_confidence)
            && self.allocation_weight >= 0.0
    }
}

/// Target portfolio weight for one symbol, emitted by the allocator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetPosition {
    pub symbol: String,
    /// Target weight in [-1, 1]; negative is short.
    pub target_weight: f64,
    pub confidence: f64,
    pub expected_return: f64,
    pub is_long: bool,
    pub is_short: bool,
    /// Stop-loss price level for the position.
    pub stop_loss_price: f64,
    /// Share of investable capital concentrated in the originating pair.
    pub concentration_risk: f64,
}

impl TargetPosition {
    pub fn is_valid(&self) -> bool {
        !self.symbol.is_empty()
            && self.target_weight.abs() <= 1.0
            && (0.0..=1.0).contains(&self.confidence)
            && (self.is_long ^ self.is_short)
            && (!self.is_long || self.target_weight >= 0.0)
            && (!self.is_short || self.target_weight <= 0.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderType {
    MarketBuy,
    MarketSell,
    LimitBuy,
    LimitSell,
    StopLoss,
    TakeProfit,
}

impl fmt::Display for OrderType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrderType::MarketBuy => write!(f, "MKT_BUY"),
            OrderType::MarketSell => write!(f, "MKT_SELL"),
            OrderType::LimitBuy => write!(f, "LMT_BUY"),
            OrderType::LimitSell => write!(f, "LMT_SELL"),
            OrderType::StopLoss => write!(f, "STOP_LOSS"),
            OrderType::TakeProfit => write!(f, "TAKE_PROFIT"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Submitted,
    PartiallyFilled,
    Filled,
    Cancelled,
    Rejected,
    Expired,
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// A rebalancing or risk-control order produced by the planner.
///
/// Orders are value types: created fresh each cycle, then consumed by the
/// simulated executor or journaled.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TradeOrder {
    pub id: String,
    pub symbol: String,
    pub order_type: OrderType,
    pub status: OrderStatus,
    /// Positive to buy, negative to sell.
    pub quantity: Decimal,
    /// Limit price; zero for market orders.
    pub limit_price: Decimal,
    pub executed_quantity: Decimal,
    pub average_fill_price: Decimal,
    pub created_at: DateTime<Utc>,
    pub executed_at: Option<DateTime<Utc>>,
    pub reason: String,
    /// Expected execution slippage as a fraction of price.
    pub expected_slippage: f64,
    /// Estimated total transaction cost, USD.
    pub estimated_cost: Decimal,
    pub is_rebalance: bool,
    pub is_risk_control: bool,
}

impl TradeOrder {
    pub fn is_buy(&self) -> bool {
        self.quantity > Decimal::ZERO
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Filled | OrderStatus::Cancelled | OrderStatus::Rejected | OrderStatus::Expired
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 3, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_prediction_validity() {
        let mut p = Prediction {
            symbol: "BTC".to_string(),
            predicted_return: 0.05,
            confidence: 0.8,
            model_r2: 0.4,
            volatility_forecast: 0.6,
            timestamp: ts(),
        };
        assert!(p.is_valid());
        p.confidence = 1.5;
        assert!(!p.is_valid());
        p.confidence = 0.8;
        p.predicted_return = f64::INFINITY;
        assert!(!p.is_valid());
    }

    #[test]
    fn test_pair_rejects_self_pairing() {
        let pair = TradingPair {
            long_symbol: "BTC".to_string(),
            short_symbol: "BTC".to_string(),
            long_expected_return: 0.05,
            short_expected_return: -0.02,
            pair_confidence: 0.7,
            allocation_weight: 0.1,
        };
        assert!(!pair.is_valid());
    }

    #[test]
    fn test_pair_expected_return() {
        let pair = TradingPair {
            long_symbol: "BTC".to_string(),
            short_symbol: "ADA".to_string(),
            long_expected_return: 0.06,
            short_expected_return: -0.02,
            pair_confidence: 0.7,
            allocation_weight: 0.1,
        };
        assert!((pair.expected_return() - 0.08).abs() < 1e-12);
    }

    #[test]
    fn test_target_sign_must_match_side() {
        let target = TargetPosition {
            symbol: "BTC".to_string(),
            target_weight: -0.4,
            confidence: 0.8,
            expected_return: 0.05,
            is_long: true,
            is_short: false,
            stop_loss_price: 40_000.0,
            concentration_risk: 0.4,
        };
        // Long flag with a negative weight is inconsistent.
        assert!(!target.is_valid());
    }

    #[test]
    fn test_order_type_display() {
        assert_eq!(OrderType::MarketBuy.to_string(), "MKT_BUY");
        assert_eq!(OrderType::MarketSell.to_string(), "MKT_SELL");
    }
}
