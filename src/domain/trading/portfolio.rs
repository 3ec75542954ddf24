use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A held position. Negative quantity is a short.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub symbol: String,
    pub quantity: Decimal,
    pub average_price: Decimal,
}

impl Position {
    pub fn is_short(&self) -> bool {
        self.quantity < Decimal::ZERO
    }

    /// Absolute market value at the given price.
    pub fn notional(&self, price: Decimal) -> Decimal {
        (self.quantity * price).abs()
    }
}

/// Portfolio state owned by the orchestrator. Engines only ever see
/// read-only borrows of this.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Portfolio {
    pub cash: Decimal,
    pub positions: HashMap<String, Position>,
    pub realized_pnl: Decimal,
    /// High-water mark for drawdown tracking.
    pub max_equity: Decimal,
}

impl Portfolio {
    pub fn new(starting_cash: Decimal) -> Self {
        Self {
            cash: starting_cash,
            positions: HashMap::new(),
            realized_pnl: Decimal::ZERO,
            max_equity: starting_cash,
        }
    }

    /// Total equity: cash plus signed position value. Symbols without a
    /// current price fall back to their average price.
    pub fn total_equity(&self, current_prices: &HashMap<String, Decimal>) -> Decimal {
        let mut equity = self.cash;
        for (symbol, position) in &self.positions {
            let price = current_prices
                .get(symbol)
                .copied()
                .unwrap_or(position.average_price);
            equity += position.quantity * price;
        }
        equity
    }

    /// Signed weight of one symbol relative to total equity.
    pub fn position_weight(
        &self,
        symbol: &str,
        current_prices: &HashMap<String, Decimal>,
    ) -> f64 {
        let equity = self.total_equity(current_prices);
        if equity <= Decimal::ZERO {
            return 0.0;
        }
        let Some(position) = self.positions.get(symbol) else {
            return 0.0;
        };
        let price = current_prices
            .get(symbol)
            .copied()
            .unwrap_or(position.average_price);
        ((position.quantity * price) / equity).to_f64().unwrap_or(0.0)
    }

    /// Signed weights for every held symbol.
    pub fn current_weights(&self, current_prices: &HashMap<String, Decimal>) -> HashMap<String, f64> {
        self.positions
            .keys()
            .map(|symbol| (symbol.clone(), self.position_weight(symbol, current_prices)))
            .collect()
    }

    /// Drawdown from the high-water mark as a positive fraction.
    pub fn current_drawdown(&self, current_prices: &HashMap<String, Decimal>) -> f64 {
        if self.max_equity <= Decimal::ZERO {
            return 0.0;
        }
        let equity = self.total_equity(current_prices);
        if equity >= self.max_equity {
            return 0.0;
        }
        ((self.max_equity - equity) / self.max_equity)
            .to_f64()
            .unwrap_or(0.0)
    }

    /// Update the high-water mark after a valuation.
    pub fn mark_equity(&mut self, current_prices: &HashMap<String, Decimal>) {
        let equity = self.total_equity(current_prices);
        if equity > self.max_equity {
            self.max_equity = equity;
        }
    }
}

impl Default for Portfolio {
    fn default() -> Self {
        Self::new(Decimal::ZERO)
    }
}
