use crate::domain::errors::ParameterError;
use serde::{Deserialize, Serialize};

/// Runtime strategy configuration. Every setter path validates before the
/// engine accepts a new set; invalid parameters are rejected wholesale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StrategyParameters {
    /// Upper bound on pairs formed per cycle, 1..=50.
    pub max_pairs_to_create: usize,
    /// Fraction of portfolio value deployed, (0.5, 0.95].
    pub total_investment_ratio: f64,
    /// Floor on cash as a fraction of portfolio value, [0.05, 0.30]. Never breached.
    pub cash_buffer_pct: f64,
    /// Predictions below this confidence are dropped, [0, 1].
    pub min_confidence_threshold: f64,
    /// Per-pair allocation cap, (0, 0.5].
    pub max_single_pair_allocation: f64,
    /// Weight deviations below this are not worth trading.
    pub min_rebalance_threshold: f64,
    /// Estimated round-trip trading fee, basis points.
    pub estimated_trading_fee_bps: f64,
    /// Minimum expected benefit over costs required to trade, basis points.
    pub min_expected_benefit_bps: f64,
    /// Drawdown fraction triggering the emergency stop, (0, 0.5].
    pub portfolio_drawdown_stop: f64,
    /// Minimum wall time between rebalances, minutes.
    pub rebalance_interval_minutes: i64,
}

impl Default for StrategyParameters {
    fn default() -> Self {
        Self {
            max_pairs_to_create: 20,
            total_investment_ratio: 0.90,
            cash_buffer_pct: 0.10,
            min_confidence_threshold: 0.30,
            max_single_pair_allocation: 0.15,
            min_rebalance_threshold: 0.02,
            estimated_trading_fee_bps: 10.0,
            min_expected_benefit_bps: 20.0,
            portfolio_drawdown_stop: 0.15,
            rebalance_interval_minutes: 1440,
        }
    }
}

impl StrategyParameters {
    /// Conservative TRS preset: 85% invested, 15% buffer, 12% pair cap.
    pub fn trs_conservative() -> Self {
        Self {
            total_investment_ratio: 0.85,
            cash_buffer_pct: 0.15,
            max_single_pair_allocation: 0.12,
            ..Self::default()
        }
    }

    pub fn rebalance_interval(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.rebalance_interval_minutes)
    }

    pub fn validate(&self) -> Result<(), ParameterError> {
        let violations = self.violations();
        if violations.is_empty() {
            Ok(())
        } else {
            Err(ParameterError::Invalid { violations })
        }
    }

    /// All violated constraints, so the caller sees every problem at once.
    pub fn violations(&self) -> Vec<String> {
        let mut errors = Vec::new();

        if self.max_pairs_to_create == 0 || self.max_pairs_to_create > 50 {
            errors.push("max_pairs_to_create must be between 1 and 50".to_string());
        }
        if self.total_investment_ratio <= 0.5 || self.total_investment_ratio > 0.95 {
            errors.push("total_investment_ratio must be in (0.5, 0.95]".to_string());
        }
        if !(0.05..=0.30).contains(&self.cash_buffer_pct) {
            errors.push("cash_buffer_pct must be in [0.05, 0.30]".to_string());
        }
        if !(0.0..=1.0).contains(&self.min_confidence_threshold) {
            errors.push("min_confidence_threshold must be in [0, 1]".to_string());
        }
        if self.max_single_pair_allocation <= 0.0 || self.max_single_pair_allocation > 0.5 {
            errors.push("max_single_pair_allocation must be in (0, 0.5]".to_string());
        }
        if self.min_rebalance_threshold < 0.0 {
            errors.push("min_rebalance_threshold must be non-negative".to_string());
        }
        if !(0.0..=100.0).contains(&self.estimated_trading_fee_bps) {
            errors.push("estimated_trading_fee_bps must be in [0, 100]".to_string());
        }
        if !(0.0..=1000.0).contains(&self.min_expected_benefit_bps) {
            errors.push("min_expected_benefit_bps must be in [0, 1000]".to_string());
        }
        if self.portfolio_drawdown_stop <= 0.0 || self.portfolio_drawdown_stop > 0.5 {
            errors.push("portfolio_drawdown_stop must be in (0, 0.5]".to_string());
        }
        if self.rebalance_interval_minutes <= 0 {
            errors.push("rebalance_interval_minutes must be positive".to_string());
        }
        if ((self.total_investment_ratio + self.cash_buffer_pct) - 1.0).abs() > 0.05 {
            errors.push(
                "total_investment_ratio + cash_buffer_pct must sum to approximately 1.0"
                    .to_string(),
            );
        }

        errors
    }
}

/// Conservative risk limits the system must respect, shipped as configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrsRiskParameters {
    /// Maximum acceptable daily VaR at 95% confidence.
    pub max_daily_var95: f64,
    /// Maximum acceptable daily VaR at 99% confidence.
    pub max_daily_var99: f64,
    /// Maximum acceptable weekly VaR at 95% confidence.
    pub max_weekly_var95: f64,
    /// Maximum acceptable monthly VaR at 95% confidence.
    pub max_monthly_var95: f64,
    /// Fraction of a limit at which an early-warning alert fires.
    pub var_breach_warning_ratio: f64,
    /// CVaR should not exceed this multiple of VaR.
    pub cvar_limit_multiple: f64,
    /// Maximum tolerated correlation-risk score.
    pub correlation_risk_limit: f64,
    /// Soft budget for one VaR calculation, milliseconds.
    pub max_calculation_time_ms: u64,
    /// Minimum acceptable backtest accuracy.
    pub min_backtest_accuracy: f64,
}

impl Default for TrsRiskParameters {
    fn default() -> Self {
        Self {
            max_daily_var95: 0.025,
            max_daily_var99: 0.035,
            max_weekly_var95: 0.055,
            max_monthly_var95: 0.12,
            var_breach_warning_ratio: 0.8,
            cvar_limit_multiple: 1.3,
            correlation_risk_limit: 0.4,
            max_calculation_time_ms: 100,
            min_backtest_accuracy: 0.90,
        }
    }
}
