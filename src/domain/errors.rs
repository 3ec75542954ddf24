use thiserror::Error;

/// Domain error kinds for risk and portfolio calculations.
///
/// Limit breaches are deliberately absent: they are alerts (values carried on
/// results), not errors, and never abort a calculation.
#[derive(Debug, Clone, Error)]
pub enum RiskError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Insufficient data: need {required} observations, have {available}")]
    InsufficientData { required: usize, available: usize },

    #[error("Numeric failure in {context}: {reason}")]
    NumericFailure { context: String, reason: String },

    #[error("Calculation timed out: {context} exceeded {budget_ms}ms")]
    Timeout { context: String, budget_ms: u64 },

    #[error("Emergency condition: {0}")]
    Emergency(String),
}

impl RiskError {
    pub fn invalid_input(msg: impl Into<String>) -> Self {
        Self::InvalidInput(msg.into())
    }

    pub fn numeric(context: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::NumericFailure {
            context: context.into(),
            reason: reason.into(),
        }
    }
}

/// Error type for strategy parameter validation.
#[derive(Debug, Error)]
pub enum ParameterError {
    #[error("Invalid StrategyParameters: {}", violations.join("; "))]
    Invalid { violations: Vec<String> },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insufficient_data_formatting() {
        let err = RiskError::InsufficientData {
            required: 100,
            available: 42,
        };
        let msg = err.to_string();
        assert!(msg.contains("100"));
        assert!(msg.contains("42"));
    }

    #[test]
    fn test_parameter_error_joins_violations() {
        let err = ParameterError::Invalid {
            violations: vec!["a".to_string(), "b".to_string()],
        };
        assert!(err.to_string().contains("a; b"));
    }
}
