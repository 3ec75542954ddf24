use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum AlertLevel {
    Info,
    Warning,
    Critical,
    Emergency,
}

impl fmt::Display for AlertLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AlertKind {
    VarLimitBreach,
    CvarDominanceBreach,
    CorrelationSpike,
    CorrelationRiskLimit,
    VolatilityRegimeChange,
    BacktestFailure,
    ConcentrationRisk,
    LiquidityRisk,
    DrawdownStop,
    EmergencyStop,
    CalculationTimeout,
    DataGap,
}

/// A limit breach or risk condition. Alerts are values, not errors: they
/// modulate downstream behavior (block new trades, trigger protection) but
/// never abort a calculation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskAlert {
    pub level: AlertLevel,
    pub kind: AlertKind,
    pub message: String,
    /// Normalized severity in [0, 1].
    pub severity: f64,
    pub affected_assets: Vec<String>,
    pub recommended_actions: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

impl RiskAlert {
    pub fn new(
        level: AlertLevel,
        kind: AlertKind,
        message: impl Into<String>,
        severity: f64,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            level,
            kind,
            message: message.into(),
            severity: severity.clamp(0.0, 1.0),
            affected_assets: Vec::new(),
            recommended_actions: Vec::new(),
            timestamp,
        }
    }

    pub fn with_assets(mut self, assets: Vec<String>) -> Self {
        self.affected_assets = assets;
        self
    }

    pub fn with_actions(mut self, actions: Vec<String>) -> Self {
        self.recommended_actions = actions;
        self
    }

    /// Whether this alert should block new pair formation.
    pub fn blocks_trading(&self) -> bool {
        self.level >= AlertLevel::Critical
    }
}
