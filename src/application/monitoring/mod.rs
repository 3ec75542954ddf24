pub mod correlation_monitor;

use chrono::{DateTime, Utc};

/// Events background monitors push into the orchestrator's command queue.
/// The orchestrator drains them between cycle stages; monitors never touch
/// engine state directly.
#[derive(Debug, Clone, PartialEq)]
pub enum MonitorEvent {
    /// The correlation refresh interval elapsed.
    CorrelationRefreshDue { at: DateTime<Utc> },
    /// The stress-detection interval elapsed.
    StressScanDue { at: DateTime<Utc> },
}

pub use correlation_monitor::{
    CorrelationMonitor, CorrelationMonitorConfig, CorrelationSnapshot, CrossAssetPair,
    MarketRegime, MarketStressSignal, StressSignalKind,
};
