pub mod detection;
pub mod engine;
pub mod protection;
pub mod scenarios;

pub use detection::{StressDetectionConfig, StressDetectionResult, StressDetector};
pub use engine::{StressEngine, StressResult};
pub use protection::{ProtectionAction, ProtectionActionType, ProtectionPlan};
pub use scenarios::{
    AssetClass, CustomScenario, ScenarioCalibration, StressHorizon, StressScenario,
    StressSeverity,
};
