use serde::{Deserialize, Serialize};

/// Default cap on position reduction a single automatic cycle may apply.
pub const DEFAULT_MAX_AUTOMATIC_REDUCTION: f64 = 0.20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProtectionActionType {
    ReducePositions,
    IncreaseCash,
    Hedge,
    StopTrading,
    RebalanceConservative,
    ActivateStopLosses,
    NotifyOperators,
}

/// One recommended protective step, ranked by priority (1 = first).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionAction {
    pub action_type: ProtectionActionType,
    /// Intensity of the action in [0, 1] (e.g. fraction of positions to cut).
    pub magnitude: f64,
    pub target_assets: Vec<String>,
    /// Execution window, minutes.
    pub timeframe_minutes: u64,
    pub priority: u8,
    pub requires_confirmation: bool,
    pub description: String,
}

impl ProtectionAction {
    pub fn new(
        action_type: ProtectionActionType,
        magnitude: f64,
        priority: u8,
        description: impl Into<String>,
    ) -> Self {
        Self {
            action_type,
            magnitude: magnitude.clamp(0.0, 1.0),
            target_assets: Vec::new(),
            timeframe_minutes: 15,
            priority,
            requires_confirmation: false,
            description: description.into(),
        }
    }

    pub fn targeting(mut self, assets: Vec<String>) -> Self {
        self.target_assets = assets;
        self
    }

    pub fn within_minutes(mut self, minutes: u64) -> Self {
        self.timeframe_minutes = minutes;
        self
    }
}

/// Actions split into what may execute automatically and what waits for a
/// human. A single cycle may reduce positions by at most the configured cap;
/// anything larger is queued for confirmation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProtectionPlan {
    pub automatic: Vec<ProtectionAction>,
    pub requires_confirmation: Vec<ProtectionAction>,
}

impl ProtectionPlan {
    pub fn is_empty(&self) -> bool {
        self.automatic.is_empty() && self.requires_confirmation.is_empty()
    }

    /// Total automatic position reduction in this plan.
    pub fn automatic_reduction(&self) -> f64 {
        self.automatic
            .iter()
            .filter(|a| a.action_type == ProtectionActionType::ReducePositions)
            .map(|a| a.magnitude)
            .sum()
    }
}

/// Apply the automatic-execution cap to a ranked action list. Reductions are
/// admitted in priority order until the cap is spent; the overflow is queued
/// with `requires_confirmation` set.
pub fn plan_with_reduction_cap(
    mut actions: Vec<ProtectionAction>,
    max_automatic_reduction: f64,
) -> ProtectionPlan {
    actions.sort_by_key(|a| a.priority);

    let mut automatic = Vec::new();
    let mut queued = Vec::new();
    let mut reduction_budget = max_automatic_reduction.max(0.0);

    for mut action in actions {
        if action.action_type != ProtectionActionType::ReducePositions {
            automatic.push(action);
            continue;
        }
        if action.magnitude <= reduction_budget {
            reduction_budget -= action.magnitude;
            automatic.push(action);
        } else if reduction_budget > 1e-9 {
            // Split: the budgeted slice executes now, the rest waits.
            let mut deferred = action.clone();
            deferred.magnitude = action.magnitude - reduction_budget;
            deferred.requires_confirmation = true;
            deferred.description = format!("{} (exceeds automatic cap)", deferred.description);
            action.magnitude = reduction_budget;
            reduction_budget = 0.0;
            automatic.push(action);
            queued.push(deferred);
        } else {
            action.requires_confirmation = true;
            action.description = format!("{} (exceeds automatic cap)", action.description);
            queued.push(action);
        }
    }

    ProtectionPlan {
        automatic,
        requires_confirmation: queued,
    }
}
