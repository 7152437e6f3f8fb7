//! Audit notes for switch decisions.
//!
//! Every control step produces one verdict per batch row. A [`DecisionNote`]
//! records *which* rule settled it so a run can be logged, replayed, and
//! debugged without re-deriving controller state.

/// Why a switch verdict came out the way it did.
///
/// Notes are small, typed, and stable. Prefer adding new variants over
/// changing existing semantics.
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum DecisionNote {
    /// The switching mechanism is turned off.
    Disabled,

    /// A previous violation is still holding the safety policy.
    ///
    /// `remaining` is the cooldown left *after* this step.
    Cooldown { remaining: u64 },

    /// Training-time switch budget is spent; forecasting is skipped.
    BudgetExhausted { switch_count: u64, budget: u64 },

    /// The probabilistic gate skipped forecasting this step.
    GateSkipped { draw: f64, gate_probability: f64 },

    /// An imagination rollout decided.
    Forecast { total_cost: f32, violated: bool },
}

impl DecisionNote {
    /// Whether a forecast rollout was run for this verdict.
    pub fn forecasted(&self) -> bool {
        matches!(self, DecisionNote::Forecast { .. })
    }

    /// Short stable tag (for metrics names and log lines).
    pub fn tag(&self) -> &'static str {
        match self {
            DecisionNote::Disabled => "disabled",
            DecisionNote::Cooldown { .. } => "cooldown",
            DecisionNote::BudgetExhausted { .. } => "budget_exhausted",
            DecisionNote::GateSkipped { .. } => "gate_skipped",
            DecisionNote::Forecast { .. } => "forecast",
        }
    }
}
