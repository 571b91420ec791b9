use serde::{Deserialize, Serialize};

/// How far a later stage may move the position committed by earlier stages
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum CouplingPolicy {
    /// The committed net position must be reproduced exactly, so the stage cannot trade.
    Equality,
    /// Per quarter, the net position may move at most `max_deviation_mw` from the commitment.
    Band { max_deviation_mw: f64 },
    /// Only the battery's physical limits bound the adjustment.
    Unrestricted,
}

impl Default for CouplingPolicy {
    fn default() -> Self {
        CouplingPolicy::Unrestricted
    }
}

/// Constraint on the state of charge at the end of the horizon
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalSoc {
    /// No terminal constraint
    Free,
    /// End the day at the battery's initial state of charge
    #[default]
    ReturnToInitial,
}

/// Treatment of the "no simultaneous charge and discharge" rule
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Exclusivity {
    /// Continuous LP. Exact as long as burning energy through losses never pays,
    /// i.e. prices stay non-negative.
    #[default]
    Relaxed,
    /// One binary indicator per quarter selects the flow direction (MILP).
    Binary,
}

/// Product granularity of one market stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductRules {
    /// Consecutive quarters traded as one block at a single volume
    pub block_quarters: usize,
}

impl Default for ProductRules {
    fn default() -> Self {
        Self { block_quarters: 1 }
    }
}
