use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::Exclusivity;
use crate::domain::{Commitment, MarketStage, PriceSeries};

/// Result of a stage solve as reported to callers
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolveStatus {
    Optimal,
    Infeasible,
    SolverTimeout,
    SolverError,
}

impl std::fmt::Display for SolveStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SolveStatus::Optimal => write!(f, "optimal"),
            SolveStatus::Infeasible => write!(f, "infeasible"),
            SolveStatus::SolverTimeout => write!(f, "solver_timeout"),
            SolveStatus::SolverError => write!(f, "solver_error"),
        }
    }
}

/// LP/MILP backend used for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SolverBackend {
    /// Simplex with branch-and-bound (pure Rust), supports binary variables
    #[default]
    Microlp,
    /// Interior point (pure Rust), continuous models only
    Clarabel,
}

impl SolverBackend {
    pub fn supports_integers(self) -> bool {
        matches!(self, SolverBackend::Microlp)
    }
}

/// Solver settings handed to every stage call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverConfig {
    pub backend: SolverBackend,
    /// Wall-clock limit for one stage solve
    pub time_limit_seconds: f64,
    pub exclusivity: Exclusivity,
    /// Tie-break cost per traded MWh, not part of the reported revenue
    pub throughput_penalty: f64,
}

impl Default for SolverConfig {
    fn default() -> Self {
        Self {
            backend: SolverBackend::Microlp,
            time_limit_seconds: 5.0,
            exclusivity: Exclusivity::Relaxed,
            throughput_penalty: 1e-3,
        }
    }
}

impl SolverConfig {
    pub fn time_limit(&self) -> Duration {
        Duration::from_secs_f64(self.time_limit_seconds)
    }
}

/// Inputs of a single stage solve
#[derive(Debug, Clone, Copy)]
pub struct StageRequest<'a> {
    pub stage: MarketStage,
    pub prices: &'a PriceSeries,
    /// Position from the preceding stage; `None` only for the day-ahead auction
    pub commitment: Option<&'a Commitment>,
    /// State of charge at the start of the day; any commitment is replayed from it
    pub boundary_soc_mwh: f64,
}
