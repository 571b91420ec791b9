use std::time::Duration;

use thiserror::Error;

use crate::controller::RunState;
use crate::domain::MarketStage;
use crate::optimizer::SolveStatus;

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Errors produced while building, solving or aggregating a delivery-day schedule
#[derive(Debug, Error)]
pub enum Error {
    #[error("Invalid battery parameter: {0}")]
    Parameter(String),

    #[error("Invalid market data: {0}")]
    Data(String),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("{stage} stage model is infeasible")]
    ModelInfeasible { stage: MarketStage },

    #[error("{stage} stage solver exceeded its time limit of {limit:?}")]
    SolverTimeout { stage: MarketStage, limit: Duration },

    #[error("{stage} stage solver failed: {message}")]
    Solver { stage: MarketStage, message: String },

    #[error(
        "Combined schedule violates {bound} at quarter {quarter}: {value:.6} (limit {limit:.6})"
    )]
    Consistency {
        quarter: usize,
        bound: &'static str,
        value: f64,
        limit: f64,
    },

    #[error("Cannot run the {requested} stage now (next expected: {})", expected_label(.expected))]
    StageOrder {
        requested: MarketStage,
        expected: Option<MarketStage>,
    },

    #[error("Cannot {action} while the run is {state}")]
    InvalidState {
        state: RunState,
        action: &'static str,
    },

    #[error("Worker task failed: {0}")]
    Worker(String),
}

fn expected_label(expected: &Option<MarketStage>) -> String {
    match expected {
        Some(stage) => stage.to_string(),
        None => "none, run is finished".to_string(),
    }
}

impl Error {
    /// Stage the error is attributed to, if it came out of a solve
    pub fn stage(&self) -> Option<MarketStage> {
        match self {
            Error::ModelInfeasible { stage }
            | Error::SolverTimeout { stage, .. }
            | Error::Solver { stage, .. } => Some(*stage),
            _ => None,
        }
    }

    /// Solve status reported for a failed stage
    pub fn status(&self) -> Option<SolveStatus> {
        match self {
            Error::ModelInfeasible { .. } => Some(SolveStatus::Infeasible),
            Error::SolverTimeout { .. } => Some(SolveStatus::SolverTimeout),
            Error::Solver { .. } => Some(SolveStatus::SolverError),
            _ => None,
        }
    }
}

impl From<figment::Error> for Error {
    fn from(error: figment::Error) -> Self {
        Error::Config(error.to_string())
    }
}
