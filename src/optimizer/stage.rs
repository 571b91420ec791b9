use std::sync::mpsc::{self, RecvTimeoutError};
use std::thread;
use std::time::Instant;

use good_lp::ResolutionError;
use tracing::{info, warn};

use super::{SolveStatus, SolverConfig, StageFormulation, StageRequest, StageSolution};
use crate::config::EngineConfig;
use crate::domain::{BatteryModel, MarketStage, StageSchedule};
use crate::error::{Error, Result};

/// Builds and solves the model of a single market stage
///
/// Holds only borrowed, read-only inputs, so any number of optimizers can
/// share one battery model and configuration.
#[derive(Debug, Clone, Copy)]
pub struct StageOptimizer<'a> {
    battery: &'a BatteryModel,
    config: &'a EngineConfig,
}

impl<'a> StageOptimizer<'a> {
    pub fn new(battery: &'a BatteryModel, config: &'a EngineConfig) -> Self {
        Self { battery, config }
    }

    /// Solve one stage
    ///
    /// Returns a schedule only when the solver proves optimality; every other
    /// outcome is an error carrying the stage and its [`SolveStatus`].
    pub fn optimize(&self, request: StageRequest<'_>) -> Result<StageSchedule> {
        let stage = request.stage;
        check_stage_order(&request)?;
        self.check_inputs(&request)?;

        let rules = self.config.products.for_stage(stage);
        let formulation = StageFormulation {
            prices: request.prices.as_slice().to_vec(),
            battery: self.battery.clone(),
            committed_net_mw: request.commitment.map(|c| c.net_position_mw().to_vec()),
            boundary_soc_mwh: request.boundary_soc_mwh,
            interval_hours: self.config.interval_hours,
            coupling: self.config.coupling,
            terminal_soc: self.config.terminal_soc,
            exclusivity: self.config.solver.exclusivity,
            block_quarters: rules.block_quarters,
            throughput_penalty: self.config.solver.throughput_penalty,
        };

        info!(
            %stage,
            quarters = formulation.horizon(),
            boundary_soc_mwh = request.boundary_soc_mwh,
            backend = ?self.config.solver.backend,
            "solving stage"
        );
        let started = Instant::now();
        let solution = match solve_with_time_limit(stage, formulation, &self.config.solver) {
            Ok(solution) => solution,
            Err(err) => {
                warn!(%stage, error = %err, elapsed_ms = started.elapsed().as_millis() as u64, "stage solve failed");
                return Err(err);
            }
        };
        info!(
            %stage,
            revenue = solution.revenue,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "stage solved"
        );

        Ok(StageSchedule {
            stage,
            status: SolveStatus::Optimal,
            interval_hours: self.config.interval_hours,
            prices: request.prices.clone(),
            charge_mw: solution.buy_mw,
            discharge_mw: solution.sell_mw,
            soc_mwh: solution.soc_mwh,
            net_position_mw: solution.net_position_mw,
            boundary_soc_mwh: request.boundary_soc_mwh,
            objective: solution.revenue,
        })
    }

    fn check_inputs(&self, request: &StageRequest<'_>) -> Result<()> {
        let horizon = self.config.horizon;
        request
            .prices
            .ensure_horizon(horizon)
            .map_err(|e| Error::Data(format!("{} prices: {e}", request.stage)))?;
        self.config.validate_prices(request.stage, request.prices)?;
        if let Some(commitment) = request.commitment {
            if commitment.len() != horizon {
                return Err(Error::Data(format!(
                    "commitment from {} covers {} quarters, horizon is {horizon}",
                    commitment.stage(),
                    commitment.len()
                )));
            }
        }
        if !request.boundary_soc_mwh.is_finite() {
            return Err(Error::Data(format!(
                "boundary state of charge must be finite, got {}",
                request.boundary_soc_mwh
            )));
        }
        Ok(())
    }
}

/// A stage may only consume the commitment of the stage directly before it;
/// the day-ahead auction takes none.
fn check_stage_order(request: &StageRequest<'_>) -> Result<()> {
    let stage = request.stage;
    match (stage.previous(), request.commitment) {
        (None, None) => Ok(()),
        (Some(_), None) => Err(Error::StageOrder {
            requested: stage,
            expected: Some(MarketStage::first()),
        }),
        (previous, Some(commitment)) if previous != Some(commitment.stage()) => {
            Err(Error::StageOrder {
                requested: stage,
                expected: commitment.stage().next(),
            })
        }
        _ => Ok(()),
    }
}

/// Run the solver on its own thread and wait at most the configured time
///
/// A timed-out solve is abandoned: its thread finishes in the background and
/// the result is dropped.
fn solve_with_time_limit(
    stage: MarketStage,
    formulation: StageFormulation,
    solver: &SolverConfig,
) -> Result<StageSolution> {
    let limit = solver.time_limit();
    let backend = solver.backend;
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name(format!("{stage}-solver"))
        .spawn(move || {
            let outcome = formulation.solve(backend);
            // The receiver is gone if the caller already timed out.
            let _ = tx.send(outcome);
        })
        .map_err(|e| Error::Solver {
            stage,
            message: format!("failed to start solver thread: {e}"),
        })?;

    match rx.recv_timeout(limit) {
        Ok(Ok(solution)) => Ok(solution),
        Ok(Err(ResolutionError::Infeasible)) => Err(Error::ModelInfeasible { stage }),
        Ok(Err(e)) => Err(Error::Solver {
            stage,
            message: e.to_string(),
        }),
        Err(RecvTimeoutError::Timeout) => Err(Error::SolverTimeout { stage, limit }),
        Err(RecvTimeoutError::Disconnected) => Err(Error::Solver {
            stage,
            message: "solver thread terminated without a result".to_string(),
        }),
    }
}
