use std::fmt;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use tracing::{error, info, info_span};
use uuid::Uuid;

use super::ResultAggregator;
use crate::config::EngineConfig;
use crate::domain::{
    BatteryModel, MarketDataProvider, MarketPrices, MarketStage, Schedule, StageSchedule,
};
use crate::error::{Error, Result};
use crate::optimizer::{SolveStatus, StageOptimizer, StageRequest};

/// Lifecycle of one delivery-day run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    /// A stage solve is in progress
    Running(MarketStage),
    /// Every stage up to and including this one solved optimally
    Completed(MarketStage),
    Aggregated,
    Failed {
        stage: MarketStage,
        status: SolveStatus,
    },
    /// All stages solved but the combined schedule broke a physical limit
    Inconsistent,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            RunState::Aggregated | RunState::Failed { .. } | RunState::Inconsistent
        )
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Pending => write!(f, "pending"),
            RunState::Running(stage) => write!(f, "running {stage}"),
            RunState::Completed(stage) => write!(f, "completed through {stage}"),
            RunState::Aggregated => write!(f, "aggregated"),
            RunState::Failed { stage, status } => write!(f, "failed at {stage} ({status})"),
            RunState::Inconsistent => write!(f, "inconsistent"),
        }
    }
}

/// Runs DAA, IDA and IDC in order for one battery and one delivery day
///
/// Each solved stage is frozen into a commitment that binds the next one.
/// Any failed stage ends the run; nothing partial is ever aggregated.
#[derive(Debug)]
pub struct SequentialOrchestrator {
    id: Uuid,
    battery: BatteryModel,
    prices: MarketPrices,
    config: EngineConfig,
    state: RunState,
    stages: Vec<StageSchedule>,
}

impl SequentialOrchestrator {
    /// Validates configuration and prices before anything is solved
    pub fn new(battery: BatteryModel, prices: MarketPrices, config: EngineConfig) -> Result<Self> {
        config.validate()?;
        prices.validate(config.horizon)?;
        for stage in MarketStage::ALL {
            config.validate_prices(stage, prices.for_stage(stage))?;
        }
        Ok(Self {
            id: Uuid::new_v4(),
            battery,
            prices,
            config,
            state: RunState::Pending,
            stages: Vec::with_capacity(MarketStage::ALL.len()),
        })
    }

    /// Fetch the day's prices from `provider`, then build the run
    pub fn from_provider(
        battery: BatteryModel,
        provider: &dyn MarketDataProvider,
        day: NaiveDate,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        let prices = MarketPrices::fetch(provider, day, config.horizon)?;
        Self::new(battery, prices, config)
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn delivery_day(&self) -> NaiveDate {
        self.prices.delivery_day
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Stages solved so far, in market order
    pub fn stages(&self) -> &[StageSchedule] {
        &self.stages
    }

    /// Stage `advance` accepts next, `None` once nothing is left to solve
    pub fn next_stage(&self) -> Option<MarketStage> {
        match self.state {
            RunState::Pending => Some(MarketStage::first()),
            RunState::Completed(stage) => stage.next(),
            _ => None,
        }
    }

    /// Solve a single stage; only the next stage in market order is accepted
    pub fn advance(&mut self, stage: MarketStage) -> Result<&StageSchedule> {
        let expected = self.next_stage();
        if expected != Some(stage) {
            return Err(Error::StageOrder {
                requested: stage,
                expected,
            });
        }

        let span = info_span!("stage", run_id = %self.id, day = %self.prices.delivery_day, %stage);
        let _guard = span.enter();

        // The commitment carries the whole day's physical flow, so every
        // stage replays it from the start-of-day state of charge.
        let commitment = self.stages.last().map(StageSchedule::commitment);
        let boundary_soc_mwh = self.battery.soc_init_mwh();
        let previous = self.state;
        self.state = RunState::Running(stage);

        let outcome = StageOptimizer::new(&self.battery, &self.config).optimize(StageRequest {
            stage,
            prices: self.prices.for_stage(stage),
            commitment: commitment.as_ref(),
            boundary_soc_mwh,
        });

        match outcome {
            Ok(schedule) => {
                info!(objective = schedule.objective, "stage committed");
                let index = self.stages.len();
                self.stages.push(schedule);
                self.state = RunState::Completed(stage);
                Ok(&self.stages[index])
            }
            Err(err) => {
                self.state = match err.status() {
                    Some(status) => {
                        error!(%status, error = %err, "run halted");
                        RunState::Failed { stage, status }
                    }
                    None => previous,
                };
                Err(err)
            }
        }
    }

    /// Aggregate the three solved stages into the day's schedule
    pub fn finish(&mut self) -> Result<Schedule> {
        if self.state != RunState::Completed(MarketStage::Idc) {
            return Err(Error::InvalidState {
                state: self.state,
                action: "aggregate",
            });
        }

        let stages = self.stages.clone();
        match ResultAggregator::new(&self.battery).aggregate(self.id, self.prices.delivery_day, stages) {
            Ok(schedule) => {
                self.state = RunState::Aggregated;
                info!(
                    run_id = %self.id,
                    day = %schedule.delivery_day,
                    total_revenue = schedule.total_revenue,
                    "run aggregated"
                );
                Ok(schedule)
            }
            Err(err) => {
                self.state = RunState::Inconsistent;
                Err(err)
            }
        }
    }

    /// Solve every remaining stage and aggregate
    pub fn run(&mut self) -> Result<Schedule> {
        while let Some(stage) = self.next_stage() {
            self.advance(stage)?;
        }
        self.finish()
    }
}
