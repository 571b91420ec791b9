//! Day-level control: stage sequencing, aggregation and batch execution

pub mod aggregator;
pub mod batch;
pub mod orchestrator;

pub use aggregator::{ResultAggregator, SOC_TOLERANCE_MWH};
pub use batch::{optimize_days, optimize_provider_days, DayRequest};
pub use orchestrator::{RunState, SequentialOrchestrator};
