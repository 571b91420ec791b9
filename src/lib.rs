//! Sequential DAA → IDA → IDC schedule optimizer for a battery storage system
//!
//! A delivery day is traded on three markets in closing order. Each stage is
//! solved as an LP (or MILP) against its own price series; the net position it
//! leaves behind binds the next stage. The three stage schedules are finally
//! merged into one physical schedule and re-validated against the battery.
//!
//! ```no_run
//! use bess_market_optimizer::{
//!     BatteryModel, BatteryParams, EngineConfig, MarketPrices, PriceSeries,
//!     SequentialOrchestrator,
//! };
//! use chrono::NaiveDate;
//!
//! # fn main() -> bess_market_optimizer::Result<()> {
//! let battery = BatteryModel::new(BatteryParams {
//!     capacity_mwh: 2.0,
//!     max_charge_mw: 1.0,
//!     max_discharge_mw: 1.0,
//!     charge_efficiency: 0.95,
//!     discharge_efficiency: 0.95,
//!     soc_min_mwh: 0.2,
//!     soc_max_mwh: 1.8,
//!     soc_init_mwh: 1.0,
//!     max_cycles_per_day: Some(1.0),
//! })?;
//! let config = EngineConfig::load("bess.toml")?;
//! let day = NaiveDate::from_ymd_opt(2024, 6, 1).unwrap();
//! let prices = MarketPrices::new(
//!     day,
//!     PriceSeries::flat(40.0, config.horizon)?,
//!     PriceSeries::flat(40.0, config.horizon)?,
//!     PriceSeries::flat(40.0, config.horizon)?,
//! );
//!
//! let schedule = SequentialOrchestrator::new(battery, prices, config)?.run()?;
//! println!("revenue: {:.2}", schedule.total_revenue);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod controller;
pub mod domain;
pub mod error;
pub mod optimizer;
pub mod telemetry;

pub use config::EngineConfig;
pub use controller::{
    optimize_days, optimize_provider_days, DayRequest, ResultAggregator, RunState,
    SequentialOrchestrator,
};
pub use domain::{
    BatteryModel, BatteryParams, Commitment, InMemoryMarketData, MarketDataProvider,
    MarketPrices, MarketStage, PriceSeries, Schedule, StageSchedule,
};
pub use error::{Error, Result};
pub use optimizer::{
    CouplingPolicy, Exclusivity, SolveStatus, SolverBackend, SolverConfig, StageOptimizer,
    StageRequest, TerminalSoc,
};
