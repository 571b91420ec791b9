use chrono::{Duration, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{MarketStage, PriceSeries};
use crate::optimizer::SolveStatus;

/// Outcome of one market stage
///
/// `charge_mw` / `discharge_mw` are the volumes bought and sold on this stage's
/// market. `soc_mwh` is the stage-local trajectory the stage LP planned with,
/// and `net_position_mw` is the physical net flow (charge positive) once this
/// stage's trades are added to everything committed before it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageSchedule {
    pub stage: MarketStage,
    pub status: SolveStatus,
    pub interval_hours: f64,
    pub prices: PriceSeries,
    pub charge_mw: Vec<f64>,
    pub discharge_mw: Vec<f64>,
    pub soc_mwh: Vec<f64>,
    pub net_position_mw: Vec<f64>,
    pub boundary_soc_mwh: f64,
    /// Market revenue of this stage's trades (currency)
    pub objective: f64,
}

impl StageSchedule {
    pub fn horizon(&self) -> usize {
        self.charge_mw.len()
    }

    pub fn terminal_soc_mwh(&self) -> f64 {
        self.soc_mwh.last().copied().unwrap_or(self.boundary_soc_mwh)
    }

    /// Signed dispatch of this stage, charge positive
    pub fn signed_dispatch_mw(&self) -> impl Iterator<Item = f64> + '_ {
        self.charge_mw
            .iter()
            .zip(&self.discharge_mw)
            .map(|(cha, dis)| cha - dis)
    }

    /// Revenue recomputed from dispatch against this stage's prices
    pub fn replay_revenue(&self) -> f64 {
        self.prices
            .as_slice()
            .iter()
            .zip(self.signed_dispatch_mw())
            .map(|(price, net)| -price * net * self.interval_hours)
            .sum()
    }

    /// Freeze this stage's position as the inbound constraint for the next stage
    pub fn commitment(&self) -> Commitment {
        Commitment {
            stage: self.stage,
            net_position_mw: self.net_position_mw.clone(),
            terminal_soc_mwh: self.terminal_soc_mwh(),
        }
    }
}

/// Position taken through a completed stage
///
/// Built once and only read afterwards; the next stage receives it by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Commitment {
    stage: MarketStage,
    net_position_mw: Vec<f64>,
    terminal_soc_mwh: f64,
}

impl Commitment {
    pub fn new(stage: MarketStage, net_position_mw: Vec<f64>, terminal_soc_mwh: f64) -> Self {
        Self {
            stage,
            net_position_mw,
            terminal_soc_mwh,
        }
    }

    /// Stage that produced the position
    pub fn stage(&self) -> MarketStage {
        self.stage
    }

    pub fn net_position_mw(&self) -> &[f64] {
        &self.net_position_mw
    }

    pub fn terminal_soc_mwh(&self) -> f64 {
        self.terminal_soc_mwh
    }

    pub fn len(&self) -> usize {
        self.net_position_mw.len()
    }

    pub fn is_empty(&self) -> bool {
        self.net_position_mw.is_empty()
    }
}

/// Day-long schedule combining all three stages
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Schedule {
    pub id: Uuid,
    pub delivery_day: NaiveDate,
    pub status: SolveStatus,
    pub interval_hours: f64,
    pub charge_mw: Vec<f64>,
    pub discharge_mw: Vec<f64>,
    pub soc_mwh: Vec<f64>,
    pub total_revenue: f64,
    pub stages: Vec<StageSchedule>,
}

impl Schedule {
    pub fn horizon(&self) -> usize {
        self.charge_mw.len()
    }

    pub fn stage(&self, stage: MarketStage) -> Option<&StageSchedule> {
        self.stages.iter().find(|s| s.stage == stage)
    }

    /// Total revenue recomputed by replaying each stage's dispatch against its prices
    pub fn replayed_revenue(&self) -> f64 {
        self.stages.iter().map(StageSchedule::replay_revenue).sum()
    }

    /// Local start time of `quarter` on the delivery day
    pub fn quarter_start(&self, quarter: usize) -> Option<NaiveDateTime> {
        if quarter >= self.horizon() {
            return None;
        }
        let offset_secs = (quarter as f64 * self.interval_hours * 3600.0).round() as i64;
        self.delivery_day
            .and_hms_opt(0, 0, 0)
            .map(|midnight| midnight + Duration::seconds(offset_secs))
    }
}
