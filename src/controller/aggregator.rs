use chrono::NaiveDate;
use itertools::izip;
use tracing::{debug, warn};
use uuid::Uuid;

use crate::domain::{BatteryModel, MarketStage, Schedule, StageSchedule};
use crate::error::{Error, Result};
use crate::optimizer::SolveStatus;

/// Slack allowed on the combined state of charge (MWh)
pub const SOC_TOLERANCE_MWH: f64 = 1e-6;
/// Slack allowed on combined power and energy limits
const LIMIT_TOLERANCE: f64 = 1e-6;

/// Merges the three stage schedules of a day into one physical schedule
///
/// Combined dispatch is the per-quarter sum of every stage's signed trades.
/// The state of charge is recomputed from the battery's initial state with a
/// single recursion and checked against every physical limit; violations are
/// reported, never clipped.
#[derive(Debug, Clone, Copy)]
pub struct ResultAggregator<'a> {
    battery: &'a BatteryModel,
}

impl<'a> ResultAggregator<'a> {
    pub fn new(battery: &'a BatteryModel) -> Self {
        Self { battery }
    }

    pub fn aggregate(
        &self,
        id: Uuid,
        delivery_day: NaiveDate,
        stages: Vec<StageSchedule>,
    ) -> Result<Schedule> {
        let (horizon, interval_hours) = check_stages(&stages)?;

        let mut net_mw = vec![0.0; horizon];
        for stage in &stages {
            for (net, dispatch) in net_mw.iter_mut().zip(stage.signed_dispatch_mw()) {
                *net += dispatch;
            }
        }
        let charge_mw: Vec<f64> = net_mw.iter().map(|net| net.max(0.0)).collect();
        let discharge_mw: Vec<f64> = net_mw.iter().map(|net| (-net).max(0.0)).collect();

        let soc_mwh = self.combined_soc(&charge_mw, &discharge_mw, interval_hours)?;
        self.check_throughput(&charge_mw, &discharge_mw, interval_hours)?;

        let total_revenue = stages.iter().map(|s| s.objective).sum();
        debug!(%id, total_revenue, "stages aggregated");

        Ok(Schedule {
            id,
            delivery_day,
            status: SolveStatus::Optimal,
            interval_hours,
            charge_mw,
            discharge_mw,
            soc_mwh,
            total_revenue,
            stages,
        })
    }

    fn combined_soc(
        &self,
        charge_mw: &[f64],
        discharge_mw: &[f64],
        interval_hours: f64,
    ) -> Result<Vec<f64>> {
        let battery = self.battery;
        let mut soc = battery.soc_init_mwh();
        let mut trajectory = Vec::with_capacity(charge_mw.len());

        for (quarter, (&cha, &dis)) in izip!(charge_mw, discharge_mw).enumerate() {
            if cha > battery.max_charge_mw() + LIMIT_TOLERANCE {
                return Err(violation(quarter, "max charge power", cha, battery.max_charge_mw()));
            }
            if dis > battery.max_discharge_mw() + LIMIT_TOLERANCE {
                return Err(violation(
                    quarter,
                    "max discharge power",
                    dis,
                    battery.max_discharge_mw(),
                ));
            }

            soc = battery.soc_after(soc, cha, dis, interval_hours);
            if soc < battery.soc_min_mwh() - SOC_TOLERANCE_MWH {
                return Err(violation(quarter, "soc_min", soc, battery.soc_min_mwh()));
            }
            if soc > battery.soc_max_mwh() + SOC_TOLERANCE_MWH {
                return Err(violation(quarter, "soc_max", soc, battery.soc_max_mwh()));
            }
            trajectory.push(soc);
        }
        Ok(trajectory)
    }

    fn check_throughput(
        &self,
        charge_mw: &[f64],
        discharge_mw: &[f64],
        interval_hours: f64,
    ) -> Result<()> {
        let Some(limit) = self.battery.daily_throughput_limit_mwh() else {
            return Ok(());
        };
        let last = charge_mw.len().saturating_sub(1);
        let charged: f64 = charge_mw.iter().map(|c| c * interval_hours).sum();
        let discharged: f64 = discharge_mw.iter().map(|d| d * interval_hours).sum();
        if charged > limit + LIMIT_TOLERANCE {
            return Err(violation(last, "daily charged energy", charged, limit));
        }
        if discharged > limit + LIMIT_TOLERANCE {
            return Err(violation(last, "daily discharged energy", discharged, limit));
        }
        Ok(())
    }
}

fn violation(quarter: usize, bound: &'static str, value: f64, limit: f64) -> Error {
    warn!(quarter, bound, value, limit, "combined schedule is inconsistent");
    Error::Consistency {
        quarter,
        bound,
        value,
        limit,
    }
}

/// Stages must be exactly DAA, IDA, IDC, all optimal, on one grid.
/// Returns the shared horizon and interval length.
fn check_stages(stages: &[StageSchedule]) -> Result<(usize, f64)> {
    let mut expected = Some(MarketStage::first());
    for stage in stages {
        if Some(stage.stage) != expected {
            return Err(Error::StageOrder {
                requested: stage.stage,
                expected,
            });
        }
        expected = stage.stage.next();
    }
    if let Some(missing) = expected {
        return Err(Error::Data(format!(
            "cannot aggregate without the {missing} stage"
        )));
    }

    let Some(first) = stages.first() else {
        return Err(Error::Data("no stage schedules to aggregate".into()));
    };
    let horizon = first.horizon();
    let interval_hours = first.interval_hours;
    for stage in stages {
        if stage.status != SolveStatus::Optimal {
            return Err(Error::Data(format!(
                "{} stage is {}, only optimal stages can be aggregated",
                stage.stage, stage.status
            )));
        }
        let aligned = [stage.discharge_mw.len(), stage.soc_mwh.len(), stage.prices.len()]
            .iter()
            .all(|&len| len == horizon);
        if stage.horizon() != horizon || !aligned {
            return Err(Error::Data(format!(
                "{} stage covers {} quarters, expected {horizon}",
                stage.stage,
                stage.horizon()
            )));
        }
        if (stage.interval_hours - interval_hours).abs() > f64::EPSILON {
            return Err(Error::Data(format!(
                "{} stage uses {} h intervals, expected {interval_hours} h",
                stage.stage, stage.interval_hours
            )));
        }
    }
    Ok((horizon, interval_hours))
}
