//! Stage LP/MILP formulation
//!
//! One model per market stage over the delivery-day quarter grid:
//!
//! - `buy[q]`, `sell[q]`: volumes traded on the stage's market (MW)
//! - `cha[q]`, `dis[q]`: physical battery flows (MW), linked to the trades by
//!   `cha - dis = committed_net + buy - sell`
//! - `soc[q]`: state of charge at the end of quarter `q` (MWh)
//! - `u[q]`: flow direction indicator, only with binary exclusivity
//!
//! The objective maximises `sum(price * dt * (sell - buy))` minus a small
//! throughput penalty on traded volume and physical flow.

use good_lp::{
    constraint, variable, variables, Constraint, Expression, ResolutionError, Solution,
    SolverModel, Variable,
};

use crate::domain::BatteryModel;
use crate::optimizer::{CouplingPolicy, Exclusivity, SolverBackend, TerminalSoc};

/// Values below this magnitude are solver noise and reported as zero
const ZERO_TOLERANCE: f64 = 1e-9;

/// Largest flow allowed in both directions within one quarter (MW)
const OVERLAP_TOLERANCE_MW: f64 = 1e-6;

/// Self-contained description of one stage model
///
/// Owns all of its data so the solve can run on a separate thread.
#[derive(Debug, Clone)]
pub struct StageFormulation {
    pub prices: Vec<f64>,
    pub battery: BatteryModel,
    /// Physical net position (charge positive) committed by earlier stages
    pub committed_net_mw: Option<Vec<f64>>,
    pub boundary_soc_mwh: f64,
    pub interval_hours: f64,
    pub coupling: CouplingPolicy,
    pub terminal_soc: TerminalSoc,
    pub exclusivity: Exclusivity,
    pub block_quarters: usize,
    pub throughput_penalty: f64,
}

/// Primal values of a solved stage model
#[derive(Debug, Clone, PartialEq)]
pub struct StageSolution {
    pub buy_mw: Vec<f64>,
    pub sell_mw: Vec<f64>,
    pub soc_mwh: Vec<f64>,
    pub net_position_mw: Vec<f64>,
    pub revenue: f64,
}

struct StageVariables {
    buy: Vec<Variable>,
    sell: Vec<Variable>,
    cha: Vec<Variable>,
    dis: Vec<Variable>,
    soc: Vec<Variable>,
    direction: Option<Vec<Variable>>,
}

impl StageFormulation {
    pub fn horizon(&self) -> usize {
        self.prices.len()
    }

    fn committed(&self, q: usize) -> f64 {
        self.committed_net_mw
            .as_ref()
            .and_then(|c| c.get(q).copied())
            .unwrap_or(0.0)
    }

    /// Build and solve the model with `backend`, blocking until the solver returns
    pub fn solve(&self, backend: SolverBackend) -> Result<StageSolution, ResolutionError> {
        let h = self.horizon();
        let battery = &self.battery;
        let swing = battery.max_charge_mw() + battery.max_discharge_mw();

        let mut vars = variables!();
        let buy = vars.add_vector(variable().min(0.0).max(swing), h);
        let sell = vars.add_vector(variable().min(0.0).max(swing), h);
        let cha = vars.add_vector(variable().min(0.0).max(battery.max_charge_mw()), h);
        let dis = vars.add_vector(variable().min(0.0).max(battery.max_discharge_mw()), h);
        let soc = vars.add_vector(
            variable()
                .min(battery.soc_min_mwh())
                .max(battery.soc_max_mwh()),
            h,
        );
        let direction = match self.exclusivity {
            Exclusivity::Binary => Some(vars.add_vector(variable().binary(), h)),
            Exclusivity::Relaxed => None,
        };
        let handles = StageVariables {
            buy,
            sell,
            cha,
            dis,
            soc,
            direction,
        };

        let objective = self.objective(&handles);
        let constraints = self.constraints(&handles);
        tracing::debug!(
            quarters = h,
            constraints = constraints.len(),
            binary = handles.direction.is_some(),
            "stage model built"
        );

        let problem = vars.maximise(objective);
        match backend {
            #[cfg(feature = "microlp")]
            SolverBackend::Microlp => {
                let model = constraints
                    .into_iter()
                    .fold(problem.using(good_lp::solvers::microlp::microlp), |m, c| {
                        m.with(c)
                    });
                let solution = model.solve()?;
                self.extract(&handles, &solution)
            }
            #[cfg(not(feature = "microlp"))]
            SolverBackend::Microlp => {
                let _ = (problem, constraints);
                Err(ResolutionError::Other("microlp backend is not enabled"))
            }
            #[cfg(feature = "clarabel")]
            SolverBackend::Clarabel => {
                let model = constraints
                    .into_iter()
                    .fold(problem.using(good_lp::solvers::clarabel::clarabel), |m, c| {
                        m.with(c)
                    });
                let solution = model.solve()?;
                self.extract(&handles, &solution)
            }
            #[cfg(not(feature = "clarabel"))]
            SolverBackend::Clarabel => {
                let _ = (problem, constraints);
                Err(ResolutionError::Other("clarabel backend is not enabled"))
            }
        }
    }

    fn objective(&self, v: &StageVariables) -> Expression {
        let dt = self.interval_hours;
        let revenue: Expression = self
            .prices
            .iter()
            .enumerate()
            .map(|(q, price)| price * dt * (v.sell[q] - v.buy[q]))
            .sum();
        // Charging and discharging in the same quarter only burns energy, so
        // physical flows carry the same tie-break cost as trades.
        let penalty: Expression = (0..self.horizon())
            .map(|q| {
                self.throughput_penalty * dt * (v.buy[q] + v.sell[q] + v.cha[q] + v.dis[q])
            })
            .sum();
        revenue - penalty
    }

    fn constraints(&self, v: &StageVariables) -> Vec<Constraint> {
        let h = self.horizon();
        let battery = &self.battery;
        let dt = self.interval_hours;
        let charge_gain = battery.charge_efficiency() * dt;
        let discharge_drain = dt / battery.discharge_efficiency();
        let max_charge = battery.max_charge_mw();
        let max_discharge = battery.max_discharge_mw();

        let mut constraints = Vec::with_capacity(h * 6 + 3);
        for q in 0..h {
            // Physical flow = everything committed so far + this stage's trades
            let committed = self.committed(q);
            constraints.push(constraint!(
                v.cha[q] - v.dis[q] - v.buy[q] + v.sell[q] == committed
            ));

            let previous: Expression = if q == 0 {
                Expression::from(self.boundary_soc_mwh)
            } else {
                Expression::from(v.soc[q - 1])
            };
            constraints.push(constraint!(
                v.soc[q] == previous + charge_gain * v.cha[q] - discharge_drain * v.dis[q]
            ));

            if let Some(u) = &v.direction {
                constraints.push(constraint!(v.cha[q] <= max_charge * u[q]));
                constraints.push(constraint!(v.dis[q] + max_discharge * u[q] <= max_discharge));
            }

            if self.committed_net_mw.is_some() {
                match self.coupling {
                    CouplingPolicy::Equality => {
                        constraints.push(constraint!(v.buy[q] - v.sell[q] == 0.0));
                    }
                    CouplingPolicy::Band { max_deviation_mw } => {
                        constraints.push(constraint!(v.buy[q] - v.sell[q] <= max_deviation_mw));
                        constraints.push(constraint!(v.sell[q] - v.buy[q] <= max_deviation_mw));
                    }
                    CouplingPolicy::Unrestricted => {}
                }
            }

            if self.block_quarters > 1 && q % self.block_quarters != 0 {
                constraints.push(constraint!(v.buy[q] == v.buy[q - 1]));
                constraints.push(constraint!(v.sell[q] == v.sell[q - 1]));
            }
        }

        if let (TerminalSoc::ReturnToInitial, Some(last)) = (self.terminal_soc, v.soc.last()) {
            let target = battery.soc_init_mwh();
            constraints.push(constraint!(*last == target));
        }

        if let Some(limit) = battery.daily_throughput_limit_mwh() {
            let charged: Expression = v.cha.iter().map(|c| dt * *c).sum();
            let discharged: Expression = v.dis.iter().map(|d| dt * *d).sum();
            constraints.push(constraint!(charged <= limit));
            constraints.push(constraint!(discharged <= limit));
        }

        constraints
    }

    /// Read the primal values back; a quarter that both charges and discharges
    /// has no physical meaning and fails the solve.
    fn extract(
        &self,
        v: &StageVariables,
        solution: &impl Solution,
    ) -> Result<StageSolution, ResolutionError> {
        let dt = self.interval_hours;
        let flow = |var: Variable| clean(solution.value(var)).max(0.0);

        let overlapping = v
            .cha
            .iter()
            .zip(&v.dis)
            .position(|(cha, dis)| flow(*cha).min(flow(*dis)) > OVERLAP_TOLERANCE_MW);
        if let Some(q) = overlapping {
            tracing::warn!(quarter = q, "charge and discharge overlap");
            return Err(ResolutionError::Other(
                "charge and discharge overlap in one quarter",
            ));
        }

        let buy_mw: Vec<f64> = v.buy.iter().map(|b| flow(*b)).collect();
        let sell_mw: Vec<f64> = v.sell.iter().map(|s| flow(*s)).collect();
        let soc_mwh: Vec<f64> = v.soc.iter().map(|s| clean(solution.value(*s))).collect();
        let net_position_mw = (0..self.horizon())
            .map(|q| clean(self.committed(q) + buy_mw[q] - sell_mw[q]))
            .collect();
        let revenue = self
            .prices
            .iter()
            .zip(buy_mw.iter().zip(&sell_mw))
            .map(|(price, (buy, sell))| price * dt * (sell - buy))
            .sum();

        Ok(StageSolution {
            buy_mw,
            sell_mw,
            soc_mwh,
            net_position_mw,
            revenue,
        })
    }
}

fn clean(value: f64) -> f64 {
    if value.abs() < ZERO_TOLERANCE {
        0.0
    } else {
        value
    }
}
