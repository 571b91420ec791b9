use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Raw battery parameters as they appear in configuration files
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatteryParams {
    pub capacity_mwh: f64,
    pub max_charge_mw: f64,
    pub max_discharge_mw: f64,
    pub charge_efficiency: f64,
    pub discharge_efficiency: f64,
    pub soc_min_mwh: f64,
    pub soc_max_mwh: f64,
    pub soc_init_mwh: f64,
    /// Full equivalent cycles allowed per delivery day
    #[serde(default)]
    pub max_cycles_per_day: Option<f64>,
}

/// Validated, immutable physical model of the storage asset
///
/// Every stage of a run reads the same model; there is no way to mutate it
/// after [`BatteryModel::new`] has accepted the parameters.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct BatteryModel {
    params: BatteryParams,
}

impl BatteryModel {
    pub fn new(params: BatteryParams) -> Result<Self> {
        let p = &params;
        let values = [
            ("capacity_mwh", p.capacity_mwh),
            ("max_charge_mw", p.max_charge_mw),
            ("max_discharge_mw", p.max_discharge_mw),
            ("charge_efficiency", p.charge_efficiency),
            ("discharge_efficiency", p.discharge_efficiency),
            ("soc_min_mwh", p.soc_min_mwh),
            ("soc_max_mwh", p.soc_max_mwh),
            ("soc_init_mwh", p.soc_init_mwh),
        ];
        if let Some((name, value)) = values.iter().find(|(_, v)| !v.is_finite()) {
            return Err(Error::Parameter(format!("{name} must be finite, got {value}")));
        }

        if p.capacity_mwh <= 0.0 {
            return Err(Error::Parameter(format!(
                "capacity_mwh must be positive, got {}",
                p.capacity_mwh
            )));
        }
        if p.max_charge_mw <= 0.0 || p.max_discharge_mw <= 0.0 {
            return Err(Error::Parameter(format!(
                "power limits must be positive, got charge {} MW / discharge {} MW",
                p.max_charge_mw, p.max_discharge_mw
            )));
        }
        for (name, eta) in [
            ("charge_efficiency", p.charge_efficiency),
            ("discharge_efficiency", p.discharge_efficiency),
        ] {
            if eta <= 0.0 || eta > 1.0 {
                return Err(Error::Parameter(format!(
                    "{name} must be in (0, 1], got {eta}"
                )));
            }
        }
        if p.soc_min_mwh < 0.0 {
            return Err(Error::Parameter(format!(
                "soc_min_mwh must not be negative, got {}",
                p.soc_min_mwh
            )));
        }
        if p.soc_min_mwh > p.soc_max_mwh {
            return Err(Error::Parameter(format!(
                "soc_min_mwh ({}) exceeds soc_max_mwh ({})",
                p.soc_min_mwh, p.soc_max_mwh
            )));
        }
        if p.soc_max_mwh > p.capacity_mwh {
            return Err(Error::Parameter(format!(
                "soc_max_mwh ({}) exceeds capacity_mwh ({})",
                p.soc_max_mwh, p.capacity_mwh
            )));
        }
        if p.soc_init_mwh < p.soc_min_mwh || p.soc_init_mwh > p.soc_max_mwh {
            return Err(Error::Parameter(format!(
                "soc_init_mwh ({}) outside [{}, {}]",
                p.soc_init_mwh, p.soc_min_mwh, p.soc_max_mwh
            )));
        }
        if let Some(cycles) = p.max_cycles_per_day {
            if !cycles.is_finite() || cycles <= 0.0 {
                return Err(Error::Parameter(format!(
                    "max_cycles_per_day must be positive, got {cycles}"
                )));
            }
        }

        Ok(Self { params })
    }

    pub fn params(&self) -> &BatteryParams {
        &self.params
    }

    pub fn capacity_mwh(&self) -> f64 {
        self.params.capacity_mwh
    }

    pub fn max_charge_mw(&self) -> f64 {
        self.params.max_charge_mw
    }

    pub fn max_discharge_mw(&self) -> f64 {
        self.params.max_discharge_mw
    }

    pub fn charge_efficiency(&self) -> f64 {
        self.params.charge_efficiency
    }

    pub fn discharge_efficiency(&self) -> f64 {
        self.params.discharge_efficiency
    }

    pub fn soc_min_mwh(&self) -> f64 {
        self.params.soc_min_mwh
    }

    pub fn soc_max_mwh(&self) -> f64 {
        self.params.soc_max_mwh
    }

    pub fn soc_init_mwh(&self) -> f64 {
        self.params.soc_init_mwh
    }

    pub fn max_cycles_per_day(&self) -> Option<f64> {
        self.params.max_cycles_per_day
    }

    /// Daily energy budget per direction implied by the cycle limit
    pub fn daily_throughput_limit_mwh(&self) -> Option<f64> {
        self.params
            .max_cycles_per_day
            .map(|cycles| cycles * self.params.capacity_mwh)
    }

    /// State of charge after one interval of charging `cha_mw` and discharging `dis_mw`
    pub fn soc_after(&self, soc_mwh: f64, cha_mw: f64, dis_mw: f64, interval_hours: f64) -> f64 {
        soc_mwh + self.params.charge_efficiency * cha_mw * interval_hours
            - dis_mw * interval_hours / self.params.discharge_efficiency
    }
}

impl TryFrom<BatteryParams> for BatteryModel {
    type Error = Error;

    fn try_from(params: BatteryParams) -> Result<Self> {
        Self::new(params)
    }
}

impl<'de> Deserialize<'de> for BatteryModel {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let params = BatteryParams::deserialize(deserializer)?;
        Self::new(params).map_err(serde::de::Error::custom)
    }
}
