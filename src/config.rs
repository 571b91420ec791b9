use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::domain::{MarketStage, PriceSeries};
use crate::error::{Error, Result};
use crate::optimizer::{
    CouplingPolicy, Exclusivity, ProductRules, SolverBackend, SolverConfig, TerminalSoc,
};

/// Environment variables with this prefix override file settings, `__` separating
/// nested keys (e.g. `BESS__SOLVER__TIME_LIMIT_SECONDS=10`).
pub const ENV_PREFIX: &str = "BESS__";

/// Engine configuration, passed explicitly to every run and stage
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Number of quarters in the delivery day
    pub horizon: usize,
    /// Length of one quarter in hours
    pub interval_hours: f64,
    pub solver: SolverConfig,
    pub coupling: CouplingPolicy,
    pub terminal_soc: TerminalSoc,
    pub products: StageProducts,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            horizon: 96,
            interval_hours: 0.25,
            solver: SolverConfig::default(),
            coupling: CouplingPolicy::default(),
            terminal_soc: TerminalSoc::default(),
            products: StageProducts::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageProducts {
    pub daa: ProductRules,
    pub ida: ProductRules,
    pub idc: ProductRules,
}

impl StageProducts {
    pub fn for_stage(&self, stage: MarketStage) -> ProductRules {
        match stage {
            MarketStage::Daa => self.daa,
            MarketStage::Ida => self.ida,
            MarketStage::Idc => self.idc,
        }
    }
}

impl EngineConfig {
    /// Defaults, overlaid with `path` (if it exists) and `BESS__*` environment variables
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let cfg: Self = figment.extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn from_toml_str(toml: &str) -> Result<Self> {
        let cfg: Self = Figment::from(Serialized::defaults(Self::default()))
            .merge(Toml::string(toml))
            .extract()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<()> {
        if self.horizon == 0 {
            return Err(Error::Config("horizon must be at least one quarter".into()));
        }
        if !self.interval_hours.is_finite() || self.interval_hours <= 0.0 {
            return Err(Error::Config(format!(
                "interval_hours must be positive, got {}",
                self.interval_hours
            )));
        }

        let solver = &self.solver;
        if !solver.time_limit_seconds.is_finite() || solver.time_limit_seconds <= 0.0 {
            return Err(Error::Config(format!(
                "solver.time_limit_seconds must be positive, got {}",
                solver.time_limit_seconds
            )));
        }
        if !solver.throughput_penalty.is_finite() || solver.throughput_penalty < 0.0 {
            return Err(Error::Config(format!(
                "solver.throughput_penalty must not be negative, got {}",
                solver.throughput_penalty
            )));
        }
        if solver.exclusivity == Exclusivity::Binary && !solver.backend.supports_integers() {
            return Err(Error::Config(format!(
                "binary exclusivity needs an integer-capable backend, {:?} is continuous only",
                solver.backend
            )));
        }
        let compiled = match solver.backend {
            SolverBackend::Microlp => cfg!(feature = "microlp"),
            SolverBackend::Clarabel => cfg!(feature = "clarabel"),
        };
        if !compiled {
            return Err(Error::Config(format!(
                "solver backend {:?} is not enabled in this build",
                solver.backend
            )));
        }

        if let CouplingPolicy::Band { max_deviation_mw } = self.coupling {
            if !max_deviation_mw.is_finite() || max_deviation_mw < 0.0 {
                return Err(Error::Config(format!(
                    "coupling band must be a non-negative number, got {max_deviation_mw}"
                )));
            }
        }

        for stage in MarketStage::ALL {
            let block = self.products.for_stage(stage).block_quarters;
            if block == 0 {
                return Err(Error::Config(format!(
                    "{stage} block_quarters must be at least 1"
                )));
            }
            if self.horizon % block != 0 {
                return Err(Error::Config(format!(
                    "{stage} block of {block} quarters does not divide the horizon of {}",
                    self.horizon
                )));
            }
        }
        Ok(())
    }

    /// Relaxed exclusivity lets a model charge and discharge in the same
    /// quarter, which pays off as soon as buying earns money. Negative prices
    /// therefore need binary exclusivity.
    pub fn validate_prices(&self, stage: MarketStage, prices: &PriceSeries) -> Result<()> {
        if self.solver.exclusivity != Exclusivity::Relaxed {
            return Ok(());
        }
        match prices.as_slice().iter().position(|p| *p < 0.0) {
            Some(q) => Err(Error::Config(format!(
                "{stage} price at quarter {q} is negative ({}); relaxed exclusivity \
                 would charge and discharge at once, set solver.exclusivity = \"binary\"",
                prices.as_slice()[q]
            ))),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let cfg = EngineConfig::default();
        assert_eq!(cfg.horizon, 96);
        assert_eq!(cfg.interval_hours, 0.25);
        assert!(cfg.validate().is_ok());
    }

    #[test]
    fn test_toml_overrides_defaults() {
        let cfg = EngineConfig::from_toml_str(
            r#"
            horizon = 24
            interval_hours = 1.0
            terminal_soc = "free"

            [solver]
            time_limit_seconds = 2.5

            [coupling]
            mode = "band"
            max_deviation_mw = 0.25

            [products.daa]
            block_quarters = 4
            "#,
        )
        .unwrap();

        assert_eq!(cfg.horizon, 24);
        assert_eq!(cfg.terminal_soc, TerminalSoc::Free);
        assert_eq!(cfg.solver.time_limit_seconds, 2.5);
        assert_eq!(cfg.solver.backend, SolverBackend::Microlp);
        assert_eq!(
            cfg.coupling,
            CouplingPolicy::Band {
                max_deviation_mw: 0.25
            }
        );
        assert_eq!(cfg.products.for_stage(MarketStage::Daa).block_quarters, 4);
        assert_eq!(cfg.products.for_stage(MarketStage::Idc).block_quarters, 1);
    }

    #[test]
    fn test_invalid_settings_rejected() {
        let bad = [
            "horizon = 0",
            "interval_hours = -0.25",
            "[solver]\ntime_limit_seconds = 0.0",
            "[solver]\nthroughput_penalty = -1.0",
            "[coupling]\nmode = \"band\"\nmax_deviation_mw = -0.1",
            "[products.ida]\nblock_quarters = 0",
            "horizon = 10\n[products.daa]\nblock_quarters = 4",
        ];
        for toml in bad {
            assert!(
                matches!(EngineConfig::from_toml_str(toml), Err(Error::Config(_))),
                "accepted: {toml}"
            );
        }
    }

    #[test]
    fn test_binary_requires_integer_backend() {
        let mut cfg = EngineConfig::default();
        cfg.solver.exclusivity = Exclusivity::Binary;
        cfg.solver.backend = SolverBackend::Clarabel;
        assert!(matches!(cfg.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn test_negative_prices_need_binary_exclusivity() {
        let prices = PriceSeries::new(vec![12.0, -3.5, 40.0]).unwrap();
        let mut cfg = EngineConfig::default();

        let err = cfg.validate_prices(MarketStage::Ida, &prices).unwrap_err();
        assert!(matches!(err, Error::Config(ref msg) if msg.contains("ida price at quarter 1")));

        cfg.solver.exclusivity = Exclusivity::Binary;
        assert!(cfg.validate_prices(MarketStage::Ida, &prices).is_ok());
    }

    #[test]
    fn test_missing_file_uses_defaults() {
        let cfg = EngineConfig::load("does/not/exist.toml").unwrap();
        assert_eq!(cfg.solver, SolverConfig::default());
    }
}
