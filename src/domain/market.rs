use std::collections::HashMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumIter, IntoEnumIterator};

use crate::error::{Error, Result};

/// Market stage, in gate-closure order
///
/// The derived ordering is the trading order and is never changed at runtime.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Display, EnumIter,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum MarketStage {
    /// Day-ahead auction
    Daa,
    /// Intraday auction
    Ida,
    /// Intraday continuous, one representative price per quarter
    Idc,
}

impl MarketStage {
    pub const ALL: [MarketStage; 3] = [MarketStage::Daa, MarketStage::Ida, MarketStage::Idc];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn first() -> Self {
        MarketStage::Daa
    }

    pub fn next(self) -> Option<Self> {
        Self::iter().find(|stage| *stage > self)
    }

    pub fn previous(self) -> Option<Self> {
        Self::iter().rev().find(|stage| *stage < self)
    }
}

/// Prices (currency/MWh) for one stage over the delivery-day quarter grid
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(try_from = "Vec<f64>", into = "Vec<f64>")]
pub struct PriceSeries(Vec<f64>);

impl PriceSeries {
    pub fn new(prices: Vec<f64>) -> Result<Self> {
        if prices.is_empty() {
            return Err(Error::Data("price series is empty".to_string()));
        }
        if let Some((q, price)) = prices.iter().enumerate().find(|(_, p)| !p.is_finite()) {
            return Err(Error::Data(format!(
                "price at quarter {q} is not a finite number ({price})"
            )));
        }
        Ok(Self(prices))
    }

    /// Flat series, mostly useful for stages that should not trade
    pub fn flat(price: f64, horizon: usize) -> Result<Self> {
        Self::new(vec![price; horizon])
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_slice(&self) -> &[f64] {
        &self.0
    }

    pub fn get(&self, quarter: usize) -> Option<f64> {
        self.0.get(quarter).copied()
    }

    pub fn ensure_horizon(&self, horizon: usize) -> Result<()> {
        if self.0.len() != horizon {
            return Err(Error::Data(format!(
                "expected {horizon} quarterly prices, got {}",
                self.0.len()
            )));
        }
        Ok(())
    }
}

impl TryFrom<Vec<f64>> for PriceSeries {
    type Error = Error;

    fn try_from(prices: Vec<f64>) -> Result<Self> {
        Self::new(prices)
    }
}

impl From<PriceSeries> for Vec<f64> {
    fn from(series: PriceSeries) -> Self {
        series.0
    }
}

/// The three stage price series of one delivery day, aligned to one grid
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MarketPrices {
    pub delivery_day: NaiveDate,
    pub daa: PriceSeries,
    pub ida: PriceSeries,
    pub idc: PriceSeries,
}

impl MarketPrices {
    pub fn new(
        delivery_day: NaiveDate,
        daa: PriceSeries,
        ida: PriceSeries,
        idc: PriceSeries,
    ) -> Self {
        Self {
            delivery_day,
            daa,
            ida,
            idc,
        }
    }

    pub fn for_stage(&self, stage: MarketStage) -> &PriceSeries {
        match stage {
            MarketStage::Daa => &self.daa,
            MarketStage::Ida => &self.ida,
            MarketStage::Idc => &self.idc,
        }
    }

    /// Reject series that do not cover exactly `horizon` quarters
    pub fn validate(&self, horizon: usize) -> Result<()> {
        for stage in MarketStage::iter() {
            self.for_stage(stage)
                .ensure_horizon(horizon)
                .map_err(|e| Error::Data(format!("{stage} prices for {}: {e}", self.delivery_day)))?;
        }
        Ok(())
    }

    /// Pull all three series for `day` from a provider and check their alignment
    pub fn fetch(
        provider: &dyn MarketDataProvider,
        day: NaiveDate,
        horizon: usize,
    ) -> Result<Self> {
        let mut series = Vec::with_capacity(MarketStage::ALL.len());
        for stage in MarketStage::iter() {
            let prices = provider
                .prices(day, stage)
                .map_err(|e| Error::Data(format!("{stage} prices for {day}: {e:#}")))?
                .ok_or_else(|| Error::Data(format!("no {stage} prices for {day}")))?;
            let prices = PriceSeries::new(prices)
                .map_err(|e| Error::Data(format!("{stage} prices for {day}: {e}")))?;
            series.push(prices);
        }
        let mut series = series.into_iter();
        let (Some(daa), Some(ida), Some(idc)) = (series.next(), series.next(), series.next())
        else {
            return Err(Error::Data(format!("incomplete price set for {day}")));
        };

        let prices = Self::new(day, daa, ida, idc);
        prices.validate(horizon)?;
        Ok(prices)
    }
}

/// External source of stage prices
///
/// `Ok(None)` means the provider has no series for that day and stage.
pub trait MarketDataProvider: Send + Sync {
    fn prices(&self, day: NaiveDate, stage: MarketStage) -> anyhow::Result<Option<Vec<f64>>>;
}

/// Provider backed by series held in memory
#[derive(Debug, Clone, Default)]
pub struct InMemoryMarketData {
    series: HashMap<(NaiveDate, MarketStage), Vec<f64>>,
}

impl InMemoryMarketData {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, day: NaiveDate, stage: MarketStage, prices: Vec<f64>) -> &mut Self {
        self.series.insert((day, stage), prices);
        self
    }

    pub fn with(mut self, day: NaiveDate, stage: MarketStage, prices: Vec<f64>) -> Self {
        self.insert(day, stage, prices);
        self
    }
}

impl MarketDataProvider for InMemoryMarketData {
    fn prices(&self, day: NaiveDate, stage: MarketStage) -> anyhow::Result<Option<Vec<f64>>> {
        Ok(self.series.get(&(day, stage)).cloned())
    }
}
