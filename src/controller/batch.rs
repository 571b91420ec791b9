use std::sync::Arc;

use chrono::NaiveDate;
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::SequentialOrchestrator;
use crate::config::EngineConfig;
use crate::domain::{BatteryModel, MarketDataProvider, MarketPrices, Schedule};
use crate::error::{Error, Result};

/// One independent delivery-day run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DayRequest {
    pub battery: BatteryModel,
    pub prices: MarketPrices,
}

/// Optimize independent days concurrently on the blocking pool
///
/// Results come back in input order; a failed day does not affect the others.
pub async fn optimize_days(requests: Vec<DayRequest>, config: &EngineConfig) -> Vec<Result<Schedule>> {
    info!(days = requests.len(), "starting batch");

    let handles = requests.into_iter().map(|request| {
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            SequentialOrchestrator::new(request.battery, request.prices, config)?.run()
        })
    });

    let results: Vec<Result<Schedule>> = join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap_or_else(|e| Err(Error::Worker(e.to_string()))))
        .collect();

    let failed = results.iter().filter(|r| r.is_err()).count();
    if failed > 0 {
        warn!(failed, total = results.len(), "batch finished with failed days");
    } else {
        info!(total = results.len(), "batch finished");
    }
    results
}

/// Fetch each day's prices from `provider`, then optimize all days concurrently
///
/// A day whose prices cannot be fetched yields its data error in place.
pub async fn optimize_provider_days(
    provider: Arc<dyn MarketDataProvider>,
    battery: BatteryModel,
    days: &[NaiveDate],
    config: &EngineConfig,
) -> Vec<Result<Schedule>> {
    let handles = days.iter().map(|&day| {
        let provider = Arc::clone(&provider);
        let battery = battery.clone();
        let config = config.clone();
        tokio::task::spawn_blocking(move || {
            SequentialOrchestrator::from_provider(battery, provider.as_ref(), day, config)?.run()
        })
    });

    join_all(handles)
        .await
        .into_iter()
        .map(|joined| joined.unwrap_or_else(|e| Err(Error::Worker(e.to_string()))))
        .collect()
}
