//! Forecast sources and the ordered chain that falls through them.

pub mod chain;
pub mod open_meteo;
pub mod stormglass;
pub mod synthetic;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::ProviderError;
use crate::types::{ForecastSource, HourlyRecord};

pub use chain::{ChainFetch, ProviderChain};
pub use open_meteo::OpenMeteoProvider;
pub use stormglass::StormglassProvider;
pub use synthetic::SyntheticProvider;

/// A source of hourly marine forecasts in the shared `HourlyRecord` shape.
#[async_trait]
pub trait ForecastProvider: Send + Sync {
    fn source(&self) -> ForecastSource;

    /// Whether each call spends the primary request budget.
    fn is_quota_limited(&self) -> bool {
        false
    }

    /// Hourly records for the days following `now`. An empty result is an
    /// error.
    async fn fetch(
        &self,
        lat: f64,
        lng: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>, ProviderError>;
}

/// Round to a fixed number of decimals.
pub(crate) fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}
