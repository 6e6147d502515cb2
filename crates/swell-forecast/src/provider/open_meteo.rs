//! Free secondary: Open-Meteo marine API.
//!
//! Coarser than the primary. Wind, water temperature and sea level are not
//! offered and stay `None`.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use swell_core::{ProvidersConfig, ReqwestErrorExt};
use tracing::instrument;

use super::ForecastProvider;
use crate::error::ProviderError;
use crate::retry::{with_retry, RetryConfig};
use crate::types::{ForecastSource, HourlyRecord};

pub const OPEN_METEO_HOURLY: &str =
    "wave_height,wave_period,wave_direction,swell_wave_height,swell_wave_period";

const FORECAST_DAYS: u32 = 7;

pub struct OpenMeteoProvider {
    client: Client,
    base_url: String,
    retry: RetryConfig,
}

impl OpenMeteoProvider {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryConfig::default(),
        })
    }

    pub fn from_config(config: &ProvidersConfig) -> Result<Self, ProviderError> {
        Self::new(
            &config.secondary_base_url,
            Duration::from_secs(config.secondary_timeout_secs),
        )
    }

    pub fn with_retry_config(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    async fn fetch_once(&self, lat: f64, lng: f64) -> Result<MarineResponse, ProviderError> {
        let url = format!("{}/v1/marine", self.base_url);
        let response = self
            .client
            .get(&url)
            .query(&[
                ("latitude", lat.to_string()),
                ("longitude", lng.to_string()),
                ("hourly", OPEN_METEO_HOURLY.to_string()),
                ("forecast_days", FORECAST_DAYS.to_string()),
                ("timezone", "GMT".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.into_network_error()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
            });
        }

        response
            .json::<MarineResponse>()
            .await
            .map_err(|e| ProviderError::Parse(e.to_string()))
    }
}

#[derive(Debug, Deserialize)]
struct MarineResponse {
    hourly: Option<MarineHourly>,
}

/// Column-oriented: `time[i]` pairs with every other column's `[i]`.
#[derive(Debug, Deserialize)]
struct MarineHourly {
    #[serde(default)]
    time: Vec<String>,
    #[serde(default)]
    wave_height: Vec<Option<f64>>,
    #[serde(default)]
    wave_period: Vec<Option<f64>>,
    #[serde(default)]
    wave_direction: Vec<Option<f64>>,
    #[serde(default)]
    swell_wave_height: Vec<Option<f64>>,
    #[serde(default)]
    swell_wave_period: Vec<Option<f64>>,
}

fn column(values: &[Option<f64>], i: usize) -> Option<f64> {
    values.get(i).copied().flatten()
}

impl MarineHourly {
    fn into_records(self) -> Result<Vec<HourlyRecord>, ProviderError> {
        self.time
            .iter()
            .enumerate()
            .map(|(i, raw)| {
                let time = NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M")
                    .map_err(|e| ProviderError::Parse(format!("time '{}': {}", raw, e)))?
                    .and_utc();
                Ok(HourlyRecord {
                    wave_height: column(&self.wave_height, i),
                    wave_period: column(&self.wave_period, i),
                    wave_direction: column(&self.wave_direction, i),
                    swell_height: column(&self.swell_wave_height, i),
                    swell_period: column(&self.swell_wave_period, i),
                    ..HourlyRecord::empty(time)
                })
            })
            .collect()
    }
}

#[async_trait]
impl ForecastProvider for OpenMeteoProvider {
    fn source(&self) -> ForecastSource {
        ForecastSource::OpenMeteo
    }

    /// Open-Meteo always answers from the current hour, so `now` is unused.
    #[instrument(skip(self, _now), level = "info")]
    async fn fetch(
        &self,
        lat: f64,
        lng: f64,
        _now: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>, ProviderError> {
        let payload = with_retry(&self.retry, || self.fetch_once(lat, lng)).await?;

        let records = match payload.hourly {
            Some(hourly) => hourly.into_records()?,
            None => Vec::new(),
        };
        if records.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }

        tracing::debug!("Open-Meteo returned {} hours", records.len());
        Ok(records)
    }
}
