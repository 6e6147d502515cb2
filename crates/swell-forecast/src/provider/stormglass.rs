//! Quota-limited primary: StormGlass point forecast.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::Client;
use serde::Deserialize;
use swell_core::{ProvidersConfig, ReqwestErrorExt};
use tracing::instrument;

use super::ForecastProvider;
use crate::error::ProviderError;
use crate::types::{ForecastSource, HourlyRecord};

pub const STORMGLASS_PARAMS: &str = "waveHeight,wavePeriod,waveDirection,windSpeed,windDirection,swellHeight,swellPeriod,waterTemperature,seaLevel";

const FORECAST_DAYS: i64 = 7;

pub struct StormglassProvider {
    client: Client,
    base_url: String,
    api_key: String,
}

impl StormglassProvider {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self, ProviderError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ProviderError::Setup(e.to_string()))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    /// `None` when no API key is configured.
    pub fn from_config(config: &ProvidersConfig) -> Result<Option<Self>, ProviderError> {
        match config.primary_api_key.as_deref() {
            Some(key) if !key.is_empty() => Self::new(
                &config.primary_base_url,
                key,
                Duration::from_secs(config.primary_timeout_secs),
            )
            .map(Some),
            _ => Ok(None),
        }
    }
}

#[derive(Debug, Deserialize)]
struct PointResponse {
    #[serde(default)]
    hours: Vec<PointHour>,
    #[serde(default)]
    errors: Option<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PointHour {
    time: DateTime<Utc>,
    #[serde(default)]
    wave_height: Option<SourceValue>,
    #[serde(default)]
    wave_period: Option<SourceValue>,
    #[serde(default)]
    wave_direction: Option<SourceValue>,
    #[serde(default)]
    wind_speed: Option<SourceValue>,
    #[serde(default)]
    wind_direction: Option<SourceValue>,
    #[serde(default)]
    swell_height: Option<SourceValue>,
    #[serde(default)]
    swell_period: Option<SourceValue>,
    #[serde(default)]
    water_temperature: Option<SourceValue>,
    #[serde(default)]
    sea_level: Option<SourceValue>,
}

/// Per-source values; only the `sg` blend is requested.
#[derive(Debug, Deserialize)]
struct SourceValue {
    sg: Option<f64>,
}

fn sg(value: Option<SourceValue>) -> Option<f64> {
    value.and_then(|v| v.sg)
}

impl From<PointHour> for HourlyRecord {
    fn from(hour: PointHour) -> Self {
        Self {
            time: hour.time,
            wave_height: sg(hour.wave_height),
            wave_period: sg(hour.wave_period),
            wave_direction: sg(hour.wave_direction),
            wind_speed: sg(hour.wind_speed),
            wind_direction: sg(hour.wind_direction),
            swell_height: sg(hour.swell_height),
            swell_period: sg(hour.swell_period),
            water_temperature: sg(hour.water_temperature),
            sea_level: sg(hour.sea_level),
            is_synthetic: false,
        }
    }
}

#[async_trait]
impl ForecastProvider for StormglassProvider {
    fn source(&self) -> ForecastSource {
        ForecastSource::Stormglass
    }

    fn is_quota_limited(&self) -> bool {
        true
    }

    #[instrument(skip(self), level = "info")]
    async fn fetch(
        &self,
        lat: f64,
        lng: f64,
        now: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>, ProviderError> {
        let start = now;
        let end = start + chrono::Duration::days(FORECAST_DAYS);
        let url = format!("{}/weather/point", self.base_url);

        let response = self
            .client
            .get(&url)
            .header("Authorization", &self.api_key)
            .query(&[
                ("lat", lat.to_string()),
                ("lng", lng.to_string()),
                ("params", STORMGLASS_PARAMS.to_string()),
                ("start", start.timestamp().to_string()),
                ("end", end.timestamp().to_string()),
                ("source", "sg".to_string()),
            ])
            .send()
            .await
            .map_err(|e| ProviderError::Network(e.into_network_error()))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| ProviderError::Network(e.into_network_error()))?;
        let parsed = serde_json::from_str::<PointResponse>(&body);

        // An error payload is a quota or key problem whatever the status says.
        if let Ok(PointResponse {
            errors: Some(errors),
            ..
        }) = &parsed
        {
            if !errors.is_null() {
                tracing::warn!("StormGlass error payload ({}): {}", status, errors);
                return Err(ProviderError::QuotaExhausted(errors.to_string()));
            }
        }

        if !status.is_success() {
            return Err(ProviderError::Http {
                status: status.as_u16(),
            });
        }

        let payload = parsed.map_err(|e| ProviderError::Parse(e.to_string()))?;
        if payload.hours.is_empty() {
            return Err(ProviderError::EmptyPayload);
        }

        tracing::debug!("StormGlass returned {} hours", payload.hours.len());
        Ok(payload.hours.into_iter().map(HourlyRecord::from).collect())
    }
}
