use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::cache_key::CacheKey;

/// A surf spot from the static catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Spot {
    pub id: i64,
    pub name: String,
    pub lat: f64,
    pub lng: f64,
}

impl Spot {
    pub fn new(id: i64, name: impl Into<String>, lat: f64, lng: f64) -> Self {
        Self {
            id,
            name: name.into(),
            lat,
            lng,
        }
    }
}

/// Where a cache row's data came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ForecastSource {
    /// Quota-limited marine point forecast
    Stormglass,
    /// Free marine forecast, coarser fields
    OpenMeteo,
    /// Deterministic generator, on-demand path only
    Synthetic,
}

impl ForecastSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stormglass => "stormglass",
            Self::OpenMeteo => "open-meteo",
            Self::Synthetic => "synthetic",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "stormglass" => Some(Self::Stormglass),
            "open-meteo" => Some(Self::OpenMeteo),
            "synthetic" => Some(Self::Synthetic),
            _ => None,
        }
    }

    /// Position in the provider chain.
    pub fn tier(&self) -> ProviderTier {
        match self {
            Self::Stormglass => ProviderTier::Primary,
            Self::OpenMeteo => ProviderTier::Secondary,
            Self::Synthetic => ProviderTier::Tertiary,
        }
    }
}

impl std::fmt::Display for ForecastSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ProviderTier {
    Primary,
    Secondary,
    Tertiary,
}

/// One hour of marine forecast in the shared shape every provider maps onto.
///
/// Fields a provider does not expose are `None`, never fabricated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HourlyRecord {
    pub time: DateTime<Utc>,
    pub wave_height: Option<f64>,
    pub wave_period: Option<f64>,
    pub wave_direction: Option<f64>,
    pub wind_speed: Option<f64>,
    pub wind_direction: Option<f64>,
    pub swell_height: Option<f64>,
    pub swell_period: Option<f64>,
    pub water_temperature: Option<f64>,
    pub sea_level: Option<f64>,
    #[serde(default)]
    pub is_synthetic: bool,
}

impl HourlyRecord {
    /// A record with only a timestamp; providers fill in what they have.
    pub fn empty(time: DateTime<Utc>) -> Self {
        Self {
            time,
            wave_height: None,
            wave_period: None,
            wave_direction: None,
            wind_speed: None,
            wind_direction: None,
            swell_height: None,
            swell_period: None,
            water_temperature: None,
            sea_level: None,
            is_synthetic: false,
        }
    }
}

/// A persisted forecast for one (location, day, bucket).
///
/// Immutable once written; superseded by a new row for the same key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheRow {
    pub cache_key: CacheKey,
    pub lat: f64,
    pub lng: f64,
    pub source: ForecastSource,
    pub hourly: Vec<HourlyRecord>,
    pub fetched_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CacheRow {
    pub fn is_fresh(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    /// First record at or after `now`, else the first record.
    pub fn current_record(&self, now: DateTime<Utc>) -> Option<&HourlyRecord> {
        self.hourly
            .iter()
            .find(|h| h.time >= now)
            .or_else(|| self.hourly.first())
    }

    pub fn is_synthetic(&self) -> bool {
        self.source == ForecastSource::Synthetic
    }
}
