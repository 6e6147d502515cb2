//! Forecast acquisition for SwellSync.
//!
//! Spot catalog and clustering, the time-bucketed forecast cache, the shared
//! request quota, and the provider chain that fills the cache.

pub mod cache;
pub mod cache_key;
pub mod catalog;
pub mod cluster;
pub mod error;
pub mod provider;
pub mod quota;
pub mod retry;
pub mod service;
pub mod types;

pub use cache::{CacheStore, MemoryCacheStore, SqliteCacheStore};
pub use cache_key::{bucket_start, next_bucket_start, time_bucket, CacheKey};
pub use catalog::{default_catalog, find_spot, load_catalog};
pub use cluster::{cluster_key, Cluster, SpotClusters};
pub use error::{CacheError, ForecastError, ProviderError, QuotaError};
pub use provider::{
    ChainFetch, ForecastProvider, OpenMeteoProvider, ProviderChain, StormglassProvider,
    SyntheticProvider,
};
pub use quota::{
    DailyUsage, MemoryQuotaLedger, QuotaLedger, QuotaState, QuotaTracker, SqliteQuotaLedger,
};
pub use service::{FetchMode, FetchedForecast, ForecastOutcome, ForecastService};
pub use types::{CacheRow, ForecastSource, HourlyRecord, ProviderTier, Spot};
