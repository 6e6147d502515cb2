//! One caching/fetch path shared by the batch refresh and on-demand requests.
//!
//! Synthetic rows never reach the shared store: the batch refresh and alert
//! evaluation read that store and must only see provider data. On-demand
//! callers reuse a synthetic row from a short-lived in-process map instead.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;

use crate::cache::CacheStore;
use crate::cache_key::{next_bucket_start, CacheKey};
use crate::error::ForecastError;
use crate::provider::{ProviderChain, SyntheticProvider};
use crate::quota::QuotaTracker;
use crate::types::{CacheRow, ForecastSource};

/// How long an on-demand caller may reuse a synthetic row.
const SYNTHETIC_TTL_MINUTES: i64 = 5;

/// Which chain variant a caller needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchMode {
    /// Primary then secondary
    Batch,
    /// Primary, secondary, then the synthetic generator
    OnDemand,
}

/// A freshly fetched row and what it cost.
#[derive(Debug, Clone)]
pub struct FetchedForecast {
    pub row: CacheRow,
    /// False when the row is not in the shared store: the write was rejected,
    /// or the row is synthetic. The row is still usable either way.
    pub persisted: bool,
    pub persist_error: Option<String>,
    pub primary_attempts: u32,
    pub limit_reached: bool,
}

#[derive(Debug, Clone)]
pub enum ForecastOutcome {
    Hit(CacheRow),
    Fetched(FetchedForecast),
}

impl ForecastOutcome {
    pub fn row(&self) -> &CacheRow {
        match self {
            Self::Hit(row) => row,
            Self::Fetched(fetched) => &fetched.row,
        }
    }

    pub fn into_row(self) -> CacheRow {
        match self {
            Self::Hit(row) => row,
            Self::Fetched(fetched) => fetched.row,
        }
    }

    pub fn is_hit(&self) -> bool {
        matches!(self, Self::Hit(_))
    }

    pub fn limit_reached(&self) -> bool {
        match self {
            Self::Hit(_) => false,
            Self::Fetched(fetched) => fetched.limit_reached,
        }
    }
}

pub struct ForecastService {
    store: Arc<dyn CacheStore>,
    batch: ProviderChain,
    on_demand: ProviderChain,
    synthetic: Mutex<HashMap<CacheKey, CacheRow>>,
}

impl ForecastService {
    /// `chain` is the batch chain; the on-demand chain appends the synthetic
    /// generator to it.
    pub fn new(store: Arc<dyn CacheStore>, chain: ProviderChain) -> Self {
        let on_demand = chain.clone().with_provider(Arc::new(SyntheticProvider));
        Self {
            store,
            batch: chain,
            on_demand,
            synthetic: Mutex::new(HashMap::new()),
        }
    }

    pub fn store(&self) -> Arc<dyn CacheStore> {
        self.store.clone()
    }

    pub fn chain(&self, mode: FetchMode) -> &ProviderChain {
        match mode {
            FetchMode::Batch => &self.batch,
            FetchMode::OnDemand => &self.on_demand,
        }
    }

    /// Fresh provider row for the location, if any. Store failures and
    /// synthetic rows left by older versions read as a miss.
    pub async fn cached(&self, lat: f64, lng: f64, now: DateTime<Utc>) -> Option<CacheRow> {
        let key = CacheKey::for_location(lat, lng, now);
        match self.store.get(&key, now).await {
            Ok(Some(row)) if row.is_synthetic() => {
                tracing::debug!("Ignoring synthetic row in store for {}", key);
                None
            }
            Ok(row) => row,
            Err(e) => {
                tracing::warn!("Cache lookup for {} failed, treating as miss: {}", key, e);
                None
            }
        }
    }

    /// Synthetic row for the location still within its short reuse window.
    fn cached_synthetic(&self, key: &CacheKey, now: DateTime<Utc>) -> Option<CacheRow> {
        let mut rows = self.synthetic.lock();
        rows.retain(|_, row| row.is_fresh(now));
        rows.get(key).cloned()
    }

    /// Fetch through the chain and write the row, regardless of cache state.
    ///
    /// A failed write does not fail the fetch; see `FetchedForecast::persisted`.
    /// Synthetic rows go to the in-process map, not the store.
    pub async fn fetch_and_store(
        &self,
        lat: f64,
        lng: f64,
        mode: FetchMode,
        quota: &QuotaTracker,
        now: DateTime<Utc>,
    ) -> Result<FetchedForecast, ForecastError> {
        let fetched = self.chain(mode).fetch(lat, lng, quota, now).await?;
        let synthetic = fetched.source == ForecastSource::Synthetic;

        let expires_at = if synthetic {
            (now + Duration::minutes(SYNTHETIC_TTL_MINUTES)).min(next_bucket_start(now))
        } else {
            next_bucket_start(now)
        };
        let row = CacheRow {
            cache_key: CacheKey::for_location(lat, lng, now),
            lat,
            lng,
            source: fetched.source,
            hourly: fetched.records,
            fetched_at: now,
            expires_at,
        };

        let (persisted, persist_error) = if synthetic {
            self.synthetic
                .lock()
                .insert(row.cache_key.clone(), row.clone());
            (false, None)
        } else {
            match self.store.put(&row).await {
                Ok(()) => (true, None),
                Err(e) => {
                    tracing::error!("Failed to persist {}: {}", row.cache_key, e);
                    (false, Some(e.to_string()))
                }
            }
        };

        tracing::info!(
            "Fetched {} hours for {} from {}",
            row.hourly.len(),
            row.cache_key,
            row.source
        );

        Ok(FetchedForecast {
            row,
            persisted,
            persist_error,
            primary_attempts: fetched.primary_attempts,
            limit_reached: fetched.limit_reached,
        })
    }

    pub async fn get_or_fetch(
        &self,
        lat: f64,
        lng: f64,
        mode: FetchMode,
        quota: &QuotaTracker,
        now: DateTime<Utc>,
    ) -> Result<ForecastOutcome, ForecastError> {
        if let Some(row) = self.cached(lat, lng, now).await {
            tracing::debug!("Cache hit for {}", row.cache_key);
            return Ok(ForecastOutcome::Hit(row));
        }
        if mode == FetchMode::OnDemand {
            let key = CacheKey::for_location(lat, lng, now);
            if let Some(row) = self.cached_synthetic(&key, now) {
                tracing::debug!("Reusing synthetic forecast for {}", key);
                return Ok(ForecastOutcome::Hit(row));
            }
        }
        self.fetch_and_store(lat, lng, mode, quota, now)
            .await
            .map(ForecastOutcome::Fetched)
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::cache::MemoryCacheStore;
    use crate::error::{CacheError, ProviderError};
    use crate::provider::ForecastProvider;
    use crate::types::HourlyRecord;
    use async_trait::async_trait;
    use chrono::TimeZone;
    use std::sync::atomic::{AtomicU32, Ordering};
    use swell_core::{DatabaseError, QuotaConfig};

    struct Failing;

    #[async_trait]
    impl ForecastProvider for Failing {
        fn source(&self) -> ForecastSource {
            ForecastSource::OpenMeteo
        }

        async fn fetch(
            &self,
            _lat: f64,
            _lng: f64,
            _now: DateTime<Utc>,
        ) -> Result<Vec<HourlyRecord>, ProviderError> {
            Err(ProviderError::Http { status: 503 })
        }
    }

    struct Counting(AtomicU32);

    #[async_trait]
    impl ForecastProvider for Counting {
        fn source(&self) -> ForecastSource {
            ForecastSource::OpenMeteo
        }

        async fn fetch(
            &self,
            _lat: f64,
            _lng: f64,
            now: DateTime<Utc>,
        ) -> Result<Vec<HourlyRecord>, ProviderError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(vec![HourlyRecord::empty(now)])
        }
    }

    struct BrokenStore;

    #[async_trait]
    impl CacheStore for BrokenStore {
        async fn get(&self, _key: &CacheKey, _now: DateTime<Utc>) -> Result<Option<CacheRow>, CacheError> {
            Err(CacheError::Database(DatabaseError::Query("disk".into())))
        }

        async fn put(&self, _row: &CacheRow) -> Result<(), CacheError> {
            Err(CacheError::Database(DatabaseError::Query("disk".into())))
        }

        async fn purge_expired(&self, _before: DateTime<Utc>) -> Result<usize, CacheError> {
            Ok(0)
        }

        async fn row_count(&self) -> Result<usize, CacheError> {
            Ok(0)
        }
    }

    fn quota() -> QuotaTracker {
        QuotaTracker::in_memory(QuotaConfig {
            daily_cap: 10,
            per_run_cap: 10,
        })
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 10, 19, 10, 17, 0).unwrap()
    }

    #[tokio::test]
    async fn test_second_call_is_cache_hit() {
        let provider = Arc::new(Counting(AtomicU32::new(0)));
        let service = ForecastService::new(
            Arc::new(MemoryCacheStore::new()),
            ProviderChain::default().with_provider(provider.clone()),
        );
        let quota = quota();

        let first = service
            .get_or_fetch(43.664, -1.448, FetchMode::Batch, &quota, now())
            .await
            .unwrap();
        assert!(!first.is_hit());
        assert_eq!(
            first.row().expires_at,
            Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
        );

        let second = service
            .get_or_fetch(43.664, -1.448, FetchMode::Batch, &quota, now())
            .await
            .unwrap();
        assert!(second.is_hit());
        assert_eq!(provider.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_batch_mode_never_synthesizes() {
        let service = ForecastService::new(
            Arc::new(MemoryCacheStore::new()),
            ProviderChain::default().with_provider(Arc::new(Failing)),
        );
        let result = service
            .get_or_fetch(43.664, -1.448, FetchMode::Batch, &quota(), now())
            .await;
        assert!(matches!(result, Err(ForecastError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn test_on_demand_falls_back_to_synthetic() {
        let service = ForecastService::new(
            Arc::new(MemoryCacheStore::new()),
            ProviderChain::default().with_provider(Arc::new(Failing)),
        );
        let outcome = service
            .get_or_fetch(43.664, -1.448, FetchMode::OnDemand, &quota(), now())
            .await
            .unwrap();
        let row = outcome.row();
        assert_eq!(row.source, ForecastSource::Synthetic);
        assert!(row.hourly.iter().all(|h| h.is_synthetic));
    }

    #[tokio::test]
    async fn test_synthetic_rows_stay_out_of_shared_store() {
        let store = Arc::new(MemoryCacheStore::new());
        let service = ForecastService::new(
            store.clone(),
            ProviderChain::default().with_provider(Arc::new(Failing)),
        );
        let quota = quota();

        let first = service
            .get_or_fetch(44.5, -1.25, FetchMode::OnDemand, &quota, now())
            .await
            .unwrap();
        match &first {
            ForecastOutcome::Fetched(fetched) => {
                assert!(!fetched.persisted);
                assert!(fetched.persist_error.is_none());
                assert_eq!(fetched.row.expires_at, now() + Duration::minutes(5));
            }
            ForecastOutcome::Hit(_) => unreachable!("empty store cannot hit"),
        }
        assert_eq!(store.row_count().await.unwrap(), 0);
        assert!(service.cached(44.5, -1.25, now()).await.is_none());

        let again = service
            .get_or_fetch(44.5, -1.25, FetchMode::OnDemand, &quota, now() + Duration::minutes(2))
            .await
            .unwrap();
        assert!(again.is_hit());
        assert_eq!(again.row(), first.row());

        let batch = service
            .get_or_fetch(44.5, -1.25, FetchMode::Batch, &quota, now() + Duration::minutes(2))
            .await;
        assert!(matches!(batch, Err(ForecastError::AllProvidersFailed(_))));
    }

    #[tokio::test]
    async fn test_synthetic_reuse_expires_after_five_minutes() {
        let service = ForecastService::new(
            Arc::new(MemoryCacheStore::new()),
            ProviderChain::default().with_provider(Arc::new(Failing)),
        );
        let quota = quota();
        service
            .get_or_fetch(44.5, -1.25, FetchMode::OnDemand, &quota, now())
            .await
            .unwrap();

        let later = service
            .get_or_fetch(44.5, -1.25, FetchMode::OnDemand, &quota, now() + Duration::minutes(6))
            .await
            .unwrap();
        assert!(!later.is_hit());
    }

    #[tokio::test]
    async fn test_stored_synthetic_row_reads_as_miss() {
        let store = Arc::new(MemoryCacheStore::new());
        let key = CacheKey::for_location(44.5, -1.25, now());
        store
            .put(&CacheRow {
                cache_key: key,
                lat: 44.5,
                lng: -1.25,
                source: ForecastSource::Synthetic,
                hourly: vec![HourlyRecord::empty(now())],
                fetched_at: now(),
                expires_at: next_bucket_start(now()),
            })
            .await
            .unwrap();
        let provider = Arc::new(Counting(AtomicU32::new(0)));
        let service = ForecastService::new(
            store,
            ProviderChain::default().with_provider(provider.clone()),
        );

        assert!(service.cached(44.5, -1.25, now()).await.is_none());
        let outcome = service
            .get_or_fetch(44.5, -1.25, FetchMode::Batch, &quota(), now())
            .await
            .unwrap();
        assert!(!outcome.is_hit());
        assert_eq!(outcome.row().source, ForecastSource::OpenMeteo);
        assert_eq!(provider.0.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_store_failures_do_not_fail_fetch() {
        let service = ForecastService::new(
            Arc::new(BrokenStore),
            ProviderChain::default().with_provider(Arc::new(Counting(AtomicU32::new(0)))),
        );
        assert!(service.cached(43.664, -1.448, now()).await.is_none());

        match service
            .get_or_fetch(43.664, -1.448, FetchMode::Batch, &quota(), now())
            .await
            .unwrap()
        {
            ForecastOutcome::Fetched(fetched) => {
                assert!(!fetched.persisted);
                assert!(fetched.persist_error.is_some());
            }
            ForecastOutcome::Hit(_) => unreachable!("broken store cannot hit"),
        }
    }
}
