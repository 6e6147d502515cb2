use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::error::ForecastError;
use crate::quota::QuotaTracker;
use crate::types::{ForecastSource, HourlyRecord};

use super::ForecastProvider;

/// Result of a successful chain fetch.
#[derive(Debug, Clone)]
pub struct ChainFetch {
    pub records: Vec<HourlyRecord>,
    pub source: ForecastSource,
    /// Quota-limited requests actually sent
    pub primary_attempts: u32,
    /// A quota-limited provider was skipped for lack of budget
    pub limit_reached: bool,
}

/// Ordered providers; the first one to return data wins.
#[derive(Clone, Default)]
pub struct ProviderChain {
    providers: Vec<Arc<dyn ForecastProvider>>,
}

impl ProviderChain {
    pub fn new(providers: Vec<Arc<dyn ForecastProvider>>) -> Self {
        Self { providers }
    }

    pub fn with_provider(mut self, provider: Arc<dyn ForecastProvider>) -> Self {
        self.providers.push(provider);
        self
    }

    pub fn len(&self) -> usize {
        self.providers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.providers.is_empty()
    }

    pub fn sources(&self) -> Vec<ForecastSource> {
        self.providers.iter().map(|p| p.source()).collect()
    }

    /// Whether some provider can answer without request budget.
    pub fn has_unmetered_provider(&self) -> bool {
        self.providers.iter().any(|p| !p.is_quota_limited())
    }

    /// Try each provider in order.
    ///
    /// A quota-limited provider is attempted at most once, and only after
    /// `quota.try_consume(1)` grants it budget.
    pub async fn fetch(
        &self,
        lat: f64,
        lng: f64,
        quota: &QuotaTracker,
        now: DateTime<Utc>,
    ) -> Result<ChainFetch, ForecastError> {
        let mut failures = Vec::new();
        let mut primary_attempts = 0;
        let mut limit_reached = false;

        for provider in &self.providers {
            let source = provider.source();

            if provider.is_quota_limited() {
                if !quota.try_consume(1).await {
                    tracing::info!("Skipping {}: request budget exhausted", source);
                    limit_reached = true;
                    failures.push(format!("{}: request budget exhausted", source));
                    continue;
                }
                primary_attempts += 1;
            }

            match provider.fetch(lat, lng, now).await {
                Ok(records) if !records.is_empty() => {
                    return Ok(ChainFetch {
                        records,
                        source,
                        primary_attempts,
                        limit_reached,
                    });
                }
                Ok(_) => {
                    tracing::warn!("{} returned no data for {:.3},{:.3}", source, lat, lng);
                    failures.push(format!("{}: no data", source));
                }
                Err(e) => {
                    tracing::warn!("{} failed for {:.3},{:.3}: {}", source, lat, lng, e);
                    failures.push(format!("{}: {}", source, e));
                }
            }
        }

        Err(ForecastError::AllProvidersFailed(failures))
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used, clippy::panic)]
    use super::*;
    use crate::error::ProviderError;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicU32, Ordering};
    use swell_core::QuotaConfig;

    struct Scripted {
        source: ForecastSource,
        limited: bool,
        succeed: bool,
        calls: AtomicU32,
    }

    impl Scripted {
        fn new(source: ForecastSource, limited: bool, succeed: bool) -> Arc<Self> {
            Arc::new(Self {
                source,
                limited,
                succeed,
                calls: AtomicU32::new(0),
            })
        }
    }

    #[async_trait]
    impl ForecastProvider for Scripted {
        fn source(&self) -> ForecastSource {
            self.source
        }

        fn is_quota_limited(&self) -> bool {
            self.limited
        }

        async fn fetch(
            &self,
            _lat: f64,
            _lng: f64,
            now: DateTime<Utc>,
        ) -> Result<Vec<HourlyRecord>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.succeed {
                Ok(vec![HourlyRecord::empty(now)])
            } else {
                Err(ProviderError::QuotaExhausted("quota".into()))
            }
        }
    }

    async fn tracker(daily_cap: u32) -> QuotaTracker {
        let tracker = QuotaTracker::in_memory(QuotaConfig {
            daily_cap,
            per_run_cap: daily_cap,
        });
        tracker.begin_run().await;
        tracker
    }

    #[tokio::test]
    async fn test_primary_wins() {
        let primary = Scripted::new(ForecastSource::Stormglass, true, true);
        let secondary = Scripted::new(ForecastSource::OpenMeteo, false, true);
        let chain = ProviderChain::default()
            .with_provider(primary.clone())
            .with_provider(secondary.clone());

        let fetched = chain.fetch(1.0, 2.0, &tracker(10).await, Utc::now()).await.unwrap();
        assert_eq!(fetched.source, ForecastSource::Stormglass);
        assert_eq!(fetched.primary_attempts, 1);
        assert_eq!(secondary.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_falls_through_after_single_primary_attempt() {
        let primary = Scripted::new(ForecastSource::Stormglass, true, false);
        let secondary = Scripted::new(ForecastSource::OpenMeteo, false, true);
        let chain = ProviderChain::default()
            .with_provider(primary.clone())
            .with_provider(secondary);
        let quota = tracker(10).await;

        let fetched = chain.fetch(1.0, 2.0, &quota, Utc::now()).await.unwrap();
        assert_eq!(fetched.source, ForecastSource::OpenMeteo);
        assert_eq!(fetched.primary_attempts, 1);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 1);
        assert_eq!(quota.state().await.daily_count, 1);
    }

    #[tokio::test]
    async fn test_exhausted_budget_skips_primary() {
        let primary = Scripted::new(ForecastSource::Stormglass, true, true);
        let secondary = Scripted::new(ForecastSource::OpenMeteo, false, true);
        let chain = ProviderChain::default()
            .with_provider(primary.clone())
            .with_provider(secondary);

        let fetched = chain.fetch(1.0, 2.0, &tracker(0).await, Utc::now()).await.unwrap();
        assert_eq!(fetched.source, ForecastSource::OpenMeteo);
        assert!(fetched.limit_reached);
        assert_eq!(fetched.primary_attempts, 0);
        assert_eq!(primary.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unmetered_provider_detection() {
        let primary_only = ProviderChain::default()
            .with_provider(Scripted::new(ForecastSource::Stormglass, true, true));
        assert!(!primary_only.has_unmetered_provider());
        assert!(primary_only
            .with_provider(Scripted::new(ForecastSource::OpenMeteo, false, true))
            .has_unmetered_provider());
    }

    #[tokio::test]
    async fn test_all_failed_lists_every_provider() {
        let chain = ProviderChain::default()
            .with_provider(Scripted::new(ForecastSource::Stormglass, true, false))
            .with_provider(Scripted::new(ForecastSource::OpenMeteo, false, false));
        match chain.fetch(1.0, 2.0, &tracker(10).await, Utc::now()).await {
            Err(ForecastError::AllProvidersFailed(causes)) => assert_eq!(causes.len(), 2),
            other => panic!("expected failure, got {:?}", other.map(|f| f.source)),
        }
    }
}
