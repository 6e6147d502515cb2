//! The periodic refresh run: clusters → cache or fetch → alerts → summary.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use swell_alerts::AlertEvaluator;
use swell_forecast::{
    next_bucket_start, FetchMode, ForecastService, QuotaTracker, Spot, SpotClusters,
};
use tracing::instrument;

/// What one run did. Returned to the trigger caller as JSON.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RunSummary {
    pub timestamp: DateTime<Utc>,
    /// When rows written by this run expire
    pub expires_at: DateTime<Utc>,
    pub total_spots: usize,
    pub cluster_count: usize,
    /// Primary-provider requests spent
    pub requests_used: u32,
    pub cache_hits: usize,
    pub refreshed: usize,
    /// Clusters left for the next run once the budget ran out
    pub deferred: usize,
    pub errors: usize,
    pub quota_remaining: u32,
    pub alerts_fired: usize,
}

pub struct RefreshOrchestrator {
    catalog: Arc<Vec<Spot>>,
    clusters: SpotClusters,
    service: Arc<ForecastService>,
    quota: Arc<QuotaTracker>,
    alerts: Option<Arc<AlertEvaluator>>,
    request_delay: Duration,
}

impl RefreshOrchestrator {
    pub fn new(catalog: Vec<Spot>, service: Arc<ForecastService>, quota: Arc<QuotaTracker>) -> Self {
        let clusters = SpotClusters::build(&catalog);
        tracing::info!(
            "{} spots grouped into {} clusters",
            catalog.len(),
            clusters.len()
        );
        Self {
            catalog: Arc::new(catalog),
            clusters,
            service,
            quota,
            alerts: None,
            request_delay: Duration::ZERO,
        }
    }

    pub fn with_alerts(mut self, evaluator: Arc<AlertEvaluator>) -> Self {
        self.alerts = Some(evaluator);
        self
    }

    pub fn with_request_delay(mut self, delay: Duration) -> Self {
        self.request_delay = delay;
        self
    }

    pub fn catalog(&self) -> Arc<Vec<Spot>> {
        self.catalog.clone()
    }

    pub fn clusters(&self) -> &SpotClusters {
        &self.clusters
    }

    pub fn service(&self) -> Arc<ForecastService> {
        self.service.clone()
    }

    pub fn quota(&self) -> Arc<QuotaTracker> {
        self.quota.clone()
    }

    pub async fn run(&self) -> RunSummary {
        self.run_at(Utc::now()).await
    }

    /// One full run with `now` as the cache clock.
    ///
    /// Clusters are handled one at a time in catalog order. A failing cluster
    /// is counted and skipped; nothing here aborts the run.
    #[instrument(skip(self), level = "info")]
    pub async fn run_at(&self, now: DateTime<Utc>) -> RunSummary {
        self.quota.begin_run().await;
        // With an unmetered provider in the chain, a spent daily budget only
        // means the primary is skipped.
        let daily_bound = !self
            .service
            .chain(FetchMode::Batch)
            .has_unmetered_provider();

        let mut cache_hits = 0;
        let mut refreshed = 0;
        let mut deferred = 0;
        let mut errors = 0;
        let mut fetches = 0;

        for (idx, cluster) in self.clusters.iter().enumerate() {
            let has_budget = if daily_bound {
                self.quota.can_consume(1).await
            } else {
                self.quota.run_has_room(1)
            };
            if !has_budget {
                deferred = self.clusters.len() - idx;
                tracing::info!("Request budget reached, deferring {} clusters", deferred);
                break;
            }

            let (lat, lng) = (cluster.representative_lat, cluster.representative_lng);

            if self.service.cached(lat, lng, now).await.is_some() {
                tracing::debug!("Cluster {} is fresh", cluster.key);
                cache_hits += 1;
                continue;
            }

            if fetches > 0 && !self.request_delay.is_zero() {
                tokio::time::sleep(self.request_delay).await;
            }
            fetches += 1;

            match self
                .service
                .fetch_and_store(lat, lng, FetchMode::Batch, &self.quota, now)
                .await
            {
                Ok(fetched) if fetched.persisted => refreshed += 1,
                Ok(_) => {
                    tracing::warn!("Cluster {} fetched but not stored", cluster.key);
                    errors += 1;
                }
                Err(e) => {
                    tracing::warn!(
                        "Cluster {} ({}) failed: {}",
                        cluster.key,
                        cluster.representative_name,
                        e
                    );
                    errors += 1;
                }
            }
        }

        let alerts_fired = self.run_alerts(now).await;
        let quota = self.quota.state().await;

        let summary = RunSummary {
            timestamp: now,
            expires_at: next_bucket_start(now),
            total_spots: self.catalog.len(),
            cluster_count: self.clusters.len(),
            requests_used: quota.per_run_count,
            cache_hits,
            refreshed,
            deferred,
            errors,
            quota_remaining: self.quota.daily_cap().saturating_sub(quota.daily_count),
            alerts_fired,
        };

        tracing::info!(
            "Refresh done: {} refreshed, {} cached, {} deferred, {} errors, {} requests, {} alerts",
            summary.refreshed,
            summary.cache_hits,
            summary.deferred,
            summary.errors,
            summary.requests_used,
            summary.alerts_fired
        );
        summary
    }

    async fn run_alerts(&self, now: DateTime<Utc>) -> usize {
        let Some(evaluator) = &self.alerts else {
            return 0;
        };
        let store = self.service.store();
        match evaluator
            .evaluate(&self.catalog, &self.clusters, store.as_ref(), now)
            .await
        {
            Ok(report) => report.alerts_fired,
            Err(e) => {
                tracing::error!("Alert phase failed: {}", e);
                0
            }
        }
    }
}
