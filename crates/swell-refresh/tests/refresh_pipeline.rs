//! End-to-end refresh runs and trigger routes with scripted providers.

#![allow(clippy::unwrap_used)]

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use swell_alerts::{
    AlertError, AlertEvaluator, AlertRule, DispatchOutcome, MemoryAlertStore, Notification,
    NotificationSender, PushSubscription,
};
use swell_core::{DatabaseError, QuotaConfig};
use swell_forecast::{
    CacheError, CacheKey, CacheRow, CacheStore, FetchMode, ForecastProvider, ForecastService,
    ForecastSource, HourlyRecord, MemoryCacheStore, MemoryQuotaLedger, ProviderChain,
    ProviderError, QuotaLedger, QuotaTracker, Spot,
};
use swell_refresh::{routes, RefreshOrchestrator, TriggerState};

fn now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 10, 19, 9, 30, 0).unwrap()
}

/// Quota-limited provider returning one good hour per call.
struct ScriptedPrimary {
    calls: AtomicU32,
    fail: bool,
}

impl ScriptedPrimary {
    fn ok() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail: true,
        })
    }

    fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ForecastProvider for ScriptedPrimary {
    fn source(&self) -> ForecastSource {
        ForecastSource::Stormglass
    }

    fn is_quota_limited(&self) -> bool {
        true
    }

    async fn fetch(
        &self,
        _lat: f64,
        _lng: f64,
        _now: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self.fail {
            return Err(ProviderError::Http { status: 500 });
        }
        Ok(vec![HourlyRecord {
            wave_height: Some(2.0),
            wave_period: Some(12.0),
            ..HourlyRecord::empty(now())
        }])
    }
}

/// Unmetered provider that always answers.
#[derive(Default)]
struct ScriptedSecondary {
    calls: AtomicU32,
}

#[async_trait]
impl ForecastProvider for ScriptedSecondary {
    fn source(&self) -> ForecastSource {
        ForecastSource::OpenMeteo
    }

    async fn fetch(
        &self,
        _lat: f64,
        _lng: f64,
        _now: DateTime<Utc>,
    ) -> Result<Vec<HourlyRecord>, ProviderError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(vec![HourlyRecord {
            wave_height: Some(0.4),
            wave_period: Some(6.0),
            ..HourlyRecord::empty(now())
        }])
    }
}

/// Reads work, writes always fail.
#[derive(Default)]
struct ReadOnlyStore(MemoryCacheStore);

#[async_trait]
impl CacheStore for ReadOnlyStore {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheRow>, CacheError> {
        self.0.get(key, now).await
    }

    async fn put(&self, _row: &CacheRow) -> Result<(), CacheError> {
        Err(CacheError::Database(DatabaseError::Query(
            "database is locked".into(),
        )))
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError> {
        self.0.purge_expired(before).await
    }

    async fn row_count(&self) -> Result<usize, CacheError> {
        self.0.row_count().await
    }
}

#[derive(Default)]
struct RecordingSender {
    sent: Mutex<Vec<i64>>,
}

#[async_trait]
impl NotificationSender for RecordingSender {
    async fn send(
        &self,
        subscription: &PushSubscription,
        _notification: &Notification,
    ) -> Result<DispatchOutcome, AlertError> {
        self.sent.lock().push(subscription.id);
        Ok(DispatchOutcome::Delivered)
    }
}

/// Two spots sharing a cluster plus one on their own.
fn three_spots() -> Vec<Spot> {
    vec![
        Spot::new(1, "Pair A", 43.6601, -1.4480),
        Spot::new(2, "Pair B", 43.6601, -1.4479),
        Spot::new(3, "Alone", 44.5000, -1.2500),
    ]
}

fn quota(per_run_cap: u32) -> Arc<QuotaTracker> {
    Arc::new(QuotaTracker::in_memory(QuotaConfig {
        daily_cap: 500,
        per_run_cap,
    }))
}

fn orchestrator(
    spots: Vec<Spot>,
    store: Arc<dyn CacheStore>,
    primary: Arc<ScriptedPrimary>,
    quota: Arc<QuotaTracker>,
) -> RefreshOrchestrator {
    let service = Arc::new(ForecastService::new(
        store,
        ProviderChain::default().with_provider(primary),
    ));
    RefreshOrchestrator::new(spots, service, quota)
}

#[tokio::test]
async fn test_cap_of_one_refreshes_one_cluster_and_defers_the_other() {
    let primary = ScriptedPrimary::ok();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary.clone(),
        quota(1),
    );

    let summary = orch.run_at(now()).await;

    assert_eq!(primary.calls(), 1);
    assert_eq!(summary.total_spots, 3);
    assert_eq!(summary.cluster_count, 2);
    assert_eq!(summary.refreshed, 1);
    assert_eq!(summary.deferred, 1);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.requests_used, 1);
    assert_eq!(summary.quota_remaining, 499);
    assert_eq!(
        summary.expires_at,
        Utc.with_ymd_and_hms(2026, 10, 19, 12, 0, 0).unwrap()
    );
}

#[tokio::test]
async fn test_second_run_in_bucket_hits_cache_then_fetches_deferred() {
    let primary = ScriptedPrimary::ok();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary.clone(),
        quota(1),
    );

    orch.run_at(now()).await;
    let second = orch.run_at(now()).await;

    assert_eq!(second.cache_hits, 1);
    assert_eq!(second.refreshed, 1);
    assert_eq!(second.deferred, 0);
    assert_eq!(primary.calls(), 2);
}

#[tokio::test]
async fn test_failed_clusters_are_counted_and_run_continues() {
    let primary = ScriptedPrimary::failing();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary.clone(),
        quota(10),
    );

    let summary = orch.run_at(now()).await;

    assert_eq!(primary.calls(), 2);
    assert_eq!(summary.errors, 2);
    assert_eq!(summary.refreshed, 0);
    assert_eq!(summary.deferred, 0);
}

async fn spent_daily_quota() -> Arc<QuotaTracker> {
    let ledger = Arc::new(MemoryQuotaLedger::new());
    ledger
        .increment(500, Utc::now().date_naive())
        .await
        .unwrap();
    Arc::new(QuotaTracker::new(
        ledger,
        QuotaConfig {
            daily_cap: 500,
            per_run_cap: 120,
        },
    ))
}

#[tokio::test]
async fn test_spent_daily_quota_falls_back_to_secondary() {
    let primary = ScriptedPrimary::ok();
    let secondary = Arc::new(ScriptedSecondary::default());
    let service = Arc::new(ForecastService::new(
        Arc::new(MemoryCacheStore::new()),
        ProviderChain::default()
            .with_provider(primary.clone())
            .with_provider(secondary.clone()),
    ));
    let orch = RefreshOrchestrator::new(three_spots(), service, spent_daily_quota().await);

    let summary = orch.run_at(now()).await;

    assert_eq!(primary.calls(), 0);
    assert_eq!(secondary.calls.load(Ordering::SeqCst), 2);
    assert_eq!(summary.refreshed, 2);
    assert_eq!(summary.deferred, 0);
    assert_eq!(summary.errors, 0);
    assert_eq!(summary.requests_used, 0);
    assert_eq!(summary.quota_remaining, 0);
}

#[tokio::test]
async fn test_spent_daily_quota_defers_when_primary_is_only_provider() {
    let primary = ScriptedPrimary::ok();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary.clone(),
        spent_daily_quota().await,
    );

    let summary = orch.run_at(now()).await;

    assert_eq!(summary.deferred, 2);
    assert_eq!(summary.refreshed, 0);
    assert_eq!(summary.quota_remaining, 0);
    assert_eq!(primary.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_delay_only_between_fetches() {
    let primary = ScriptedPrimary::ok();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary.clone(),
        quota(10),
    )
    .with_request_delay(Duration::from_millis(300));

    let started = tokio::time::Instant::now();
    orch.run_at(now()).await;
    let elapsed = started.elapsed();

    assert_eq!(primary.calls(), 2);
    assert!(elapsed >= Duration::from_millis(300));
    assert!(elapsed < Duration::from_millis(600));

    // All hits now: no pauses at all.
    let started = tokio::time::Instant::now();
    let summary = orch.run_at(now()).await;
    assert_eq!(summary.cache_hits, 2);
    assert!(started.elapsed() < Duration::from_millis(300));
}

fn alert_setup() -> (Arc<AlertEvaluator>, Arc<RecordingSender>) {
    let store = Arc::new(MemoryAlertStore::new());
    store.add_rule(AlertRule {
        id: 1,
        user_id: "u1".into(),
        spot_id: 3,
        spot_name: "Alone".into(),
        min_height: 1.0,
        min_period: 8.0,
        active: true,
    });
    store.add_subscription(PushSubscription {
        id: 10,
        user_id: "u1".into(),
        payload: serde_json::json!({"endpoint": "https://push.example/10"}),
    });
    let sender = Arc::new(RecordingSender::default());
    let evaluator = AlertEvaluator::new(store.clone(), store, sender.clone());
    (Arc::new(evaluator), sender)
}

#[tokio::test]
async fn test_alert_fires_after_successful_refresh() {
    let (evaluator, sender) = alert_setup();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        ScriptedPrimary::ok(),
        quota(10),
    )
    .with_alerts(evaluator);

    let summary = orch.run_at(now()).await;

    assert_eq!(summary.refreshed, 2);
    assert_eq!(summary.alerts_fired, 1);
    assert_eq!(*sender.sent.lock(), vec![10]);
}

#[tokio::test]
async fn test_on_demand_synthetic_forecast_is_invisible_to_batch_and_alerts() {
    let (evaluator, sender) = alert_setup();
    let primary = ScriptedPrimary::failing();
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary.clone(),
        quota(10),
    )
    .with_alerts(evaluator);

    let on_demand = QuotaTracker::in_memory(QuotaConfig {
        daily_cap: 500,
        per_run_cap: 500,
    });
    let row = orch
        .service()
        .get_or_fetch(44.5, -1.25, FetchMode::OnDemand, &on_demand, now())
        .await
        .unwrap()
        .into_row();
    assert!(row.is_synthetic());

    let summary = orch.run_at(now()).await;

    assert_eq!(summary.cache_hits, 0);
    assert_eq!(summary.errors, 2);
    assert_eq!(summary.alerts_fired, 0);
    assert!(sender.sent.lock().is_empty());
    assert_eq!(orch.service().store().row_count().await.unwrap(), 0);
}

#[tokio::test]
async fn test_persist_failure_is_error_and_blinds_alert_phase() {
    let (evaluator, sender) = alert_setup();
    let primary = ScriptedPrimary::ok();
    let orch = orchestrator(
        three_spots(),
        Arc::new(ReadOnlyStore::default()),
        primary.clone(),
        quota(10),
    )
    .with_alerts(evaluator);

    let summary = orch.run_at(now()).await;

    assert_eq!(primary.calls(), 2);
    assert_eq!(summary.refreshed, 0);
    assert_eq!(summary.errors, 2);
    assert_eq!(summary.alerts_fired, 0);
    assert!(sender.sent.lock().is_empty());
}

#[tokio::test]
async fn test_summary_json_is_snake_case() {
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        ScriptedPrimary::ok(),
        quota(1),
    );
    let summary = orch.run_at(now()).await;
    let json = serde_json::to_value(&summary).unwrap();

    for field in [
        "timestamp",
        "expires_at",
        "total_spots",
        "cluster_count",
        "requests_used",
        "cache_hits",
        "refreshed",
        "deferred",
        "errors",
        "quota_remaining",
        "alerts_fired",
    ] {
        assert!(json.get(field).is_some(), "missing {}", field);
    }
}

fn trigger_state(primary: Arc<ScriptedPrimary>, secret: Option<&str>) -> Arc<TriggerState> {
    let orch = orchestrator(
        three_spots(),
        Arc::new(MemoryCacheStore::new()),
        primary,
        quota(10),
    );
    TriggerState::new(Arc::new(orch), quota(500), secret.map(str::to_string))
}

#[tokio::test]
async fn test_refresh_trigger_rejects_bad_secret_without_running() {
    let primary = ScriptedPrimary::ok();
    let api = routes(trigger_state(primary.clone(), Some("s3cret")));

    let missing = warp::test::request()
        .method("POST")
        .path("/api/cron/refresh-forecast")
        .reply(&api)
        .await;
    assert_eq!(missing.status(), 401);

    let wrong = warp::test::request()
        .method("GET")
        .path("/api/cron/refresh-forecast")
        .header("authorization", "Bearer nope")
        .reply(&api)
        .await;
    assert_eq!(wrong.status(), 401);

    assert_eq!(primary.calls(), 0);
}

#[tokio::test]
async fn test_refresh_trigger_runs_with_secret() {
    let primary = ScriptedPrimary::ok();
    let api = routes(trigger_state(primary.clone(), Some("s3cret")));

    let resp = warp::test::request()
        .method("POST")
        .path("/api/cron/refresh-forecast")
        .header("authorization", "Bearer s3cret")
        .reply(&api)
        .await;

    assert_eq!(resp.status(), 200);
    let summary: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(summary["cluster_count"], 2);
    assert_eq!(summary["errors"], 0);
    assert_eq!(primary.calls(), 2);
}

#[tokio::test]
async fn test_spot_forecast_route() {
    let api = routes(trigger_state(ScriptedPrimary::failing(), None));

    let unknown = warp::test::request()
        .path("/api/spots/999/forecast")
        .reply(&api)
        .await;
    assert_eq!(unknown.status(), 404);

    let resp = warp::test::request()
        .path("/api/spots/3/forecast")
        .reply(&api)
        .await;
    assert_eq!(resp.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(resp.body()).unwrap();
    assert_eq!(body["spot_name"], "Alone");
    assert_eq!(body["source"], "synthetic");
    assert_eq!(body["synthetic"], true);
    assert_eq!(body["data"].as_array().unwrap().len(), 168);
}

#[tokio::test]
async fn test_stats_and_health_routes() {
    let api = routes(trigger_state(ScriptedPrimary::ok(), None));

    let stats = warp::test::request()
        .path("/api/forecast/stats")
        .reply(&api)
        .await;
    assert_eq!(stats.status(), 200);
    let body: serde_json::Value = serde_json::from_slice(stats.body()).unwrap();
    assert_eq!(body["daily_limit"], 500);
    assert_eq!(body["remaining"], 500);
    assert_eq!(body["cached_rows"], 0);

    let health = warp::test::request().path("/healthz").reply(&api).await;
    assert_eq!(health.status(), 200);
}
