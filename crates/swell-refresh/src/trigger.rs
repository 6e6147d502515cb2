//! HTTP trigger surface.
//!
//! - `GET|POST /api/cron/refresh-forecast`: run the pipeline (shared secret)
//! - `GET /api/spots/{id}/forecast`: on-demand forecast with synthetic fallback
//! - `GET /api/forecast/stats`: quota and cache counters
//! - `GET /healthz`

use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use serde::Serialize;
use subtle::ConstantTimeEq;
use swell_forecast::{find_spot, FetchMode, ForecastSource, HourlyRecord, QuotaTracker};
use tokio::sync::Mutex;
use warp::reply::{Reply, Response};
use warp::{Filter, Rejection};

use crate::error::TriggerError;
use crate::orchestrator::{RefreshOrchestrator, RunSummary};

pub struct TriggerState {
    orchestrator: Arc<RefreshOrchestrator>,
    /// Separate per-run counter over the same daily ledger
    on_demand_quota: Arc<QuotaTracker>,
    cron_secret: Option<String>,
    run_lock: Mutex<()>,
}

impl TriggerState {
    pub fn new(
        orchestrator: Arc<RefreshOrchestrator>,
        on_demand_quota: Arc<QuotaTracker>,
        cron_secret: Option<String>,
    ) -> Arc<Self> {
        Arc::new(Self {
            orchestrator,
            on_demand_quota,
            cron_secret: cron_secret.filter(|s| !s.is_empty()),
            run_lock: Mutex::new(()),
        })
    }

    pub fn orchestrator(&self) -> &RefreshOrchestrator {
        &self.orchestrator
    }

    /// Run the pipeline; concurrent callers in this process queue up.
    pub async fn run_refresh(&self) -> RunSummary {
        let _guard = self.run_lock.lock().await;
        self.orchestrator.run().await
    }

    pub fn is_authorized(&self, authorization: Option<&str>) -> bool {
        authorize(authorization, self.cron_secret.as_deref())
    }
}

/// `Authorization` must be exactly `Bearer <secret>`. Without a configured
/// secret the trigger is open.
pub fn authorize(authorization: Option<&str>, secret: Option<&str>) -> bool {
    let Some(secret) = secret else {
        return true;
    };
    let expected = format!("Bearer {}", secret);
    match authorization {
        Some(given) => given.as_bytes().ct_eq(expected.as_bytes()).into(),
        None => false,
    }
}

#[derive(Debug, Serialize)]
pub struct SpotForecastResponse {
    pub spot_name: String,
    pub source: ForecastSource,
    pub synthetic: bool,
    pub limit_reached: bool,
    pub data: Vec<HourlyRecord>,
}

#[derive(Debug, Serialize)]
pub struct StatsResponse {
    pub daily_count: u32,
    pub daily_limit: u32,
    pub remaining: u32,
    pub reset_date: NaiveDate,
    pub cached_rows: Option<usize>,
}

fn with_state(
    state: Arc<TriggerState>,
) -> impl Filter<Extract = (Arc<TriggerState>,), Error = Infallible> + Clone {
    warp::any().map(move || state.clone())
}

pub fn routes(
    state: Arc<TriggerState>,
) -> impl Filter<Extract = (impl Reply,), Error = Rejection> + Clone {
    let refresh = warp::path!("api" / "cron" / "refresh-forecast")
        .and(warp::get().or(warp::post()).unify())
        .and(warp::header::optional::<String>("authorization"))
        .and(with_state(state.clone()))
        .and_then(handle_refresh);

    let forecast = warp::path!("api" / "spots" / i64 / "forecast")
        .and(warp::get())
        .and(with_state(state.clone()))
        .and_then(handle_forecast);

    let stats = warp::path!("api" / "forecast" / "stats")
        .and(warp::get())
        .and(with_state(state))
        .and_then(handle_stats);

    let health = warp::path!("healthz")
        .and(warp::get())
        .map(|| warp::reply::json(&serde_json::json!({ "status": "ok" })).into_response());

    refresh
        .or(forecast)
        .unify()
        .or(stats)
        .unify()
        .or(health)
        .unify()
        .with(warp::trace::request())
}

async fn handle_refresh(
    authorization: Option<String>,
    state: Arc<TriggerState>,
) -> Result<Response, Infallible> {
    if !state.is_authorized(authorization.as_deref()) {
        tracing::warn!("Rejected refresh trigger: bad or missing secret");
        return Ok(TriggerError::Unauthorized.into_reply().into_response());
    }

    let summary = state.run_refresh().await;
    Ok(warp::reply::json(&summary).into_response())
}

async fn handle_forecast(spot_id: i64, state: Arc<TriggerState>) -> Result<Response, Infallible> {
    let catalog = state.orchestrator.catalog();
    let Some(spot) = find_spot(&catalog, spot_id) else {
        return Ok(TriggerError::SpotNotFound(spot_id).into_reply().into_response());
    };

    // Each request is its own run; the daily ledger is what bounds it.
    state.on_demand_quota.begin_run().await;

    let outcome = state
        .orchestrator
        .service()
        .get_or_fetch(
            spot.lat,
            spot.lng,
            FetchMode::OnDemand,
            &state.on_demand_quota,
            Utc::now(),
        )
        .await;

    match outcome {
        Ok(outcome) => {
            let limit_reached = outcome.limit_reached();
            let row = outcome.into_row();
            let body = SpotForecastResponse {
                spot_name: spot.name.clone(),
                source: row.source,
                synthetic: row.is_synthetic(),
                limit_reached,
                data: row.hourly,
            };
            Ok(warp::reply::json(&body).into_response())
        }
        Err(e) => {
            tracing::error!("On-demand forecast for spot {} failed: {}", spot_id, e);
            Ok(TriggerError::from(e).into_reply().into_response())
        }
    }
}

async fn handle_stats(state: Arc<TriggerState>) -> Result<Response, Infallible> {
    let quota = state.orchestrator.quota();
    let usage = quota.state().await;

    let cached_rows = match state.orchestrator.service().store().row_count().await {
        Ok(count) => Some(count),
        Err(e) => {
            tracing::warn!("Could not count cache rows: {}", e);
            None
        }
    };

    let body = StatsResponse {
        daily_count: usage.daily_count,
        daily_limit: quota.daily_cap(),
        remaining: quota.daily_cap().saturating_sub(usage.daily_count),
        reset_date: usage.reset_date,
        cached_rows,
    };
    Ok(warp::reply::json(&body).into_response())
}

/// Serve the routes until the process exits.
pub async fn serve(state: Arc<TriggerState>, addr: SocketAddr) {
    tracing::info!("Listening on http://{}", addr);
    warp::serve(routes(state)).run(addr).await;
}
