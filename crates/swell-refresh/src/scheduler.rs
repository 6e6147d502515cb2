//! In-process schedule for `serve`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

use crate::trigger::TriggerState;

/// Run the pipeline every `every`, then purge rows that expired more than
/// `retention` ago. The first run happens one interval after start.
pub fn spawn_scheduler(
    state: Arc<TriggerState>,
    every: Duration,
    retention: chrono::Duration,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = interval_at(Instant::now() + every, every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            tracing::info!("Scheduled refresh starting");
            let summary = state.run_refresh().await;
            tracing::info!(
                "Scheduled refresh: {} refreshed, {} errors, {} quota left",
                summary.refreshed,
                summary.errors,
                summary.quota_remaining
            );

            let store = state.orchestrator().service().store();
            match store.purge_expired(Utc::now() - retention).await {
                Ok(0) => {}
                Ok(removed) => tracing::info!("Purged {} expired cache rows", removed),
                Err(e) => tracing::warn!("Cache purge failed: {}", e),
            }
        }
    })
}
