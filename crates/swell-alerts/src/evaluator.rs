//! Threshold evaluation against cached forecasts, and push fan-out.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use swell_core::AlertKeyMode;
use swell_forecast::{CacheKey, CacheStore, Spot, SpotClusters};
use tracing::instrument;

use crate::error::AlertError;
use crate::notifier::{DispatchOutcome, NotificationSender};
use crate::store::{AlertRuleStore, SubscriptionStore};
use crate::types::{AlertRule, Notification};

/// Counters for one alert pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct AlertReport {
    pub rules_checked: usize,
    pub rules_matched: usize,
    /// Successful deliveries, one per subscription
    pub alerts_fired: usize,
    pub skipped_unknown_spot: usize,
    pub skipped_no_forecast: usize,
    pub dispatch_failures: usize,
    pub expired_subscriptions: usize,
}

pub struct AlertEvaluator {
    rules: Arc<dyn AlertRuleStore>,
    subscriptions: Arc<dyn SubscriptionStore>,
    sender: Arc<dyn NotificationSender>,
    key_mode: AlertKeyMode,
}

impl AlertEvaluator {
    pub fn new(
        rules: Arc<dyn AlertRuleStore>,
        subscriptions: Arc<dyn SubscriptionStore>,
        sender: Arc<dyn NotificationSender>,
    ) -> Self {
        Self {
            rules,
            subscriptions,
            sender,
            key_mode: AlertKeyMode::default(),
        }
    }

    pub fn with_key_mode(mut self, key_mode: AlertKeyMode) -> Self {
        self.key_mode = key_mode;
        self
    }

    pub fn key_mode(&self) -> AlertKeyMode {
        self.key_mode
    }

    /// Cache key a rule's spot is looked up under.
    ///
    /// With `SpotCoordinates` the key comes from the spot itself, which can
    /// differ at three decimals from the row its cluster representative wrote.
    pub fn lookup_key(
        &self,
        spot: &Spot,
        clusters: &SpotClusters,
        now: DateTime<Utc>,
    ) -> CacheKey {
        match self.key_mode {
            AlertKeyMode::SpotCoordinates => CacheKey::for_location(spot.lat, spot.lng, now),
            AlertKeyMode::ClusterRepresentative => match clusters.cluster_of(spot.id) {
                Some(cluster) => CacheKey::for_location(
                    cluster.representative_lat,
                    cluster.representative_lng,
                    now,
                ),
                None => CacheKey::for_location(spot.lat, spot.lng, now),
            },
        }
    }

    /// Evaluate every active rule. Only a failure to load the rules is an
    /// error; everything per rule or per subscription is counted and skipped.
    #[instrument(skip_all, level = "info")]
    pub async fn evaluate(
        &self,
        catalog: &[Spot],
        clusters: &SpotClusters,
        cache: &dyn CacheStore,
        now: DateTime<Utc>,
    ) -> Result<AlertReport, AlertError> {
        let rules = self.rules.active_rules().await?;
        let mut report = AlertReport {
            rules_checked: rules.len(),
            ..AlertReport::default()
        };

        for rule in &rules {
            let Some(spot) = catalog.iter().find(|s| s.id == rule.spot_id) else {
                tracing::debug!("Rule {} targets unknown spot {}", rule.id, rule.spot_id);
                report.skipped_unknown_spot += 1;
                continue;
            };

            let key = self.lookup_key(spot, clusters, now);
            let row = match cache.get(&key, now).await {
                Ok(Some(row)) if row.is_synthetic() => {
                    tracing::debug!("Ignoring synthetic forecast {} for rule {}", key, rule.id);
                    report.skipped_no_forecast += 1;
                    continue;
                }
                Ok(Some(row)) => row,
                Ok(None) => {
                    tracing::debug!("No fresh forecast under {} for rule {}", key, rule.id);
                    report.skipped_no_forecast += 1;
                    continue;
                }
                Err(e) => {
                    tracing::warn!("Cache lookup {} failed for rule {}: {}", key, rule.id, e);
                    report.skipped_no_forecast += 1;
                    continue;
                }
            };

            let Some(record) = row.current_record(now) else {
                report.skipped_no_forecast += 1;
                continue;
            };

            if !rule.is_met_by(record) {
                continue;
            }

            report.rules_matched += 1;
            let notification = Notification::for_rule(rule, record);
            self.fan_out(rule, &notification, &mut report).await;
        }

        tracing::info!(
            "Alert pass: {} rules, {} matched, {} notifications sent",
            report.rules_checked,
            report.rules_matched,
            report.alerts_fired
        );
        Ok(report)
    }

    /// Send to each of the user's subscriptions in turn; one failure never
    /// stops the others.
    async fn fan_out(
        &self,
        rule: &AlertRule,
        notification: &Notification,
        report: &mut AlertReport,
    ) {
        let subscriptions = match self.subscriptions.subscriptions_for_user(&rule.user_id).await {
            Ok(subs) => subs,
            Err(e) => {
                tracing::warn!("Could not load subscriptions for rule {}: {}", rule.id, e);
                report.dispatch_failures += 1;
                return;
            }
        };

        for subscription in &subscriptions {
            match self.sender.send(subscription, notification).await {
                Ok(DispatchOutcome::Delivered) => report.alerts_fired += 1,
                Ok(DispatchOutcome::Expired) => report.expired_subscriptions += 1,
                Ok(DispatchOutcome::Skipped) => {}
                Err(e) => {
                    tracing::warn!(
                        "Push to subscription {} for rule {} failed: {}",
                        subscription.id,
                        rule.id,
                        e
                    );
                    report.dispatch_failures += 1;
                }
            }
        }
    }
}
