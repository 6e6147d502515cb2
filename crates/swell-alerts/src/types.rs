use serde::{Deserialize, Serialize};
use swell_forecast::HourlyRecord;

/// A user's wave threshold for one spot.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: i64,
    pub user_id: String,
    pub spot_id: i64,
    pub spot_name: String,
    pub min_height: f64,
    pub min_period: f64,
    #[serde(default = "default_active")]
    pub active: bool,
}

fn default_active() -> bool {
    true
}

impl AlertRule {
    /// Inclusive on both thresholds. Missing values never match.
    pub fn is_met_by(&self, record: &HourlyRecord) -> bool {
        match (record.wave_height, record.wave_period) {
            (Some(height), Some(period)) => height >= self.min_height && period >= self.min_period,
            _ => false,
        }
    }
}

/// An opaque web-push registration owned by the user's browser.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    pub id: i64,
    pub user_id: String,
    pub payload: serde_json::Value,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationMetadata {
    pub spot_id: i64,
    pub rule_id: i64,
    pub url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub metadata: NotificationMetadata,
}

impl Notification {
    pub fn for_rule(rule: &AlertRule, record: &HourlyRecord) -> Self {
        let height = record.wave_height.unwrap_or_default();
        let period = record.wave_period.unwrap_or_default();
        Self {
            title: format!("🌊 {} — conditions are on!", rule.spot_name),
            body: format!("Swell {:.1}m · Period {:.0}s", height, period),
            metadata: NotificationMetadata {
                spot_id: rule.spot_id,
                rule_id: rule.id,
                url: format!("/pages/spot_detail.html?id={}", rule.spot_id),
            },
        }
    }
}
