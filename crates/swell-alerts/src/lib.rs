//! Alert evaluation and push notification fan-out for SwellSync.

pub mod error;
pub mod evaluator;
pub mod notifier;
pub mod store;
pub mod types;

pub use error::AlertError;
pub use evaluator::{AlertEvaluator, AlertReport};
pub use notifier::{DisabledSender, DispatchOutcome, HttpPushSender, NotificationSender};
pub use store::{AlertRuleStore, MemoryAlertStore, SqliteAlertStore, SubscriptionStore};
pub use swell_core::AlertKeyMode;
pub use types::{AlertRule, Notification, NotificationMetadata, PushSubscription};
