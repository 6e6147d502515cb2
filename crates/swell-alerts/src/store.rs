//! Read-only access to alert rules and push subscriptions.
//!
//! Both tables belong to the user-facing alert flow; this crate never writes
//! them outside of tests.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use swell_core::DatabaseError;

use crate::error::AlertError;
use crate::types::{AlertRule, PushSubscription};

#[async_trait]
pub trait AlertRuleStore: Send + Sync {
    async fn active_rules(&self) -> Result<Vec<AlertRule>, AlertError>;
}

#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<PushSubscription>, AlertError>;
}

/// SQLite view over `alert_rules` and `push_subscriptions`.
pub struct SqliteAlertStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteAlertStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, AlertError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Tables are created empty on a fresh database so reads succeed.
    fn init_schema(&self) -> Result<(), AlertError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS alert_rules (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                spot_id INTEGER NOT NULL,
                spot_name TEXT NOT NULL,
                min_height REAL NOT NULL,
                min_period REAL NOT NULL,
                active INTEGER NOT NULL DEFAULT 1
            );

            CREATE TABLE IF NOT EXISTS push_subscriptions (
                id INTEGER PRIMARY KEY,
                user_id TEXT NOT NULL,
                subscription_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_push_subscriptions_user ON push_subscriptions(user_id);
            "#,
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, AlertError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, AlertError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| AlertError::Database(DatabaseError::Blocking(e.to_string())))?
    }
}

#[async_trait]
impl AlertRuleStore for SqliteAlertStore {
    async fn active_rules(&self) -> Result<Vec<AlertRule>, AlertError> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(
                r#"
                SELECT id, user_id, spot_id, spot_name, min_height, min_period, active
                FROM alert_rules
                WHERE active = 1
                ORDER BY id
                "#,
            )?;
            let rules = stmt
                .query_map([], |row| {
                    Ok(AlertRule {
                        id: row.get(0)?,
                        user_id: row.get(1)?,
                        spot_id: row.get(2)?,
                        spot_name: row.get(3)?,
                        min_height: row.get(4)?,
                        min_period: row.get(5)?,
                        active: row.get(6)?,
                    })
                })?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(rules)
        })
        .await
    }
}

#[async_trait]
impl SubscriptionStore for SqliteAlertStore {
    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<PushSubscription>, AlertError> {
        let user_id = user_id.to_string();
        self.with_conn(move |conn| {
            let mut stmt = conn.prepare(
                "SELECT id, user_id, subscription_json FROM push_subscriptions WHERE user_id = ?1 ORDER BY id",
            )?;
            let raw = stmt
                .query_map(params![user_id], |row| {
                    Ok((
                        row.get::<_, i64>(0)?,
                        row.get::<_, String>(1)?,
                        row.get::<_, String>(2)?,
                    ))
                })?
                .collect::<Result<Vec<_>, _>>()?;

            // A malformed row only costs its own delivery.
            Ok(raw
                .into_iter()
                .filter_map(|(id, user_id, json)| match serde_json::from_str(&json) {
                    Ok(payload) => Some(PushSubscription {
                        id,
                        user_id,
                        payload,
                    }),
                    Err(e) => {
                        tracing::warn!("Skipping malformed push subscription {}: {}", id, e);
                        None
                    }
                })
                .collect())
        })
        .await
    }
}

/// In-process rules and subscriptions.
#[derive(Default)]
pub struct MemoryAlertStore {
    rules: Mutex<Vec<AlertRule>>,
    subscriptions: Mutex<Vec<PushSubscription>>,
}

impl MemoryAlertStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_rule(&self, rule: AlertRule) {
        self.rules.lock().push(rule);
    }

    pub fn add_subscription(&self, subscription: PushSubscription) {
        self.subscriptions.lock().push(subscription);
    }
}

#[async_trait]
impl AlertRuleStore for MemoryAlertStore {
    async fn active_rules(&self) -> Result<Vec<AlertRule>, AlertError> {
        Ok(self
            .rules
            .lock()
            .iter()
            .filter(|r| r.active)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl SubscriptionStore for MemoryAlertStore {
    async fn subscriptions_for_user(&self, user_id: &str) -> Result<Vec<PushSubscription>, AlertError> {
        Ok(self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect())
    }
}
