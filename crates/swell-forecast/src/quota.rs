//! Primary-provider request budget.
//!
//! The daily counter lives in a `QuotaLedger`, which may be shared between
//! processes (SQLite) or local to one (memory). The per-run counter is always
//! process-local and only reset by `begin_run`.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection};
use serde::Serialize;
use swell_core::{DatabaseError, QuotaConfig};

use crate::error::QuotaError;

/// Stored daily usage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DailyUsage {
    pub count: u32,
    pub reset_date: NaiveDate,
}

impl DailyUsage {
    /// Count as seen on `today`: a stale date means nothing was used yet.
    pub fn effective_count(&self, today: NaiveDate) -> u32 {
        if self.reset_date == today {
            self.count
        } else {
            0
        }
    }
}

impl Default for DailyUsage {
    fn default() -> Self {
        Self {
            count: 0,
            reset_date: NaiveDate::MIN,
        }
    }
}

/// Snapshot reported by stats and run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct QuotaState {
    pub daily_count: u32,
    pub reset_date: NaiveDate,
    pub per_run_count: u32,
}

/// Storage for the daily counter.
#[async_trait]
pub trait QuotaLedger: Send + Sync {
    async fn usage(&self) -> Result<DailyUsage, QuotaError>;

    /// Zero the counter if its date is not `today`. Returns true on reset.
    async fn reset_if_stale(&self, today: NaiveDate) -> Result<bool, QuotaError>;

    /// Unconditional increment, rolling the date over if needed.
    async fn increment(&self, n: u32, today: NaiveDate) -> Result<(), QuotaError>;

    /// Increment only if the result stays within `cap`. Returns whether it did.
    async fn try_increment(&self, n: u32, cap: u32, today: NaiveDate) -> Result<bool, QuotaError>;
}

/// Process-local ledger.
#[derive(Debug, Default)]
pub struct MemoryQuotaLedger {
    usage: Mutex<DailyUsage>,
}

impl MemoryQuotaLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_usage(usage: DailyUsage) -> Self {
        Self {
            usage: Mutex::new(usage),
        }
    }
}

#[async_trait]
impl QuotaLedger for MemoryQuotaLedger {
    async fn usage(&self) -> Result<DailyUsage, QuotaError> {
        Ok(*self.usage.lock())
    }

    async fn reset_if_stale(&self, today: NaiveDate) -> Result<bool, QuotaError> {
        let mut usage = self.usage.lock();
        if usage.reset_date == today {
            return Ok(false);
        }
        *usage = DailyUsage {
            count: 0,
            reset_date: today,
        };
        Ok(true)
    }

    async fn increment(&self, n: u32, today: NaiveDate) -> Result<(), QuotaError> {
        let mut usage = self.usage.lock();
        *usage = DailyUsage {
            count: usage.effective_count(today).saturating_add(n),
            reset_date: today,
        };
        Ok(())
    }

    async fn try_increment(&self, n: u32, cap: u32, today: NaiveDate) -> Result<bool, QuotaError> {
        let mut usage = self.usage.lock();
        let next = usage.effective_count(today).saturating_add(n);
        if next > cap {
            return Ok(false);
        }
        *usage = DailyUsage {
            count: next,
            reset_date: today,
        };
        Ok(true)
    }
}

/// Ledger stored in a single-row SQLite table.
///
/// Increments are one conditional `UPDATE`, so any number of connections to
/// the same database file share one budget. Statements run on the blocking
/// pool; a busy database can make them wait up to the busy timeout.
pub struct SqliteQuotaLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteQuotaLedger {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, QuotaError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        Self::with_connection(conn)
    }

    pub fn in_memory() -> Result<Self, QuotaError> {
        Self::with_connection(Connection::open_in_memory()?)
    }

    fn with_connection(conn: Connection) -> Result<Self, QuotaError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS quota_ledger (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                daily_count INTEGER NOT NULL,
                reset_date TEXT NOT NULL
            );

            INSERT OR IGNORE INTO quota_ledger (id, daily_count, reset_date)
            VALUES (1, 0, '1970-01-01');
            "#,
        )?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, QuotaError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, QuotaError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| QuotaError::Database(DatabaseError::Blocking(e.to_string())))?
    }
}

#[async_trait]
impl QuotaLedger for SqliteQuotaLedger {
    async fn usage(&self) -> Result<DailyUsage, QuotaError> {
        self.with_conn(|conn| {
            let (count, reset_date): (u32, String) = conn.query_row(
                "SELECT daily_count, reset_date FROM quota_ledger WHERE id = 1",
                [],
                |row| Ok((row.get(0)?, row.get(1)?)),
            )?;
            let reset_date = NaiveDate::parse_from_str(&reset_date, "%Y-%m-%d").map_err(|e| {
                QuotaError::InvalidState(format!("reset_date '{}': {}", reset_date, e))
            })?;
            Ok(DailyUsage { count, reset_date })
        })
        .await
    }

    async fn reset_if_stale(&self, today: NaiveDate) -> Result<bool, QuotaError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                "UPDATE quota_ledger SET daily_count = 0, reset_date = ?1 \
                 WHERE id = 1 AND reset_date != ?1",
                params![today.to_string()],
            )?;
            Ok(changed > 0)
        })
        .await
    }

    async fn increment(&self, n: u32, today: NaiveDate) -> Result<(), QuotaError> {
        self.with_conn(move |conn| {
            conn.execute(
                r#"
                UPDATE quota_ledger
                SET daily_count = CASE WHEN reset_date = ?1 THEN daily_count + ?2 ELSE ?2 END,
                    reset_date = ?1
                WHERE id = 1
                "#,
                params![today.to_string(), n],
            )?;
            Ok(())
        })
        .await
    }

    async fn try_increment(&self, n: u32, cap: u32, today: NaiveDate) -> Result<bool, QuotaError> {
        self.with_conn(move |conn| {
            let changed = conn.execute(
                r#"
                UPDATE quota_ledger
                SET daily_count = CASE WHEN reset_date = ?1 THEN daily_count + ?2 ELSE ?2 END,
                    reset_date = ?1
                WHERE id = 1
                  AND (CASE WHEN reset_date = ?1 THEN daily_count ELSE 0 END) + ?2 <= ?3
                "#,
                params![today.to_string(), n, cap],
            )?;
            Ok(changed == 1)
        })
        .await
    }
}

/// Enforces the per-run and daily caps on primary-provider requests.
///
/// Only counts. Ledger failures are logged and treated as "no budget".
pub struct QuotaTracker {
    ledger: Arc<dyn QuotaLedger>,
    caps: QuotaConfig,
    per_run_count: Mutex<u32>,
}

impl QuotaTracker {
    pub fn new(ledger: Arc<dyn QuotaLedger>, caps: QuotaConfig) -> Self {
        Self {
            ledger,
            caps,
            per_run_count: Mutex::new(0),
        }
    }

    /// Tracker over a fresh process-local ledger.
    pub fn in_memory(caps: QuotaConfig) -> Self {
        Self::new(Arc::new(MemoryQuotaLedger::new()), caps)
    }

    pub fn daily_cap(&self) -> u32 {
        self.caps.daily_cap
    }

    pub fn per_run_cap(&self) -> u32 {
        self.caps.per_run_cap
    }

    /// Start a new run: zero the per-run counter and roll the day over.
    pub async fn begin_run(&self) {
        *self.per_run_count.lock() = 0;
        self.maybe_reset().await;
    }

    pub async fn maybe_reset(&self) {
        self.maybe_reset_on(today()).await;
    }

    pub async fn maybe_reset_on(&self, today: NaiveDate) {
        match self.ledger.reset_if_stale(today).await {
            Ok(true) => tracing::info!("Quota day rolled over to {}", today),
            Ok(false) => {}
            Err(e) => tracing::warn!("Quota ledger reset failed: {}", e),
        }
    }

    /// Whether `n` more requests fit under the per-run cap. The daily cap is
    /// not consulted.
    pub fn run_has_room(&self, n: u32) -> bool {
        self.per_run_count.lock().saturating_add(n) <= self.caps.per_run_cap
    }

    pub async fn can_consume(&self, n: u32) -> bool {
        let today = today();
        self.maybe_reset_on(today).await;

        if !self.run_has_room(n) {
            return false;
        }
        match self.ledger.usage().await {
            Ok(usage) => usage.effective_count(today).saturating_add(n) <= self.caps.daily_cap,
            Err(e) => {
                tracing::warn!("Quota ledger unreadable, refusing request: {}", e);
                false
            }
        }
    }

    /// Record `n` requests without checking the caps.
    pub async fn consume(&self, n: u32) {
        {
            let mut per_run = self.per_run_count.lock();
            *per_run = per_run.saturating_add(n);
        }
        if let Err(e) = self.ledger.increment(n, today()).await {
            tracing::warn!("Quota ledger increment failed: {}", e);
        }
    }

    /// Check both caps and record `n` requests in one step.
    pub async fn try_consume(&self, n: u32) -> bool {
        let today = today();
        self.maybe_reset_on(today).await;

        // Hold the per-run slot while the ledger decides, give it back if refused.
        if !self.reserve_run(n) {
            tracing::debug!("Per-run quota reached ({})", self.caps.per_run_cap);
            return false;
        }
        match self.ledger.try_increment(n, self.caps.daily_cap, today).await {
            Ok(true) => true,
            Ok(false) => {
                tracing::debug!("Daily quota reached ({})", self.caps.daily_cap);
                self.release_run(n);
                false
            }
            Err(e) => {
                tracing::warn!("Quota ledger increment failed, refusing request: {}", e);
                self.release_run(n);
                false
            }
        }
    }

    fn reserve_run(&self, n: u32) -> bool {
        let mut per_run = self.per_run_count.lock();
        let next = per_run.saturating_add(n);
        if next > self.caps.per_run_cap {
            return false;
        }
        *per_run = next;
        true
    }

    fn release_run(&self, n: u32) {
        let mut per_run = self.per_run_count.lock();
        *per_run = per_run.saturating_sub(n);
    }

    pub async fn state(&self) -> QuotaState {
        let today = today();
        let usage = self.ledger.usage().await;
        let per_run_count = *self.per_run_count.lock();
        match usage {
            Ok(usage) => QuotaState {
                daily_count: usage.effective_count(today),
                reset_date: today,
                per_run_count,
            },
            Err(e) => {
                tracing::warn!("Quota ledger unreadable: {}", e);
                QuotaState {
                    daily_count: self.caps.daily_cap,
                    reset_date: today,
                    per_run_count,
                }
            }
        }
    }

    pub async fn remaining_today(&self) -> u32 {
        self.caps
            .daily_cap
            .saturating_sub(self.state().await.daily_count)
    }
}

fn today() -> NaiveDate {
    Utc::now().date_naive()
}
