//! Forecast cache keyed by `CacheKey`, one row per (location, day, bucket).

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{params, Connection, OptionalExtension};
use swell_core::DatabaseError;

use crate::cache_key::CacheKey;
use crate::error::CacheError;
use crate::types::{CacheRow, ForecastSource, HourlyRecord};

/// Storage seam for forecast rows.
///
/// Writes are idempotent upserts keyed by `cache_key`, so concurrent writers
/// converge without locking.
#[async_trait]
pub trait CacheStore: Send + Sync {
    /// A row is returned only while `expires_at > now`; expired rows are misses.
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheRow>, CacheError>;

    async fn put(&self, row: &CacheRow) -> Result<(), CacheError>;

    /// Delete rows that expired before `before`. Returns the number removed.
    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError>;

    async fn row_count(&self) -> Result<usize, CacheError>;
}

/// SQLite-backed forecast cache.
pub struct SqliteCacheStore {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteCacheStore {
    /// Open (or create) the cache at the given path.
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        let conn = Connection::open(path)?;
        conn.busy_timeout(Duration::from_secs(5))?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// In-memory cache for tests and throwaway runs.
    pub fn in_memory() -> Result<Self, CacheError> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<(), CacheError> {
        self.conn.lock().execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS forecast_cache (
                cache_key TEXT PRIMARY KEY,
                lat REAL NOT NULL,
                lng REAL NOT NULL,
                source TEXT NOT NULL,
                data_json TEXT NOT NULL,
                fetched_at INTEGER NOT NULL,
                expires_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_forecast_cache_expires ON forecast_cache(expires_at);
            "#,
        )?;
        Ok(())
    }

    async fn with_conn<T, F>(&self, f: F) -> Result<T, CacheError>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T, CacheError> + Send + 'static,
    {
        let conn = self.conn.clone();
        tokio::task::spawn_blocking(move || f(&conn.lock()))
            .await
            .map_err(|e| CacheError::Database(DatabaseError::Blocking(e.to_string())))?
    }
}

type RawRow = (String, f64, f64, String, String, i64, i64);

fn raw_to_cache_row(raw: RawRow) -> Result<CacheRow, CacheError> {
    let (key, lat, lng, source, data_json, fetched_ms, expires_ms) = raw;
    let corrupt = |message: String| CacheError::CorruptRow {
        key: key.clone(),
        message,
    };

    let source = ForecastSource::parse(&source)
        .ok_or_else(|| corrupt(format!("unknown source '{}'", source)))?;
    let hourly: Vec<HourlyRecord> =
        serde_json::from_str(&data_json).map_err(|e| corrupt(e.to_string()))?;
    let fetched_at = DateTime::from_timestamp_millis(fetched_ms)
        .ok_or_else(|| corrupt("fetched_at out of range".to_string()))?;
    let expires_at = DateTime::from_timestamp_millis(expires_ms)
        .ok_or_else(|| corrupt("expires_at out of range".to_string()))?;

    Ok(CacheRow {
        cache_key: CacheKey::from_raw(key),
        lat,
        lng,
        source,
        hourly,
        fetched_at,
        expires_at,
    })
}

#[async_trait]
impl CacheStore for SqliteCacheStore {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheRow>, CacheError> {
        let key = key.as_str().to_string();
        let now_ms = now.timestamp_millis();

        let raw = self
            .with_conn(move |conn| {
                conn.query_row(
                    r#"
                    SELECT cache_key, lat, lng, source, data_json, fetched_at, expires_at
                    FROM forecast_cache
                    WHERE cache_key = ?1 AND expires_at > ?2
                    "#,
                    params![key, now_ms],
                    |row| {
                        Ok((
                            row.get(0)?,
                            row.get(1)?,
                            row.get(2)?,
                            row.get(3)?,
                            row.get(4)?,
                            row.get(5)?,
                            row.get(6)?,
                        ))
                    },
                )
                .optional()
                .map_err(CacheError::from)
            })
            .await?;

        raw.map(raw_to_cache_row).transpose()
    }

    async fn put(&self, row: &CacheRow) -> Result<(), CacheError> {
        let data_json = serde_json::to_string(&row.hourly).map_err(|e| CacheError::CorruptRow {
            key: row.cache_key.to_string(),
            message: e.to_string(),
        })?;
        let key = row.cache_key.as_str().to_string();
        let (lat, lng) = (row.lat, row.lng);
        let source = row.source.as_str();
        let fetched_ms = row.fetched_at.timestamp_millis();
        let expires_ms = row.expires_at.timestamp_millis();

        self.with_conn(move |conn| {
            conn.execute(
                r#"
                INSERT OR REPLACE INTO forecast_cache
                (cache_key, lat, lng, source, data_json, fetched_at, expires_at)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                "#,
                params![key, lat, lng, source, data_json, fetched_ms, expires_ms],
            )?;
            Ok(())
        })
        .await
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError> {
        let before_ms = before.timestamp_millis();
        self.with_conn(move |conn| {
            let removed = conn.execute(
                "DELETE FROM forecast_cache WHERE expires_at <= ?1",
                params![before_ms],
            )?;
            Ok(removed)
        })
        .await
    }

    async fn row_count(&self) -> Result<usize, CacheError> {
        self.with_conn(|conn| {
            let count: i64 =
                conn.query_row("SELECT COUNT(*) FROM forecast_cache", [], |row| row.get(0))?;
            Ok(usize::try_from(count).unwrap_or_default())
        })
        .await
    }
}

/// Process-local cache, used by tests and when no database is configured.
#[derive(Default)]
pub struct MemoryCacheStore {
    rows: Mutex<HashMap<CacheKey, CacheRow>>,
}

impl MemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Raw lookup that ignores expiry.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheRow> {
        self.rows.lock().get(key).cloned()
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, key: &CacheKey, now: DateTime<Utc>) -> Result<Option<CacheRow>, CacheError> {
        Ok(self
            .rows
            .lock()
            .get(key)
            .filter(|row| row.is_fresh(now))
            .cloned())
    }

    async fn put(&self, row: &CacheRow) -> Result<(), CacheError> {
        self.rows.lock().insert(row.cache_key.clone(), row.clone());
        Ok(())
    }

    async fn purge_expired(&self, before: DateTime<Utc>) -> Result<usize, CacheError> {
        let mut rows = self.rows.lock();
        let initial = rows.len();
        rows.retain(|_, row| row.expires_at > before);
        Ok(initial - rows.len())
    }

    async fn row_count(&self) -> Result<usize, CacheError> {
        Ok(self.rows.lock().len())
    }
}
