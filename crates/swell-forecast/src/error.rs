//! Forecast-specific error types.

use swell_core::{DatabaseError, NetworkError};
use thiserror::Error;

/// Failure of a single forecast provider.
///
/// Every variant is recoverable by the provider chain: the next provider is
/// tried and the error only surfaces if the whole chain fails.
#[derive(Error, Debug)]
pub enum ProviderError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("HTTP error {status}")]
    Http { status: u16 },

    /// The provider answered with an error payload (quota exceeded, bad key).
    #[error("Provider quota or error payload: {0}")]
    QuotaExhausted(String),

    #[error("Provider returned no hourly data")]
    EmptyPayload,

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Provider client setup failed: {0}")]
    Setup(String),
}

impl ProviderError {
    /// Whether the same request may succeed if repeated.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Network(e) => e.is_transient(),
            Self::Http { status } => *status >= 500 || *status == 429 || *status == 408,
            _ => false,
        }
    }
}

/// Forecast cache errors.
#[derive(Error, Debug)]
pub enum CacheError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Corrupt cache row {key}: {message}")]
    CorruptRow { key: String, message: String },
}

impl From<rusqlite::Error> for CacheError {
    fn from(err: rusqlite::Error) -> Self {
        use swell_core::RusqliteErrorExt;
        Self::Database(err.into_database_error())
    }
}

/// Quota ledger errors. Never escape `QuotaTracker`, which only counts.
#[derive(Error, Debug)]
pub enum QuotaError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Invalid ledger state: {0}")]
    InvalidState(String),
}

impl From<rusqlite::Error> for QuotaError {
    fn from(err: rusqlite::Error) -> Self {
        use swell_core::RusqliteErrorExt;
        Self::Database(err.into_database_error())
    }
}

/// Errors returned by the shared caching/fetch service.
#[derive(Error, Debug)]
pub enum ForecastError {
    /// Every provider in the chain failed (or was skipped for quota).
    #[error("All forecast providers failed: {}", .0.join("; "))]
    AllProvidersFailed(Vec<String>),

    #[error("Cache error: {0}")]
    Cache(#[from] CacheError),

    #[error("Catalog error: {0}")]
    Catalog(String),
}

impl ForecastError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::AllProvidersFailed(_) => "Forecast providers are unavailable right now.",
            Self::Cache(_) => "The forecast cache is unavailable.",
            Self::Catalog(_) => "The spot catalog could not be loaded.",
        }
    }
}
