//! Shared error types for the SwellSync workspace.
//!
//! Domain crates wrap [`NetworkError`] and [`DatabaseError`] in their own
//! enums; the binary surfaces startup failures as [`AppError`].

use thiserror::Error;

/// Startup failures of the `swellsync` binary.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Spot catalog unavailable: {0}")]
    CatalogUnavailable(String),

    #[error("Storage error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Upstream error: {0}")]
    Network(#[from] NetworkError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl AppError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Config(e) => e.user_message(),
            AppError::CatalogUnavailable(_) => "Spot catalog is unavailable.",
            AppError::Database(e) => e.user_message(),
            AppError::Network(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed.",
        }
    }

    /// Process exit code for the CLI (sysexits values).
    pub fn exit_code(&self) -> u8 {
        match self {
            AppError::Config(e) => e.exit_code(),
            AppError::CatalogUnavailable(_) => 66,
            AppError::Database(_) | AppError::Io(_) => 74,
            AppError::Network(_) => 69,
        }
    }
}

/// Failures talking to forecast providers or the push gateway.
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Host unreachable: {0}")]
    Unreachable(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Upstream answered {status}: {message}")]
    Status { status: u16, message: String },

    #[error("Could not decode response: {0}")]
    Decode(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::Unreachable(_) => "Unable to reach an upstream service.",
            NetworkError::Timeout => "An upstream request timed out.",
            NetworkError::Status { status, .. } if *status >= 500 => {
                "An upstream service is experiencing issues."
            }
            NetworkError::Status { .. } => "An upstream request was rejected.",
            NetworkError::Decode(_) => "Received an unexpected upstream response.",
        }
    }

    /// Whether repeating the request could help.
    pub fn is_transient(&self) -> bool {
        match self {
            NetworkError::Unreachable(_) | NetworkError::Timeout => true,
            NetworkError::Status { status, .. } => *status >= 500 || *status == 429,
            NetworkError::Decode(_) => false,
        }
    }
}

/// SQLite failures in the cache, quota ledger and alert tables.
#[derive(Debug, Error)]
pub enum DatabaseError {
    #[error("Could not open database: {0}")]
    Open(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Database corrupt: {0}")]
    Corrupt(String),

    /// The blocking task running the query panicked or was cancelled.
    #[error("Storage task failed: {0}")]
    Blocking(String),
}

impl DatabaseError {
    pub fn user_message(&self) -> &'static str {
        match self {
            DatabaseError::Open(_) => "Unable to open the forecast database.",
            DatabaseError::Query(_) => "A storage operation failed.",
            DatabaseError::Corrupt(_) => "The forecast database may be corrupted.",
            DatabaseError::Blocking(_) => "A storage task was interrupted.",
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Malformed configuration file: {0}")]
    Malformed(String),
}

impl ConfigError {
    pub fn exit_code(&self) -> u8 {
        78
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::Malformed(_) => "Configuration file is malformed.",
        }
    }
}

pub trait ReqwestErrorExt {
    fn into_network_error(self) -> NetworkError;
}

impl ReqwestErrorExt for reqwest::Error {
    fn into_network_error(self) -> NetworkError {
        if self.is_timeout() {
            return NetworkError::Timeout;
        }
        if self.is_decode() || self.is_body() {
            return NetworkError::Decode(self.to_string());
        }
        match self.status() {
            Some(status) => NetworkError::Status {
                status: status.as_u16(),
                message: self.to_string(),
            },
            None => NetworkError::Unreachable(self.to_string()),
        }
    }
}

pub trait RusqliteErrorExt {
    fn into_database_error(self) -> DatabaseError;
}

impl RusqliteErrorExt for rusqlite::Error {
    fn into_database_error(self) -> DatabaseError {
        match &self {
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::DatabaseCorrupt
                    || err.code == rusqlite::ErrorCode::NotADatabase =>
            {
                DatabaseError::Corrupt(self.to_string())
            }
            rusqlite::Error::SqliteFailure(err, _)
                if err.code == rusqlite::ErrorCode::CannotOpen =>
            {
                DatabaseError::Open(self.to_string())
            }
            _ => DatabaseError::Query(self.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_exit_code() {
        let err: AppError = ConfigError::Invalid("quota.daily_cap".into()).into();
        assert!(matches!(err, AppError::Config(ConfigError::Invalid(_))));
        assert_eq!(err.exit_code(), 78);
        assert_eq!(
            AppError::CatalogUnavailable("missing".into()).exit_code(),
            66
        );
    }

    #[test]
    fn test_status_message_depends_on_class() {
        let upstream = NetworkError::Status {
            status: 503,
            message: "down".into(),
        };
        let rejected = NetworkError::Status {
            status: 400,
            message: "bad".into(),
        };
        assert_ne!(upstream.user_message(), rejected.user_message());
        assert!(upstream.is_transient());
        assert!(!rejected.is_transient());
        assert!(NetworkError::Timeout.is_transient());
    }

    #[test]
    fn test_sqlite_error_maps_to_query() {
        let err = rusqlite::Error::QueryReturnedNoRows.into_database_error();
        assert!(matches!(err, DatabaseError::Query(_)));
    }
}
