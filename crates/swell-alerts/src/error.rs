use swell_core::{DatabaseError, NetworkError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AlertError {
    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// The push gateway refused the notification.
    #[error("Push gateway returned {status}")]
    Gateway { status: u16 },

    #[error("Push client setup failed: {0}")]
    Setup(String),
}

impl From<rusqlite::Error> for AlertError {
    fn from(err: rusqlite::Error) -> Self {
        use swell_core::RusqliteErrorExt;
        Self::Database(err.into_database_error())
    }
}

impl AlertError {
    pub fn user_message(&self) -> &'static str {
        match self {
            Self::Database(e) => e.user_message(),
            Self::Network(e) => e.user_message(),
            Self::Gateway { .. } => "The notification service rejected the message.",
            Self::Setup(_) => "The notification client could not be created.",
        }
    }
}
