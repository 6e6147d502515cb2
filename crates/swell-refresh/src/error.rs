use swell_forecast::ForecastError;
use thiserror::Error;
use warp::http::StatusCode;

/// Errors surfaced by the HTTP trigger surface.
#[derive(Error, Debug)]
pub enum TriggerError {
    #[error("Unauthorized")]
    Unauthorized,

    #[error("Spot {0} not found")]
    SpotNotFound(i64),

    #[error("Forecast error: {0}")]
    Forecast(#[from] ForecastError),
}

impl TriggerError {
    pub fn status(&self) -> StatusCode {
        match self {
            Self::Unauthorized => StatusCode::UNAUTHORIZED,
            Self::SpotNotFound(_) => StatusCode::NOT_FOUND,
            Self::Forecast(ForecastError::Catalog(_)) => StatusCode::SERVICE_UNAVAILABLE,
            Self::Forecast(_) => StatusCode::BAD_GATEWAY,
        }
    }

    pub fn user_message(&self) -> String {
        match self {
            Self::Unauthorized => "Unauthorized".to_string(),
            Self::SpotNotFound(_) => "Spot not found".to_string(),
            Self::Forecast(e) => e.user_message().to_string(),
        }
    }

    /// JSON `{ "error": ... }` with the matching status.
    pub fn into_reply(self) -> warp::reply::WithStatus<warp::reply::Json> {
        let status = self.status();
        warp::reply::with_status(
            warp::reply::json(&serde_json::json!({ "error": self.user_message() })),
            status,
        )
    }
}
