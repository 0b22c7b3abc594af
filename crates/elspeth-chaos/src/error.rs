//! Error type for the chaos harnesses.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

/// Errors raised by [`crate::fault`] configuration and the admin API.
#[derive(Debug, thiserror::Error)]
pub enum ChaosError {
    /// The harness was asked to update its configuration with a value it
    /// could not accept.
    #[error("invalid chaos configuration: {0}")]
    InvalidConfig(String),

    /// A JSON encode/decode failure while handling an admin or mock
    /// request.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// A metrics registration failure — only possible if two harnesses
    /// register the same metric name twice.
    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Lets handlers return `Result<_, ChaosError>` directly from an axum route.
impl IntoResponse for ChaosError {
    fn into_response(self) -> Response {
        let status = match &self {
            ChaosError::InvalidConfig(_) => StatusCode::BAD_REQUEST,
            ChaosError::Json(_) => StatusCode::BAD_REQUEST,
            ChaosError::Metrics(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        (status, self.to_string()).into_response()
    }
}

/// Result alias for the chaos harnesses.
pub type Result<T> = std::result::Result<T, ChaosError>;
