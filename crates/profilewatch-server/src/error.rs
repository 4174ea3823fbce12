//! API error types for the profilewatch server.
//!
//! Maps [`CoreError`] onto HTTP status codes per spec §7.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use profilewatch_core::error::CoreError;
use serde_json::json;

/// API error type for route handlers.
pub enum ApiError {
    /// A domain error surfaced by the pipeline, queue, or gateway.
    Core(CoreError),
    /// Malformed request body or query parameters.
    BadRequest(String),
}

impl From<CoreError> for ApiError {
    fn from(err: CoreError) -> Self {
        Self::Core(err)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::Core(CoreError::RateLimited { retry_after }) => (
                StatusCode::SERVICE_UNAVAILABLE,
                format!("rate limited, retry after {retry_after:?}"),
            ),
            Self::Core(CoreError::AuthFailed(msg)) => (StatusCode::BAD_GATEWAY, msg),
            Self::Core(CoreError::Transient(msg)) => (StatusCode::BAD_GATEWAY, msg),
            Self::Core(CoreError::Parse(msg)) => (StatusCode::BAD_GATEWAY, msg),
            Self::Core(CoreError::Conflict(msg)) => (StatusCode::CONFLICT, msg),
            Self::Core(CoreError::NotFound(msg)) => (StatusCode::NOT_FOUND, msg),
            Self::Core(CoreError::Fatal(msg)) => {
                tracing::error!(error = %msg, "fatal pipeline error");
                (StatusCode::INTERNAL_SERVER_ERROR, msg)
            }
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
        };

        (status, axum::Json(json!({ "error": message }))).into_response()
    }
}
