//! Error types for the gateway.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

/// Errors surfaced to callers of the gateway.
///
/// `Clone` because one executor failure resolves every request of its batch
/// with the same error.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GatewayError {
    #[error("Queue closed: model is draining")]
    QueueClosed,

    #[error("Model not ready: {0}")]
    ModelNotReady(String),

    #[error("Model already registered: {0}")]
    ModelExists(String),

    #[error("Request cancelled")]
    Cancelled,

    #[error("Execution failed: {0}")]
    ExecutionFailed(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid batch policy: {0}")]
    InvalidPolicy(String),
}

impl GatewayError {
    fn status_and_type(&self) -> (StatusCode, &'static str) {
        match self {
            Self::QueueClosed => (StatusCode::SERVICE_UNAVAILABLE, "queue_closed"),
            Self::ModelNotReady(_) => (StatusCode::NOT_FOUND, "model_not_ready"),
            Self::ModelExists(_) => (StatusCode::CONFLICT, "model_exists"),
            // 499: client closed request
            Self::Cancelled => (
                StatusCode::from_u16(499).unwrap_or(StatusCode::BAD_REQUEST),
                "cancelled",
            ),
            Self::ExecutionFailed(_) => (StatusCode::INTERNAL_SERVER_ERROR, "execution_failed"),
            Self::InvalidInput(_) => (StatusCode::BAD_REQUEST, "invalid_input"),
            Self::InvalidPolicy(_) => (StatusCode::INTERNAL_SERVER_ERROR, "invalid_policy"),
        }
    }
}

impl IntoResponse for GatewayError {
    fn into_response(self) -> Response {
        let (status, error_type) = self.status_and_type();

        let body = Json(json!({
            "error": {
                "type": error_type,
                "message": self.to_string()
            }
        }));

        (status, body).into_response()
    }
}

pub type Result<T> = std::result::Result<T, GatewayError>;
