//! API error types.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use pqgate_core::Error as PqgateError;
use pqgate_filters::FilterError;
use serde::Serialize;

/// Errors raised while routing a publish payload.
#[derive(Debug, thiserror::Error)]
pub enum BroadcastError {
    #[error("Invalid JSON payload: {0}")]
    InvalidJson(#[from] serde_json::Error),

    #[error("Payload must be a JSON object or array, got {0}")]
    UnsupportedPayload(&'static str),
}

impl From<BroadcastError> for PqgateError {
    fn from(e: BroadcastError) -> Self {
        PqgateError::Broadcast(e.to_string())
    }
}

/// Standardized API error body.
#[derive(Debug, Clone, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    /// Machine-readable error code.
    pub code: &'static str,
    /// Human-readable error message.
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, code: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            code,
            message: message.into(),
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(StatusCode::NOT_FOUND, "NOT_FOUND", message)
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, "BAD_REQUEST", message)
    }
}

impl From<FilterError> for ApiError {
    fn from(e: FilterError) -> Self {
        match e {
            FilterError::UnknownFilter(_) => Self::not_found(e.to_string()),
            FilterError::ConfigParse { .. } | FilterError::Validation { .. } => {
                Self::new(StatusCode::UNPROCESSABLE_ENTITY, "INVALID_CONFIG", e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status;
        (status, Json(serde_json::json!({ "success": false, "error": self }))).into_response()
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
