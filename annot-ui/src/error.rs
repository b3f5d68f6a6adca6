//! Error types for annot-ui
//!
//! Every handler error is turned into a JSON body
//! `{"error": {"code": ..., "message": ...}}` so the page can show it.

use annot_common::Error as CommonError;
use axum::{
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;

/// API error type
#[derive(Debug, Error)]
pub enum ApiError {
    /// Unknown session id (404)
    #[error("Session not found: {0}")]
    SessionNotFound(uuid::Uuid),

    /// Annotation library error; status depends on the category
    #[error(transparent)]
    Common(#[from] CommonError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_code) = match &self {
            ApiError::SessionNotFound(_) => (StatusCode::NOT_FOUND, "SESSION_NOT_FOUND"),
            ApiError::Common(err) => match err {
                CommonError::Validation(_) => (StatusCode::BAD_REQUEST, "VALIDATION_ERROR"),
                CommonError::InvalidState(_) => (StatusCode::CONFLICT, "INVALID_STATE"),
                CommonError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
                CommonError::Flush(_) => (StatusCode::BAD_GATEWAY, "FLUSH_ERROR"),
                CommonError::Write(_) => (StatusCode::INTERNAL_SERVER_ERROR, "WRITE_ERROR"),
                _ => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
            },
        };

        let message = match self {
            // Show the validation text as-is, without the category prefix
            ApiError::Common(CommonError::Validation(msg)) => msg,
            other => other.to_string(),
        };

        let body = Json(json!({
            "error": {
                "code": error_code,
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// Malformed or mistyped request bodies are validation errors
impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::Common(CommonError::Validation(rejection.body_text()))
    }
}

/// Result type for API handlers
pub type ApiResult<T> = Result<T, ApiError>;
