//! Custom error types for the RBAC service

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;
use thiserror::Error;

/// Custom error type for the RBAC service
///
/// Validation and existence failures carry a message for the client;
/// anything unanticipated is logged at the failure point and surfaced
/// here as the generic internal error without leaking internals.
#[derive(Error, Debug)]
pub enum ApiError {
    /// Malformed input, missing required field, or bad reference id
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Missing, malformed, expired, or otherwise invalid credential
    #[error("Unauthorized")]
    Unauthorized,

    /// Authenticated but insufficient role or permission
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// Referenced entity absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Internal server error
    #[error("Internal server error")]
    InternalServerError,

    /// Database error
    #[error("Database error: {0}")]
    Database(#[from] common::error::DatabaseError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized => (StatusCode::UNAUTHORIZED, "Unauthorized".to_string()),
            ApiError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::InternalServerError => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
            ApiError::Database(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Internal server error".to_string(),
            ),
        };

        let body = Json(json!({
            "error": error_message,
        }));

        (status, body).into_response()
    }
}

/// Type alias for handler results
pub type ApiResult<T> = Result<T, ApiError>;
