//! Application Error Types
//!
//! Centralized error handling with Axum integration.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

/// HTTP-facing error type for the internal collaborator endpoints
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

/// Gateway-level errors raised while validating envelopes or talking to collaborators
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    #[error("Invalid envelope: {0}")]
    InvalidEnvelope(String),

    #[error("Unknown event type: {0}")]
    UnknownEvent(String),

    #[error("Ready state unavailable: {0}")]
    StateUnavailable(String),

    #[error("Session limit reached for user {0}")]
    SessionLimitReached(i64),

    #[error("Duplicate session id: {0}")]
    DuplicateSession(String),

    #[error("Session already closed: {0}")]
    SessionClosed(String),

    #[error("Guild membership of user {0} changed while identifying")]
    MembershipChanged(i64),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Credential verification failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AuthError {
    #[error("Invalid token")]
    InvalidToken,

    #[error("Token expired")]
    Expired,

    #[error("Invalid token claims")]
    InvalidClaims,
}

/// Error response body
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub code: u16,
    pub message: String,
}

impl From<GatewayError> for AppError {
    fn from(err: GatewayError) -> Self {
        match err {
            GatewayError::InvalidEnvelope(_) | GatewayError::UnknownEvent(_) => {
                AppError::BadRequest(err.to_string())
            }
            other => AppError::Internal(other.to_string()),
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, message) = match &self {
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, 10001, msg.clone()),
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, 10002, msg.clone()),
            AppError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, 10003, msg.clone()),
            AppError::Internal(msg) => {
                tracing::error!("Internal error: {}", msg);
                (StatusCode::INTERNAL_SERVER_ERROR, 10000, "Internal server error".into())
            }
        };

        let body = ErrorResponse { code, message };

        (status, Json(body)).into_response()
    }
}
