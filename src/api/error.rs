//! Shared error handling for API endpoints.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use tracing::error;

use crate::session::SessionError;

/// One body for every credential failure. Wrong password, unknown refresh
/// token, and detected reuse must be indistinguishable to the caller.
pub const GENERIC_AUTH_FAILURE: &str = "Authentication failed";

/// Extension trait for concise error mapping on Results.
pub trait ResultExt<T> {
    fn db_err(self, msg: &str) -> Result<T, ApiError>;
}

impl<T, E: std::fmt::Display> ResultExt<T> for Result<T, E> {
    fn db_err(self, msg: &str) -> Result<T, ApiError> {
        self.map_err(|e| ApiError::db_error(msg, e))
    }
}

/// API error type with automatic response conversion.
pub enum ApiError {
    BadRequest(String),
    Unauthorized(String),
    NotFound(String),
    Conflict(String),
    BadGateway(String),
    Internal(String),
}

impl ApiError {
    pub fn bad_request(msg: impl Into<String>) -> Self {
        Self::BadRequest(msg.into())
    }

    pub fn unauthorized(msg: impl Into<String>) -> Self {
        Self::Unauthorized(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        Self::NotFound(msg.into())
    }

    pub fn conflict(msg: impl Into<String>) -> Self {
        Self::Conflict(msg.into())
    }

    pub fn bad_gateway(msg: impl Into<String>) -> Self {
        Self::BadGateway(msg.into())
    }

    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }

    pub fn db_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal("Database error".into())
    }

    pub fn internal_error(context: &str, e: impl std::fmt::Display) -> Self {
        error!("{}: {}", context, e);
        Self::Internal(context.into())
    }
}

impl From<SessionError> for ApiError {
    fn from(e: SessionError) -> Self {
        match e {
            // Never differentiated in the client-visible response.
            SessionError::InvalidCredentials
            | SessionError::InvalidRefreshToken
            | SessionError::TokenReuseDetected => ApiError::unauthorized(GENERIC_AUTH_FAILURE),
            SessionError::TokenExpired => ApiError::unauthorized("Session expired"),
            SessionError::IdentityNotFound => ApiError::unauthorized(GENERIC_AUTH_FAILURE),
            SessionError::FederationConflict => {
                ApiError::conflict("An account with this email already exists")
            }
            // Ledger and signing failures are fatal for the request and are
            // not retried; a blind retry of a conditional rotation write
            // could double-issue tokens.
            SessionError::Jwt(e) => {
                error!("Failed to sign access token: {}", e);
                ApiError::internal("Token signing failed")
            }
            SessionError::Ledger(e) => {
                error!("Refresh token ledger failure: {}", e);
                ApiError::internal("Database error")
            }
        }
    }
}

#[derive(Serialize)]
struct ErrorResponse {
    error: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, msg),
            ApiError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };
        (status, Json(ErrorResponse { error: message })).into_response()
    }
}
