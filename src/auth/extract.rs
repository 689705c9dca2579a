//! Bearer-token extractor.
//!
//! Access verification is pure computation: signature plus expiry. It never
//! touches the refresh-token ledger, which is what keeps ordinary request
//! authorization cheap and lock-free under unlimited parallelism.

use axum::{
    extract::FromRequestParts,
    http::{header, request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::jwt::{AccessClaims, JwtConfig};

/// Trait for state types that can authenticate requests.
pub trait HasAuthState {
    fn jwt(&self) -> &JwtConfig;
}

/// Extractor for endpoints that require a valid access token in the
/// `Authorization: Bearer` header.
pub struct Auth(pub AccessClaims);

impl<S> FromRequestParts<S> for Auth
where
    S: HasAuthState + Send + Sync,
{
    type Rejection = AuthError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(AuthError::MissingToken)?;
        let claims = state
            .jwt()
            .validate_access_token(token)
            .map_err(|_| AuthError::InvalidToken)?;
        Ok(Auth(claims))
    }
}

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get(header::AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")
        .map(str::trim)
        .filter(|t| !t.is_empty())
}

/// Bearer authentication failures. Both variants answer 401; the body does
/// not say which check failed.
#[derive(Debug)]
pub enum AuthError {
    MissingToken,
    InvalidToken,
}

#[derive(Serialize)]
struct ErrorResponse {
    error: &'static str,
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Not authenticated",
            }),
        )
            .into_response()
    }
}
