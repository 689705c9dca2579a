//! Core session endpoints.
//!
//! - POST `/login` - Verify credentials, revoke prior sessions, issue a pair
//! - POST `/logout` - Revoke the cookie's record (or everything) and clear it
//! - POST `/token/refresh` - Rotate the refresh token
//! - GET `/me` - Stateless access-token verification

use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    response::{AppendHeaders, IntoResponse},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::audit::{AuditEvent, AuditLog};
use crate::auth::{
    build_refresh_cookie, clear_refresh_cookie, get_cookie, Auth, HasAuthState,
    REFRESH_COOKIE_NAME,
};
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::rate_limit::{rate_limit_login, rate_limit_refresh, RateLimitConfig};
use crate::session::{
    hash_refresh_secret, CredentialVerifier, IssuedTokens, RevocationCoordinator, RotationEngine,
    SessionError, TokenIssuer,
};

#[derive(Clone)]
pub struct SessionState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub audit: Arc<dyn AuditLog>,
    pub secure_cookies: bool,
    pub rate_limits: Arc<RateLimitConfig>,
}

impl HasAuthState for SessionState {
    fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }
}

impl SessionState {
    fn verifier(&self) -> CredentialVerifier {
        CredentialVerifier::new(self.db.clone())
    }

    fn issuer(&self) -> TokenIssuer {
        TokenIssuer::new(self.db.clone(), self.jwt.clone())
    }

    fn revocation(&self) -> RevocationCoordinator {
        RevocationCoordinator::new(self.db.clone())
    }

    fn rotation(&self) -> RotationEngine {
        RotationEngine::new(
            self.db.clone(),
            self.jwt.clone(),
            self.revocation(),
            self.audit.clone(),
        )
    }
}

pub fn router(state: SessionState) -> Router {
    let login_routes = Router::new()
        .route("/login", post(login))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.rate_limits.clone(),
            rate_limit_login,
        ));

    let refresh_routes = Router::new()
        .route("/token/refresh", post(refresh))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.rate_limits.clone(),
            rate_limit_refresh,
        ));

    Router::new()
        .route("/logout", post(logout))
        .route("/me", get(me))
        .with_state(state)
        .merge(login_routes)
        .merge(refresh_routes)
}

#[derive(Deserialize)]
struct LoginRequest {
    identifier: String,
    secret: String,
}

/// Response body for every endpoint that issues a pair. The refresh secret
/// travels only in the cookie.
#[derive(Serialize)]
pub(super) struct TokenResponse {
    access_token: String,
    token_type: &'static str,
    expires_in: u64,
}

/// Build the issuance response: access token in the body, refresh secret as
/// an httpOnly cookie.
pub(super) fn issued_response(
    tokens: &IssuedTokens,
    secure_cookies: bool,
) -> (StatusCode, [(axum::http::HeaderName, String); 1], Json<TokenResponse>) {
    let cookie = build_refresh_cookie(
        &tokens.refresh_secret,
        crate::session::REFRESH_TOKEN_DURATION_SECS,
        secure_cookies,
    );
    (
        StatusCode::OK,
        [(SET_COOKIE, cookie)],
        Json(TokenResponse {
            access_token: tokens.access_token.clone(),
            token_type: "Bearer",
            expires_in: tokens.access_expires_in,
        }),
    )
}

/// Password login. Revoking the identity's previous sessions is an explicit
/// policy step here, not a side effect of issuance.
async fn login(
    State(state): State<SessionState>,
    Json(payload): Json<LoginRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .verifier()
        .verify_password_login(payload.identifier.trim(), &payload.secret)
        .await?;

    state.revocation().revoke_all(identity.id).await?;

    let tokens = state.issuer().issue(&identity.uuid, identity.id).await?;

    state.audit.record(AuditEvent::LoginSucceeded {
        identity_id: identity.id,
    });

    Ok(issued_response(&tokens, state.secure_cookies))
}

#[derive(Deserialize, Default)]
struct LogoutRequest {
    #[serde(default)]
    everywhere: bool,
}

/// Logout. Succeeds and clears the cookie even when the cookie is missing or
/// already dead; revocation is idempotent.
async fn logout(
    State(state): State<SessionState>,
    request: axum::extract::Request,
) -> Result<impl IntoResponse, ApiError> {
    let (parts, body) = request.into_parts();

    let everywhere = match axum::body::to_bytes(body, 4096).await {
        Ok(bytes) if !bytes.is_empty() => serde_json::from_slice::<LogoutRequest>(&bytes)
            .unwrap_or_default()
            .everywhere,
        _ => false,
    };

    if let Some(secret) = get_cookie(&parts.headers, REFRESH_COOKIE_NAME) {
        let record = state
            .db
            .refresh_tokens()
            .get_by_hash(&hash_refresh_secret(secret))
            .await
            .db_err("Failed to look up refresh token")?;

        if let Some(record) = record {
            let count = if everywhere {
                state.revocation().revoke_all(record.identity_id).await?
            } else {
                u64::from(state.revocation().revoke_one(record.id).await?)
            };
            state.audit.record(AuditEvent::SessionsRevoked {
                identity_id: record.identity_id,
                count,
            });
        }
    }

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(serde_json::json!({ "success": true })),
    ))
}

/// Exchange the refresh cookie for a new pair. All failure modes answer the
/// same generic 401 and clear the cookie.
async fn refresh(
    State(state): State<SessionState>,
    request: axum::extract::Request,
) -> Result<impl IntoResponse, ApiError> {
    let (parts, _body) = request.into_parts();

    let Some(secret) = get_cookie(&parts.headers, REFRESH_COOKIE_NAME) else {
        return Err(ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE));
    };

    match state.rotation().rotate(secret).await {
        Ok(tokens) => Ok(issued_response(&tokens, state.secure_cookies).into_response()),
        // Transient ledger or signing failure: the secret may still be good,
        // leave the cookie alone.
        Err(e @ (SessionError::Ledger(_) | SessionError::Jwt(_))) => Err(e.into()),
        Err(e) => {
            let api_error: ApiError = e.into();
            // A dead refresh token is of no further use to the client.
            Ok((
                AppendHeaders([(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))]),
                api_error,
            )
                .into_response())
        }
    }
}

#[derive(Serialize)]
struct MeResponse {
    uuid: String,
    identifier: String,
    display_name: Option<String>,
}

/// Stateless verification plus a directory existence check. No ledger access
/// on this path.
async fn me(
    State(state): State<SessionState>,
    Auth(claims): Auth,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .db
        .identities()
        .get_by_uuid(&claims.sub)
        .await
        .db_err("Failed to look up identity")?
        .ok_or_else(|| ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE))?;

    Ok(Json(MeResponse {
        uuid: identity.uuid,
        identifier: identity.identifier,
        display_name: identity.display_name,
    }))
}
