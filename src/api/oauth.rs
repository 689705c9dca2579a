//! OAuth endpoints.
//!
//! - GET `/{provider}` - Redirect to the provider's authorize URL
//! - GET `/{provider}/callback` - Exchange the code, resolve the identity,
//!   then the same revoke-all + issuance flow as password login

use axum::{
    extract::{Path, Query, State},
    http::header::SET_COOKIE,
    response::{AppendHeaders, IntoResponse, Redirect},
    routing::get,
    Router,
};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use rand::RngCore;
use serde::Deserialize;
use std::sync::Arc;

use super::error::ApiError;
use super::session::issued_response;
use crate::audit::{AuditEvent, AuditLog};
use crate::auth::{build_state_cookie, clear_state_cookie, get_cookie, OAUTH_STATE_COOKIE_NAME};
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::oauth::{ProviderError, ProviderRegistry};
use crate::rate_limit::{rate_limit_login, RateLimitConfig};
use crate::session::{CredentialVerifier, RevocationCoordinator, TokenIssuer};

#[derive(Clone)]
pub struct OAuthState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub audit: Arc<dyn AuditLog>,
    pub providers: ProviderRegistry,
    pub secure_cookies: bool,
    pub rate_limits: Arc<RateLimitConfig>,
}

pub fn router(state: OAuthState) -> Router {
    Router::new()
        .route("/{provider}", get(authorize))
        .route("/{provider}/callback", get(callback))
        .with_state(state.clone())
        .layer(axum::middleware::from_fn_with_state(
            state.rate_limits,
            rate_limit_login,
        ))
}

/// Redirect the user agent to the provider, with a CSRF state nonce pinned
/// in a short-lived cookie.
async fn authorize(
    State(state): State<OAuthState>,
    Path(provider_name): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state
        .providers
        .get(&provider_name)
        .ok_or_else(|| ApiError::not_found("Unknown provider"))?;

    let mut nonce = [0u8; 16];
    rand::rng().fill_bytes(&mut nonce);
    let csrf_state = URL_SAFE_NO_PAD.encode(nonce);

    let url = provider.authorize_url(&csrf_state);

    Ok((
        AppendHeaders([(SET_COOKIE, build_state_cookie(&csrf_state, state.secure_cookies))]),
        Redirect::temporary(&url),
    ))
}

#[derive(Deserialize)]
struct CallbackQuery {
    code: Option<String>,
    state: Option<String>,
    error: Option<String>,
}

/// Provider callback: verify the CSRF state, exchange the code for a
/// profile, resolve or create the local identity, then issue a pair with
/// the same explicit revoke-all policy step as password login.
async fn callback(
    State(state): State<OAuthState>,
    Path(provider_name): Path<String>,
    Query(query): Query<CallbackQuery>,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let provider = state
        .providers
        .get(&provider_name)
        .ok_or_else(|| ApiError::not_found("Unknown provider"))?;

    if query.error.is_some() {
        return Err(ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE));
    }

    let expected_state = get_cookie(&headers, OAUTH_STATE_COOKIE_NAME);
    if expected_state.is_none() || query.state.as_deref() != expected_state {
        return Err(ApiError::bad_request("Missing or mismatched state"));
    }

    let code = query
        .code
        .as_deref()
        .ok_or_else(|| ApiError::bad_request("Missing authorization code"))?;

    let profile = provider.exchange_code(code).await.map_err(|e| match e {
        ProviderError::ExchangeRejected | ProviderError::MalformedProfile => {
            ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE)
        }
        ProviderError::Http(e) => {
            tracing::error!(provider = %provider_name, error = %e, "Provider exchange failed");
            ApiError::bad_gateway("Identity provider unavailable")
        }
    })?;

    let resolved = CredentialVerifier::new(state.db.clone())
        .resolve_federated(provider.name(), &profile)
        .await?;

    if resolved.created {
        state.audit.record(AuditEvent::FederatedIdentityCreated {
            identity_id: resolved.identity.id,
            provider: provider.name().to_string(),
        });
    }

    RevocationCoordinator::new(state.db.clone())
        .revoke_all(resolved.identity.id)
        .await?;

    let tokens = TokenIssuer::new(state.db.clone(), state.jwt.clone())
        .issue(&resolved.identity.uuid, resolved.identity.id)
        .await?;

    state.audit.record(AuditEvent::LoginSucceeded {
        identity_id: resolved.identity.id,
    });

    let (status, cookie_headers, body) = issued_response(&tokens, state.secure_cookies);
    Ok((
        status,
        AppendHeaders([
            cookie_headers[0].clone(),
            (SET_COOKIE, clear_state_cookie(state.secure_cookies)),
        ]),
        body,
    ))
}
