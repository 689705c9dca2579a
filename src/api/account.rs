//! Account endpoints owned by the directory side of the service.
//!
//! - POST `/register` - Create an identity with a password credential
//! - POST `/password` - Change the password and revoke all sessions

use axum::{
    extract::State,
    http::{header::SET_COOKIE, StatusCode},
    middleware,
    response::IntoResponse,
    routing::post,
    Json, Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::audit::{AuditEvent, AuditLog};
use crate::auth::{clear_refresh_cookie, Auth, HasAuthState};
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::password::hash_password;
use crate::rate_limit::{rate_limit_register, RateLimitConfig};
use crate::session::{CredentialVerifier, RevocationCoordinator};

#[derive(Clone)]
pub struct AccountState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub audit: Arc<dyn AuditLog>,
    pub secure_cookies: bool,
    pub allow_signup: bool,
    pub rate_limits: Arc<RateLimitConfig>,
}

impl HasAuthState for AccountState {
    fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }
}

pub fn router(state: AccountState) -> Router {
    let password_router = Router::new()
        .route("/password", post(change_password))
        .with_state(state.clone());

    if !state.allow_signup {
        return password_router;
    }

    let register_router = Router::new()
        .route("/register", post(register))
        .with_state(state.clone())
        .layer(middleware::from_fn_with_state(
            state.rate_limits.clone(),
            rate_limit_register,
        ));

    password_router.merge(register_router)
}

const MAX_IDENTIFIER_LENGTH: usize = 254;
const MIN_SECRET_LENGTH: usize = 8;
const MAX_SECRET_LENGTH: usize = 128;

#[derive(Deserialize)]
struct RegisterRequest {
    identifier: String,
    secret: String,
    display_name: Option<String>,
}

#[derive(Serialize)]
struct RegisterResponse {
    uuid: String,
    identifier: String,
}

async fn register(
    State(state): State<AccountState>,
    Json(payload): Json<RegisterRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let identifier = payload.identifier.trim();

    if identifier.is_empty() {
        return Err(ApiError::bad_request("Identifier cannot be empty"));
    }
    if identifier.len() > MAX_IDENTIFIER_LENGTH {
        return Err(ApiError::bad_request("Identifier is too long"));
    }
    if identifier.chars().any(char::is_whitespace) {
        return Err(ApiError::bad_request("Identifier cannot contain whitespace"));
    }
    validate_secret(&payload.secret)?;

    let existing = state
        .db
        .identities()
        .get_by_identifier(identifier)
        .await
        .db_err("Failed to check identifier availability")?;
    if existing.is_some() {
        return Err(ApiError::conflict("Identifier is already registered"));
    }

    let hash = hash_password(&payload.secret)
        .map_err(|e| ApiError::internal_error("Failed to hash password", e))?;
    let uuid = uuid::Uuid::new_v4().to_string();

    state
        .db
        .identities()
        .create(&uuid, identifier, Some(&hash), payload.display_name.as_deref())
        .await
        .db_err("Failed to create identity")?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            uuid,
            identifier: identifier.to_string(),
        }),
    ))
}

fn validate_secret(secret: &str) -> Result<(), ApiError> {
    if secret.len() < MIN_SECRET_LENGTH {
        return Err(ApiError::bad_request("Secret must be at least 8 characters"));
    }
    if secret.len() > MAX_SECRET_LENGTH {
        return Err(ApiError::bad_request("Secret is too long"));
    }
    Ok(())
}

#[derive(Deserialize)]
struct ChangePasswordRequest {
    current_secret: String,
    new_secret: String,
}

/// Change the caller's password. Every session dies with the old password;
/// the caller's access token stays valid until its own expiry.
async fn change_password(
    State(state): State<AccountState>,
    Auth(claims): Auth,
    Json(payload): Json<ChangePasswordRequest>,
) -> Result<impl IntoResponse, ApiError> {
    validate_secret(&payload.new_secret)?;

    let identity = state
        .db
        .identities()
        .get_by_uuid(&claims.sub)
        .await
        .db_err("Failed to look up identity")?
        .ok_or_else(|| ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE))?;

    // Re-verify through the same path as login so a stolen access token
    // alone cannot change the password.
    CredentialVerifier::new(state.db.clone())
        .verify_password_login(&identity.identifier, &payload.current_secret)
        .await?;

    let hash = hash_password(&payload.new_secret)
        .map_err(|e| ApiError::internal_error("Failed to hash password", e))?;
    state
        .db
        .identities()
        .update_password(identity.id, &hash)
        .await
        .db_err("Failed to update password")?;

    let count = RevocationCoordinator::new(state.db.clone())
        .revoke_all(identity.id)
        .await?;

    state.audit.record(AuditEvent::PasswordChanged {
        identity_id: identity.id,
    });
    state.audit.record(AuditEvent::SessionsRevoked {
        identity_id: identity.id,
        count,
    });

    Ok((
        StatusCode::OK,
        [(SET_COOKIE, clear_refresh_cookie(state.secure_cookies))],
        Json(serde_json::json!({ "success": true })),
    ))
}
