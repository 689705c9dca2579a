//! Session management endpoints.
//!
//! - GET `/` - List the caller's active refresh records
//! - DELETE `/{id}` - Revoke one record ("log out this device")

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{delete, get},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use super::error::{ApiError, ResultExt};
use crate::audit::{AuditEvent, AuditLog};
use crate::auth::{get_cookie, Auth, HasAuthState, REFRESH_COOKIE_NAME};
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::session::{hash_refresh_secret, unix_now, RevocationCoordinator};

#[derive(Clone)]
pub struct SessionsState {
    pub db: Database,
    pub jwt: Arc<JwtConfig>,
    pub audit: Arc<dyn AuditLog>,
}

impl HasAuthState for SessionsState {
    fn jwt(&self) -> &JwtConfig {
        &self.jwt
    }
}

pub fn router(state: SessionsState) -> Router {
    Router::new()
        .route("/", get(list_sessions))
        .route("/{id}", delete(revoke_session))
        .with_state(state)
}

#[derive(Serialize)]
struct SessionInfo {
    id: i64,
    issued_at: i64,
    expires_at: i64,
    /// True for the record backing the refresh cookie on this request.
    current: bool,
}

#[derive(Serialize)]
struct ListSessionsResponse {
    sessions: Vec<SessionInfo>,
}

/// List the caller's active refresh records.
async fn list_sessions(
    State(state): State<SessionsState>,
    Auth(claims): Auth,
    headers: axum::http::HeaderMap,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .db
        .identities()
        .get_by_uuid(&claims.sub)
        .await
        .db_err("Failed to look up identity")?
        .ok_or_else(|| ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE))?;

    let current_hash = get_cookie(&headers, REFRESH_COOKIE_NAME).map(hash_refresh_secret);

    let records = state
        .db
        .refresh_tokens()
        .list_active_for_identity(identity.id, unix_now())
        .await
        .db_err("Failed to list sessions")?;

    let sessions = records
        .into_iter()
        .map(|r| SessionInfo {
            id: r.id,
            issued_at: r.issued_at,
            expires_at: r.expires_at,
            current: current_hash.as_deref() == Some(r.token_hash.as_str()),
        })
        .collect();

    Ok(Json(ListSessionsResponse { sessions }))
}

#[derive(Serialize)]
struct RevokeResponse {
    revoked: bool,
}

/// Revoke one of the caller's records. Unknown and foreign ids both report
/// `revoked: false`; nothing about other identities' sessions is revealed.
async fn revoke_session(
    State(state): State<SessionsState>,
    Auth(claims): Auth,
    Path(id): Path<i64>,
) -> Result<impl IntoResponse, ApiError> {
    let identity = state
        .db
        .identities()
        .get_by_uuid(&claims.sub)
        .await
        .db_err("Failed to look up identity")?
        .ok_or_else(|| ApiError::unauthorized(super::error::GENERIC_AUTH_FAILURE))?;

    let record = state
        .db
        .refresh_tokens()
        .get_by_id(id)
        .await
        .db_err("Failed to look up session")?;

    let revoked = match record {
        Some(record) if record.identity_id == identity.id => {
            let revoked = RevocationCoordinator::new(state.db.clone())
                .revoke_one(record.id)
                .await?;
            if revoked {
                state.audit.record(AuditEvent::SessionsRevoked {
                    identity_id: identity.id,
                    count: 1,
                });
            }
            revoked
        }
        _ => false,
    };

    Ok((StatusCode::OK, Json(RevokeResponse { revoked })))
}
