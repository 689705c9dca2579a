mod account;
mod error;
mod oauth;
mod session;
mod sessions;

use axum::Router;
use std::sync::Arc;

use crate::audit::AuditLog;
use crate::db::Database;
use crate::jwt::JwtConfig;
use crate::oauth::ProviderRegistry;
use crate::rate_limit::RateLimitConfig;

/// Create the API router.
pub fn create_api_router(
    db: Database,
    jwt: Arc<JwtConfig>,
    audit: Arc<dyn AuditLog>,
    providers: ProviderRegistry,
    secure_cookies: bool,
    allow_signup: bool,
) -> Router {
    let rate_limits = Arc::new(RateLimitConfig::new());

    let session_state = session::SessionState {
        db: db.clone(),
        jwt: jwt.clone(),
        audit: audit.clone(),
        secure_cookies,
        rate_limits: rate_limits.clone(),
    };

    let sessions_state = sessions::SessionsState {
        db: db.clone(),
        jwt: jwt.clone(),
        audit: audit.clone(),
    };

    let account_state = account::AccountState {
        db: db.clone(),
        jwt: jwt.clone(),
        audit: audit.clone(),
        secure_cookies,
        allow_signup,
        rate_limits: rate_limits.clone(),
    };

    let oauth_state = oauth::OAuthState {
        db,
        jwt,
        audit,
        providers,
        secure_cookies,
        rate_limits,
    };

    Router::new()
        .merge(session::router(session_state))
        .merge(account::router(account_state))
        .nest("/sessions", sessions::router(sessions_state))
        .nest("/oauth", oauth::router(oauth_state))
}
