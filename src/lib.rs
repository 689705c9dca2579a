pub mod api;
pub mod audit;
pub mod auth;
pub mod cli;
pub mod db;
pub mod jwt;
pub mod oauth;
pub mod password;
pub mod rate_limit;
pub mod session;
pub mod sweeper;

use api::create_api_router;
use audit::{AuditLog, TracingAuditLog};
use axum::Router;
use db::Database;
use jwt::JwtConfig;
use oauth::ProviderRegistry;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;

pub struct ServerConfig {
    /// Database connection (cloneable, uses connection pool internally)
    pub db: Database,
    /// Secret for signing access tokens
    pub jwt_secret: Vec<u8>,
    /// Whether to set Secure flag on cookies (true in production with HTTPS)
    pub secure_cookies: bool,
    /// Whether self-service registration is enabled
    pub allow_signup: bool,
    /// Configured OAuth providers
    pub providers: ProviderRegistry,
}

/// Create the application router with the given configuration.
pub fn create_app(config: &ServerConfig) -> Router {
    let jwt = Arc::new(JwtConfig::new(&config.jwt_secret));
    let audit: Arc<dyn AuditLog> = Arc::new(TracingAuditLog);

    create_api_router(
        config.db.clone(),
        jwt,
        audit,
        config.providers.clone(),
        config.secure_cookies,
        config.allow_signup,
    )
}

/// Run a sweep now and spawn the periodic scheduler.
/// Call this before starting the server; abort the returned handle on
/// shutdown.
pub async fn init_sweeper(db: &Database) -> tokio::task::JoinHandle<()> {
    sweeper::run_sweep(db).await;
    sweeper::spawn_sweep_scheduler(db.clone())
}

/// Run the server on the given listener. This function blocks until the
/// server exits. Call `init_sweeper` before this.
pub async fn run_server(config: ServerConfig, listener: TcpListener) -> Result<(), std::io::Error> {
    let app = create_app(&config);
    let make_service = app.into_make_service_with_connect_info::<SocketAddr>();
    axum::serve(listener, make_service).await
}
