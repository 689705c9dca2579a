//! CLI argument parsing, validation, and startup helpers.

use crate::db::Database;
use crate::oauth::{GitHubProvider, GoogleProvider, ProviderRegistry};
use crate::ServerConfig;
use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use url::Url;

const MIN_JWT_SECRET_LENGTH: usize = 32;

#[derive(clap::ValueEnum, Clone, Debug, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
    Compact,
}

#[derive(Parser, Debug, Clone)]
#[command(name = "latchkey", about = "Authentication and session lifecycle service")]
pub struct Args {
    /// Port to listen on
    #[arg(short, long, default_value = "8180")]
    pub port: u16,

    /// Path to SQLite database file
    #[arg(short, long, default_value = "latchkey.db")]
    pub database: String,

    /// Public origin of this deployment (e.g., "https://auth.example.com")
    #[arg(long, default_value = "http://localhost:8180")]
    pub public_origin: String,

    /// Path to file containing the JWT signing secret. Prefer the JWT_SECRET env var
    #[arg(long)]
    pub jwt_secret_file: Option<String>,

    /// Disable self-service registration
    #[arg(long)]
    pub no_signup: bool,

    /// GitHub OAuth client ID
    #[arg(long, env = "GITHUB_CLIENT_ID")]
    pub github_client_id: Option<String>,

    /// GitHub OAuth client secret
    #[arg(long, env = "GITHUB_CLIENT_SECRET", hide_env_values = true)]
    pub github_client_secret: Option<String>,

    /// Google OAuth client ID
    #[arg(long, env = "GOOGLE_CLIENT_ID")]
    pub google_client_id: Option<String>,

    /// Google OAuth client secret
    #[arg(long, env = "GOOGLE_CLIENT_SECRET", hide_env_values = true)]
    pub google_client_secret: Option<String>,

    /// Log output format
    #[arg(short, long, default_value = "pretty")]
    pub log_format: LogFormat,
}

/// Initialize logging based on the specified format.
pub fn init_logging(format: &LogFormat) {
    match format {
        LogFormat::Pretty => tracing_subscriber::fmt::init(),
        LogFormat::Json => tracing_subscriber::fmt().json().init(),
        LogFormat::Compact => tracing_subscriber::fmt().compact().init(),
    }
}

/// Load the JWT signing secret from environment variable or file.
/// Returns None and logs an error if the secret cannot be loaded.
pub fn load_jwt_secret(jwt_secret_file: Option<&str>) -> Option<String> {
    let secret = if let Ok(secret) = std::env::var("JWT_SECRET") {
        // Clear the environment variable to prevent leaking.
        // SAFETY: We're single-threaded at this point during startup,
        // and no other code is reading this environment variable.
        unsafe { std::env::remove_var("JWT_SECRET") };
        secret
    } else if let Some(path) = jwt_secret_file {
        match std::fs::read_to_string(path) {
            Ok(content) => content.trim().to_string(),
            Err(e) => {
                error!(path = %path, error = %e, "Failed to read JWT secret file");
                return None;
            }
        }
    } else {
        error!(
            "JWT secret is required. Set JWT_SECRET environment variable (recommended) or use --jwt-secret-file"
        );
        return None;
    };

    if secret.len() < MIN_JWT_SECRET_LENGTH {
        error!(
            "JWT secret is shorter than {} characters. Use a longer secret",
            MIN_JWT_SECRET_LENGTH
        );
        return None;
    }

    Some(secret)
}

/// Parse and validate the public-origin URL.
/// Returns None and logs an error if validation fails.
pub fn validate_public_origin(public_origin: &str) -> Option<Url> {
    let url = match Url::parse(public_origin) {
        Ok(url) => url,
        Err(e) => {
            error!(origin = %public_origin, error = %e, "Invalid public-origin URL");
            return None;
        }
    };

    let is_https = url.scheme() == "https";
    let is_localhost = url.host_str() == Some("localhost");

    if !is_https && !is_localhost {
        error!("public-origin must use HTTPS for non-localhost deployments");
        return None;
    }

    Some(url)
}

/// Build the OAuth provider registry from configured credentials.
/// Providers without both halves of their credentials are skipped.
pub fn build_providers(args: &Args, public_origin: &Url) -> ProviderRegistry {
    let mut registry = ProviderRegistry::new();
    let origin = public_origin.as_str().trim_end_matches('/');

    match (&args.github_client_id, &args.github_client_secret) {
        (Some(id), Some(secret)) => {
            registry.register(Arc::new(GitHubProvider::new(
                id.clone(),
                secret.clone(),
                format!("{}/oauth/github/callback", origin),
            )));
            info!("GitHub OAuth provider configured");
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("GitHub OAuth provider needs both a client ID and a client secret; skipping");
        }
        (None, None) => {}
    }

    match (&args.google_client_id, &args.google_client_secret) {
        (Some(id), Some(secret)) => {
            registry.register(Arc::new(GoogleProvider::new(
                id.clone(),
                secret.clone(),
                format!("{}/oauth/google/callback", origin),
            )));
            info!("Google OAuth provider configured");
        }
        (Some(_), None) | (None, Some(_)) => {
            warn!("Google OAuth provider needs both a client ID and a client secret; skipping");
        }
        (None, None) => {}
    }

    registry
}

/// Build ServerConfig from validated arguments.
pub fn build_config(
    db: Database,
    public_origin: &Url,
    jwt_secret: String,
    no_signup: bool,
    providers: ProviderRegistry,
) -> ServerConfig {
    ServerConfig {
        db,
        jwt_secret: jwt_secret.into_bytes(),
        secure_cookies: public_origin.scheme() == "https",
        allow_signup: !no_signup,
        providers,
    }
}

/// Open the database, logging errors if it fails.
pub async fn open_database(path: &str) -> Option<Database> {
    match Database::open(path).await {
        Ok(db) => {
            info!(path = %path, "Database opened");
            Some(db)
        }
        Err(e) => {
            error!(path = %path, error = %e, "Failed to open database");
            None
        }
    }
}
