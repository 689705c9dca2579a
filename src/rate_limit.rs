//! Rate limiting for credential endpoints.
//!
//! The limiter is a collaborator consulted before the session components
//! run, as middleware; nothing inside the verifier or rotation engine makes
//! rate decisions. Token bucket per client IP.

use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
};
use governor::{clock::DefaultClock, state::keyed::DefaultKeyedStateStore, Quota, RateLimiter};
use std::{num::NonZeroU32, sync::Arc};

/// Per-IP keyed limiter.
pub type IpLimiter = RateLimiter<String, DefaultKeyedStateStore<String>, DefaultClock>;

/// Rate limiting configuration for credential endpoints.
#[derive(Clone)]
pub struct RateLimitConfig {
    /// Per-IP limiter for password and OAuth logins (10 per minute)
    pub login: Arc<IpLimiter>,
    /// Per-IP limiter for refresh rotation (5 per second)
    pub refresh: Arc<IpLimiter>,
    /// Per-IP limiter for registration (3 per minute)
    pub register: Arc<IpLimiter>,
}

impl RateLimitConfig {
    /// Create limiters with default quotas.
    pub fn new() -> Self {
        Self {
            login: Arc::new(RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(10).unwrap(),
            ))),
            refresh: Arc::new(RateLimiter::keyed(Quota::per_second(
                NonZeroU32::new(5).unwrap(),
            ))),
            register: Arc::new(RateLimiter::keyed(Quota::per_minute(
                NonZeroU32::new(3).unwrap(),
            ))),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// Extract the client IP for limiter keying: X-Forwarded-For first (reverse
/// proxy), then the socket peer. Connections with neither share one bucket.
pub fn client_ip(request: &Request) -> String {
    if let Some(forwarded_for) = request.headers().get("x-forwarded-for") {
        if let Ok(value) = forwarded_for.to_str() {
            if let Some(first_ip) = value.split(',').next() {
                let ip = first_ip.trim();
                if !ip.is_empty() {
                    return ip.to_string();
                }
            }
        }
    }

    use axum::extract::ConnectInfo;
    use std::net::SocketAddr;
    request
        .extensions()
        .get::<ConnectInfo<SocketAddr>>()
        .map(|ci| ci.0.ip().to_string())
        .unwrap_or_else(|| "unknown".to_string())
}

fn too_many_requests(message: &'static str) -> Response {
    (StatusCode::TOO_MANY_REQUESTS, message).into_response()
}

/// Middleware for rate limiting login endpoints.
pub async fn rate_limit_login(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match config.login.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => too_many_requests("Too many login attempts. Please wait before trying again."),
    }
}

/// Middleware for rate limiting token refresh.
pub async fn rate_limit_refresh(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match config.refresh.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => too_many_requests("Too many requests. Please try again later."),
    }
}

/// Middleware for rate limiting registration.
pub async fn rate_limit_register(
    State(config): State<Arc<RateLimitConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let ip = client_ip(&request);
    match config.register.check_key(&ip) {
        Ok(_) => next.run(request).await,
        Err(_) => too_many_requests("Too many signup attempts. Please wait before trying again."),
    }
}
