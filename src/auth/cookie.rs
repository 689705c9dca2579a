//! Cookie parsing and construction.
//!
//! The refresh secret is the only session credential that travels in a
//! cookie, and it is opaque: no user-identifying attribute is ever a cookie
//! value.

use axum::http::header;

/// Cookie name for the refresh secret (long-lived, httpOnly).
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";

/// Cookie name for the short-lived OAuth CSRF state.
pub const OAUTH_STATE_COOKIE_NAME: &str = "oauth_state";

/// Extract a cookie value from the Cookie header.
pub fn get_cookie<'a>(headers: &'a axum::http::HeaderMap, name: &str) -> Option<&'a str> {
    let cookie_header = headers.get(header::COOKIE)?.to_str().ok()?;
    for part in cookie_header.split(';') {
        let part = part.trim();
        if let Some((key, value)) = part.split_once('=') {
            if key.trim() == name {
                return Some(value.trim());
            }
        }
    }
    None
}

/// Build the refresh-secret cookie.
pub fn build_refresh_cookie(secret: &str, max_age_secs: i64, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Strict; Path=/; Max-Age={}{}",
        REFRESH_COOKIE_NAME,
        secret,
        max_age_secs,
        if secure { "; Secure" } else { "" }
    )
}

/// Build the cookie that clears the refresh secret.
pub fn clear_refresh_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Strict; Path=/; Max-Age=0{}",
        REFRESH_COOKIE_NAME,
        if secure { "; Secure" } else { "" }
    )
}

/// Build the OAuth state cookie. SameSite=Lax, not Strict: the callback is a
/// top-level navigation from the provider's site and the cookie must
/// accompany it.
pub fn build_state_cookie(state: &str, secure: bool) -> String {
    format!(
        "{}={}; HttpOnly; SameSite=Lax; Path=/; Max-Age=600{}",
        OAUTH_STATE_COOKIE_NAME,
        state,
        if secure { "; Secure" } else { "" }
    )
}

/// Build the cookie that clears the OAuth state.
pub fn clear_state_cookie(secure: bool) -> String {
    format!(
        "{}=; HttpOnly; SameSite=Lax; Path=/; Max-Age=0{}",
        OAUTH_STATE_COOKIE_NAME,
        if secure { "; Secure" } else { "" }
    )
}
