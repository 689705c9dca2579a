//! Session lifecycle: credential verification, token issuance, refresh
//! rotation with reuse detection, and revocation.
//!
//! Refresh tokens are opaque, single-use bearer secrets. The ledger stores
//! only their SHA-256, so a ledger dump never yields usable credentials.

mod issuer;
mod revocation;
mod rotation;
mod verifier;

pub use issuer::{IssuedTokens, TokenIssuer, REFRESH_TOKEN_DURATION_SECS};
pub use revocation::RevocationCoordinator;
pub use rotation::RotationEngine;
pub use verifier::{CredentialVerifier, FederatedResolution};

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::RngCore;
use sha2::{Digest, Sha256};

use crate::jwt::JwtError;

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

/// Generate a fresh opaque refresh secret: 32 random bytes, base64url.
pub fn generate_refresh_secret() -> String {
    let mut bytes = [0u8; 32];
    rand::rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Hash a refresh secret into its ledger lookup key.
pub fn hash_refresh_secret(secret: &str) -> String {
    hex::encode(Sha256::digest(secret.as_bytes()))
}

/// Session operation failures.
///
/// `InvalidCredentials`, `InvalidRefreshToken`, and `TokenReuseDetected` all
/// surface to clients as the same generic 401; the distinction exists only
/// for internal handling (reuse triggers lineage revocation and an audit
/// event) and must never leak into a response body.
#[derive(Debug)]
pub enum SessionError {
    /// Unknown identifier or wrong secret; deliberately one error for both.
    InvalidCredentials,
    /// A federated profile's email already belongs to an unlinked identity.
    FederationConflict,
    /// The presented refresh secret matches no ledger record.
    InvalidRefreshToken,
    /// The refresh token's own lifetime has run out.
    TokenExpired,
    /// A rotated or revoked refresh token was presented again.
    TokenReuseDetected,
    /// The identity referenced by a token no longer exists.
    IdentityNotFound,
    /// Access token signing failed.
    Jwt(JwtError),
    /// Ledger read or write failed.
    Ledger(sqlx::Error),
}

impl std::fmt::Display for SessionError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionError::InvalidCredentials => write!(f, "Invalid credentials"),
            SessionError::FederationConflict => write!(f, "Federated identity conflict"),
            SessionError::InvalidRefreshToken => write!(f, "Invalid refresh token"),
            SessionError::TokenExpired => write!(f, "Refresh token expired"),
            SessionError::TokenReuseDetected => write!(f, "Refresh token reuse detected"),
            SessionError::IdentityNotFound => write!(f, "Identity not found"),
            SessionError::Jwt(e) => write!(f, "Token signing failed: {}", e),
            SessionError::Ledger(e) => write!(f, "Ledger operation failed: {}", e),
        }
    }
}

impl std::error::Error for SessionError {}

impl From<sqlx::Error> for SessionError {
    fn from(e: sqlx::Error) -> Self {
        SessionError::Ledger(e)
    }
}

impl From<JwtError> for SessionError {
    fn from(e: JwtError) -> Self {
        SessionError::Jwt(e)
    }
}
