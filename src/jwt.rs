//! Access token signing and verification.
//!
//! Access tokens are short-lived, stateless HS256 JWTs. Their validity is
//! decided entirely by signature and expiry; the refresh-token ledger is
//! never consulted for them.

use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey, Header, Validation};
use serde::{Deserialize, Serialize};
use std::time::{SystemTime, UNIX_EPOCH};

/// Access token duration: 15 minutes
pub const ACCESS_TOKEN_DURATION_SECS: u64 = 15 * 60;

/// Claims carried by an access token.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessClaims {
    /// Subject (identity UUID)
    pub sub: String,
    /// Issued at (Unix timestamp)
    pub iat: u64,
    /// Expiration time (Unix timestamp)
    pub exp: u64,
}

/// Result of signing an access token.
#[derive(Debug, Clone)]
pub struct AccessTokenResult {
    /// The JWT token string
    pub token: String,
    /// Token duration in seconds
    pub expires_in: u64,
}

/// Process-wide signing configuration.
#[derive(Clone)]
pub struct JwtConfig {
    encoding_key: EncodingKey,
    decoding_key: DecodingKey,
}

impl JwtConfig {
    /// Create a new JWT configuration with the given secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret),
            decoding_key: DecodingKey::from_secret(secret),
        }
    }

    /// Sign an access token for an identity.
    pub fn generate_access_token(&self, identity_uuid: &str) -> Result<AccessTokenResult, JwtError> {
        let now = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_err(|_| JwtError::TimeError)?
            .as_secs();

        let claims = AccessClaims {
            sub: identity_uuid.to_string(),
            iat: now,
            exp: now + ACCESS_TOKEN_DURATION_SECS,
        };

        let token = jsonwebtoken::encode(&Header::default(), &claims, &self.encoding_key)
            .map_err(JwtError::Encoding)?;

        Ok(AccessTokenResult {
            token,
            expires_in: ACCESS_TOKEN_DURATION_SECS,
        })
    }

    /// Validate and decode an access token.
    pub fn validate_access_token(&self, token: &str) -> Result<AccessClaims, JwtError> {
        let mut validation = Validation::new(Algorithm::HS256);
        validation.leeway = 0;

        let token_data =
            jsonwebtoken::decode::<AccessClaims>(token, &self.decoding_key, &validation)
                .map_err(JwtError::Decoding)?;

        Ok(token_data.claims)
    }
}

/// Errors that can occur during JWT operations.
#[derive(Debug)]
pub enum JwtError {
    /// Error encoding the token
    Encoding(jsonwebtoken::errors::Error),
    /// Error decoding the token
    Decoding(jsonwebtoken::errors::Error),
    /// System time error
    TimeError,
}

impl std::fmt::Display for JwtError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JwtError::Encoding(e) => write!(f, "Failed to encode token: {}", e),
            JwtError::Decoding(e) => write!(f, "Failed to decode token: {}", e),
            JwtError::TimeError => write!(f, "System time error"),
        }
    }
}

impl std::error::Error for JwtError {}
