//! Token pair issuance.

use std::sync::Arc;

use crate::db::Database;
use crate::jwt::JwtConfig;

use super::{generate_refresh_secret, hash_refresh_secret, unix_now, SessionError};

/// Refresh token duration: 7 days
pub const REFRESH_TOKEN_DURATION_SECS: i64 = 7 * 24 * 60 * 60;

/// A freshly minted access/refresh pair.
#[derive(Debug, Clone)]
pub struct IssuedTokens {
    /// Signed access token for the Authorization header
    pub access_token: String,
    /// Access token lifetime in seconds
    pub access_expires_in: u64,
    /// Opaque refresh secret; this is the only copy, the ledger keeps a hash
    pub refresh_secret: String,
    /// Ledger ID of the refresh record
    pub record_id: i64,
    /// Rotation chain this record belongs to
    pub lineage: String,
    /// Refresh token expiry (Unix timestamp)
    pub refresh_expires_at: i64,
}

/// Mints access/refresh pairs and persists the refresh side.
///
/// Issuance never reads prior ledger state for the identity; invalidating
/// existing sessions is a separate, explicit call into the
/// [`RevocationCoordinator`](super::RevocationCoordinator).
#[derive(Clone)]
pub struct TokenIssuer {
    db: Database,
    jwt: Arc<JwtConfig>,
}

impl TokenIssuer {
    pub fn new(db: Database, jwt: Arc<JwtConfig>) -> Self {
        Self { db, jwt }
    }

    /// Issue a new pair for an identity, starting a new lineage.
    pub async fn issue(&self, identity_uuid: &str, identity_id: i64) -> Result<IssuedTokens, SessionError> {
        let access = self.jwt.generate_access_token(identity_uuid)?;

        let refresh_secret = generate_refresh_secret();
        let lineage = uuid::Uuid::new_v4().to_string();
        let now = unix_now();
        let expires_at = now + REFRESH_TOKEN_DURATION_SECS;

        let record_id = self
            .db
            .refresh_tokens()
            .create(
                &hash_refresh_secret(&refresh_secret),
                identity_id,
                &lineage,
                now,
                expires_at,
            )
            .await?;

        Ok(IssuedTokens {
            access_token: access.token,
            access_expires_in: access.expires_in,
            refresh_secret,
            record_id,
            lineage,
            refresh_expires_at: expires_at,
        })
    }
}
