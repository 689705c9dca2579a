//! Refresh token revocation.

use crate::db::Database;

use super::{unix_now, SessionError};

/// Revokes refresh records at three granularities: one record, one lineage,
/// or everything an identity holds. All writes are idempotent; revoking an
/// already-revoked record affects zero rows and is never an error.
#[derive(Clone)]
pub struct RevocationCoordinator {
    db: Database,
}

impl RevocationCoordinator {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Revoke a single record ("log out this device").
    /// Returns whether a record actually transitioned.
    pub async fn revoke_one(&self, record_id: i64) -> Result<bool, SessionError> {
        Ok(self
            .db
            .refresh_tokens()
            .revoke_one(record_id, unix_now())
            .await?)
    }

    /// Revoke every non-revoked record in a lineage. Used by the
    /// reuse-detection path to kill a possibly stolen rotation chain.
    pub async fn revoke_lineage(&self, lineage: &str) -> Result<u64, SessionError> {
        Ok(self
            .db
            .refresh_tokens()
            .revoke_lineage(lineage, unix_now())
            .await?)
    }

    /// Revoke every non-revoked record for an identity. Used on logout
    /// everywhere, password change, and as the explicit single-session
    /// policy step before login issuance.
    pub async fn revoke_all(&self, identity_id: i64) -> Result<u64, SessionError> {
        Ok(self
            .db
            .refresh_tokens()
            .revoke_all_for_identity(identity_id, unix_now())
            .await?)
    }
}
