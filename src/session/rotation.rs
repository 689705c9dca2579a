//! Refresh token rotation and reuse detection.

use std::sync::Arc;

use crate::audit::{AuditEvent, AuditLog};
use crate::db::{Database, RefreshTokenRecord, TokenState};
use crate::jwt::JwtConfig;

use super::issuer::{IssuedTokens, REFRESH_TOKEN_DURATION_SECS};
use super::revocation::RevocationCoordinator;
use super::{generate_refresh_secret, hash_refresh_secret, unix_now, SessionError};

/// Validates an incoming refresh secret and atomically supersedes its record
/// with a new pair.
///
/// Refresh tokens are single-use. Presenting a record that is already
/// rotated or revoked is treated as replay: the whole lineage is revoked,
/// the audit log is notified, and the caller gets `TokenReuseDetected`. Of
/// two concurrent rotations of the same secret, the ledger's conditional
/// update lets exactly one through; the loser gets `TokenReuseDetected`
/// without punishing the lineage the winner now legitimately owns.
#[derive(Clone)]
pub struct RotationEngine {
    db: Database,
    jwt: Arc<JwtConfig>,
    revocation: RevocationCoordinator,
    audit: Arc<dyn AuditLog>,
}

impl RotationEngine {
    pub fn new(
        db: Database,
        jwt: Arc<JwtConfig>,
        revocation: RevocationCoordinator,
        audit: Arc<dyn AuditLog>,
    ) -> Self {
        Self {
            db,
            jwt,
            revocation,
            audit,
        }
    }

    /// Exchange a refresh secret for a new access/refresh pair.
    pub async fn rotate(&self, refresh_secret: &str) -> Result<IssuedTokens, SessionError> {
        let token_hash = hash_refresh_secret(refresh_secret);
        let record = self
            .db
            .refresh_tokens()
            .get_by_hash(&token_hash)
            .await?
            .ok_or(SessionError::InvalidRefreshToken)?;

        match record.state {
            // Already superseded or revoked: replay. Whether this was a
            // stolen token or a legitimately logged-out session is not
            // revealed to the caller.
            TokenState::Rotated | TokenState::Revoked => self.punish_replay(&record).await,
            TokenState::Active => {
                if unix_now() > record.expires_at {
                    return Err(SessionError::TokenExpired);
                }
                self.supersede(&record).await
            }
        }
    }

    /// Rotate an active record into its successor. The ledger's conditional
    /// update is the single serialization point; losing it means a
    /// concurrent call already rotated this record.
    async fn supersede(&self, record: &RefreshTokenRecord) -> Result<IssuedTokens, SessionError> {
        let refresh_secret = generate_refresh_secret();
        let now = unix_now();
        let expires_at = now + REFRESH_TOKEN_DURATION_SECS;

        let successor_id = self
            .db
            .refresh_tokens()
            .supersede(record, &hash_refresh_secret(&refresh_secret), now, expires_at)
            .await?;

        let Some(record_id) = successor_id else {
            // The concurrent winner owns the lineage now; report reuse
            // without revoking what it just issued.
            self.audit.record(AuditEvent::ReuseDetected {
                identity_id: record.identity_id,
                lineage: record.lineage.clone(),
            });
            return Err(SessionError::TokenReuseDetected);
        };

        let identity = self
            .db
            .identities()
            .get_by_id(record.identity_id)
            .await?
            .ok_or(SessionError::IdentityNotFound)?;

        let access = self.jwt.generate_access_token(&identity.uuid)?;

        Ok(IssuedTokens {
            access_token: access.token,
            access_expires_in: access.expires_in,
            refresh_secret,
            record_id,
            lineage: record.lineage.clone(),
            refresh_expires_at: expires_at,
        })
    }

    /// Replay of a non-active record: kill the whole lineage (idempotent if
    /// it was already dead), notify the audit log after the ledger write,
    /// and surface the reuse error.
    async fn punish_replay(&self, record: &RefreshTokenRecord) -> Result<IssuedTokens, SessionError> {
        self.revocation.revoke_lineage(&record.lineage).await?;
        self.audit.record(AuditEvent::ReuseDetected {
            identity_id: record.identity_id,
            lineage: record.lineage.clone(),
        });
        Err(SessionError::TokenReuseDetected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit::testing::CapturingAuditLog;
    use crate::session::TokenIssuer;

    struct Fixture {
        db: Database,
        issuer: TokenIssuer,
        engine: RotationEngine,
        audit: Arc<CapturingAuditLog>,
        identity_id: i64,
    }

    async fn setup() -> Fixture {
        let db = Database::open(":memory:").await.unwrap();
        let identity_id = db
            .identities()
            .create("uuid-1", "alice@example.com", None, None)
            .await
            .unwrap();
        let jwt = Arc::new(JwtConfig::new(b"test-secret"));
        let audit = Arc::new(CapturingAuditLog::default());
        let issuer = TokenIssuer::new(db.clone(), jwt.clone());
        let engine = RotationEngine::new(
            db.clone(),
            jwt,
            RevocationCoordinator::new(db.clone()),
            audit.clone(),
        );
        Fixture {
            db,
            issuer,
            engine,
            audit,
            identity_id,
        }
    }

    #[tokio::test]
    async fn test_rotate_supersedes_record() {
        let f = setup().await;
        let issued = f.issuer.issue("uuid-1", f.identity_id).await.unwrap();

        let rotated = f.engine.rotate(&issued.refresh_secret).await.unwrap();
        assert_eq!(rotated.lineage, issued.lineage);
        assert_ne!(rotated.refresh_secret, issued.refresh_secret);

        let old = f
            .db
            .refresh_tokens()
            .get_by_id(issued.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(old.state, TokenState::Rotated);
        assert_eq!(old.superseded_by, Some(rotated.record_id));
    }

    #[tokio::test]
    async fn test_unknown_secret_is_invalid() {
        let f = setup().await;

        let err = f.engine.rotate("never-issued").await.unwrap_err();
        assert!(matches!(err, SessionError::InvalidRefreshToken));
    }

    #[tokio::test]
    async fn test_replay_revokes_lineage_and_audits() {
        let f = setup().await;
        let issued = f.issuer.issue("uuid-1", f.identity_id).await.unwrap();

        let rotated = f.engine.rotate(&issued.refresh_secret).await.unwrap();

        // Replay the original secret: reuse is detected and the successor
        // the first rotation produced dies with the lineage.
        let err = f.engine.rotate(&issued.refresh_secret).await.unwrap_err();
        assert!(matches!(err, SessionError::TokenReuseDetected));

        let successor = f
            .db
            .refresh_tokens()
            .get_by_id(rotated.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(successor.state, TokenState::Revoked);

        let events = f.audit.events.lock().unwrap();
        assert!(events
            .iter()
            .any(|e| matches!(e, AuditEvent::ReuseDetected { .. })));
    }

    #[tokio::test]
    async fn test_whole_lineage_dead_after_replay() {
        let f = setup().await;
        let issued = f.issuer.issue("uuid-1", f.identity_id).await.unwrap();

        let rotated = f.engine.rotate(&issued.refresh_secret).await.unwrap();
        f.engine.rotate(&issued.refresh_secret).await.unwrap_err();

        // The successor was revoked above, so presenting it is also replay.
        let err = f.engine.rotate(&rotated.refresh_secret).await.unwrap_err();
        assert!(matches!(err, SessionError::TokenReuseDetected));
        assert_eq!(
            f.db.refresh_tokens()
                .count_in_lineage(&issued.lineage, TokenState::Active)
                .await
                .unwrap(),
            0
        );
    }

    #[tokio::test]
    async fn test_expired_token_is_rejected_without_rotation() {
        let f = setup().await;
        let now = unix_now();
        f.db.refresh_tokens()
            .create(
                &hash_refresh_secret("stale"),
                f.identity_id,
                "lin-stale",
                now - 1000,
                now - 1,
            )
            .await
            .unwrap();

        let err = f.engine.rotate("stale").await.unwrap_err();
        assert!(matches!(err, SessionError::TokenExpired));

        // Expiry is a derived condition, not a stored transition.
        let record = f
            .db
            .refresh_tokens()
            .get_by_hash(&hash_refresh_secret("stale"))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.state, TokenState::Active);
    }

    #[tokio::test]
    async fn test_concurrent_rotation_single_winner() {
        let f = setup().await;
        let issued = f.issuer.issue("uuid-1", f.identity_id).await.unwrap();

        let (a, b) = tokio::join!(
            f.engine.rotate(&issued.refresh_secret),
            f.engine.rotate(&issued.refresh_secret),
        );

        let (winner, loser) = match (a, b) {
            (Ok(w), Err(l)) => (w, l),
            (Err(l), Ok(w)) => (w, l),
            other => panic!("expected one winner and one loser, got {:?}", other),
        };
        assert!(matches!(loser, SessionError::TokenReuseDetected));

        // The race loser must not have revoked what the winner issued: the
        // lineage's single active record is the winner's successor.
        let successor = f
            .db
            .refresh_tokens()
            .get_by_id(winner.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(successor.state, TokenState::Active);
        assert_eq!(
            f.db.refresh_tokens()
                .count_in_lineage(&issued.lineage, TokenState::Active)
                .await
                .unwrap(),
            1
        );

        let original = f
            .db
            .refresh_tokens()
            .get_by_id(issued.record_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(original.state, TokenState::Rotated);
    }
}
