//! Refresh token ledger.
//!
//! Each record belongs to one identity and one lineage (the chain produced
//! by successive rotations of an original issuance). Lifecycle is a one-way
//! street: active -> rotated (exactly once, via a conditional update) and
//! {active, rotated} -> revoked. Records leave the table only through the
//! sweeper, once terminal and past retention.

use sqlx::sqlite::SqlitePool;

/// Lifecycle state of a refresh token record.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenState {
    Active,
    Rotated,
    Revoked,
}

impl TokenState {
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenState::Active => "active",
            TokenState::Rotated => "rotated",
            TokenState::Revoked => "revoked",
        }
    }

    pub fn from_str(s: &str) -> Self {
        match s {
            "rotated" => TokenState::Rotated,
            "revoked" => TokenState::Revoked,
            _ => TokenState::Active,
        }
    }
}

/// A refresh token ledger record.
#[derive(Debug, Clone)]
pub struct RefreshTokenRecord {
    pub id: i64,
    /// SHA-256 of the opaque bearer secret; the secret itself is never stored.
    pub token_hash: String,
    pub identity_id: i64,
    pub lineage: String,
    pub state: TokenState,
    pub issued_at: i64,
    pub expires_at: i64,
    pub revoked_at: Option<i64>,
    pub superseded_by: Option<i64>,
}

#[derive(sqlx::FromRow)]
struct RecordRow {
    id: i64,
    token_hash: String,
    identity_id: i64,
    lineage: String,
    state: String,
    issued_at: i64,
    expires_at: i64,
    revoked_at: Option<i64>,
    superseded_by: Option<i64>,
}

impl From<RecordRow> for RefreshTokenRecord {
    fn from(row: RecordRow) -> Self {
        Self {
            id: row.id,
            token_hash: row.token_hash,
            identity_id: row.identity_id,
            lineage: row.lineage,
            state: TokenState::from_str(&row.state),
            issued_at: row.issued_at,
            expires_at: row.expires_at,
            revoked_at: row.revoked_at,
            superseded_by: row.superseded_by,
        }
    }
}

/// Store for refresh token records.
#[derive(Clone)]
pub struct RefreshTokenStore {
    pool: SqlitePool,
}

impl RefreshTokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new active record. Returns the record ID.
    pub async fn create(
        &self,
        token_hash: &str,
        identity_id: i64,
        lineage: &str,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, identity_id, lineage, state, issued_at, expires_at) \
             VALUES (?, ?, ?, 'active', ?, ?)",
        )
        .bind(token_hash)
        .bind(identity_id)
        .bind(lineage)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Look up a record by the hash of its bearer secret.
    pub async fn get_by_hash(&self, token_hash: &str) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, token_hash, identity_id, lineage, state, issued_at, expires_at, revoked_at, superseded_by \
             FROM refresh_tokens WHERE token_hash = ?",
        )
        .bind(token_hash)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// Get a record by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<RefreshTokenRecord>, sqlx::Error> {
        let row: Option<RecordRow> = sqlx::query_as(
            "SELECT id, token_hash, identity_id, lineage, state, issued_at, expires_at, revoked_at, superseded_by \
             FROM refresh_tokens WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(RefreshTokenRecord::from))
    }

    /// Atomically rotate a record: flip it from active to rotated, insert its
    /// active successor in the same lineage, and link `superseded_by`, all in
    /// one transaction.
    ///
    /// The first UPDATE is conditional on `state = 'active'` and its
    /// rows-affected count is the compare-and-swap: of two concurrent
    /// rotations of the same record, exactly one observes the active state
    /// and wins. The loser gets `Ok(None)` and nothing written.
    pub async fn supersede(
        &self,
        old: &RefreshTokenRecord,
        new_token_hash: &str,
        issued_at: i64,
        expires_at: i64,
    ) -> Result<Option<i64>, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let claimed =
            sqlx::query("UPDATE refresh_tokens SET state = 'rotated' WHERE id = ? AND state = 'active'")
                .bind(old.id)
                .execute(&mut *tx)
                .await?;
        if claimed.rows_affected() == 0 {
            // Lost the race; dropping the transaction rolls back.
            return Ok(None);
        }

        let inserted = sqlx::query(
            "INSERT INTO refresh_tokens (token_hash, identity_id, lineage, state, issued_at, expires_at) \
             VALUES (?, ?, ?, 'active', ?, ?)",
        )
        .bind(new_token_hash)
        .bind(old.identity_id)
        .bind(&old.lineage)
        .bind(issued_at)
        .bind(expires_at)
        .execute(&mut *tx)
        .await?;
        let successor_id = inserted.last_insert_rowid();

        sqlx::query("UPDATE refresh_tokens SET superseded_by = ? WHERE id = ?")
            .bind(successor_id)
            .bind(old.id)
            .execute(&mut *tx)
            .await?;

        tx.commit().await?;
        Ok(Some(successor_id))
    }

    /// Revoke a single record. Returns whether a row actually transitioned;
    /// revoking an already-revoked record affects nothing and is not an error.
    pub async fn revoke_one(&self, id: i64, now: i64) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked', revoked_at = ? WHERE id = ? AND state != 'revoked'",
        )
        .bind(now)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Revoke every non-revoked record in a lineage. Returns the number of
    /// records transitioned.
    pub async fn revoke_lineage(&self, lineage: &str, now: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked', revoked_at = ? WHERE lineage = ? AND state != 'revoked'",
        )
        .bind(now)
        .bind(lineage)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Revoke every non-revoked record belonging to an identity.
    pub async fn revoke_all_for_identity(
        &self,
        identity_id: i64,
        now: i64,
    ) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE refresh_tokens SET state = 'revoked', revoked_at = ? WHERE identity_id = ? AND state != 'revoked'",
        )
        .bind(now)
        .bind(identity_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// List an identity's active, unexpired records, newest first.
    pub async fn list_active_for_identity(
        &self,
        identity_id: i64,
        now: i64,
    ) -> Result<Vec<RefreshTokenRecord>, sqlx::Error> {
        let rows: Vec<RecordRow> = sqlx::query_as(
            "SELECT id, token_hash, identity_id, lineage, state, issued_at, expires_at, revoked_at, superseded_by \
             FROM refresh_tokens WHERE identity_id = ? AND state = 'active' AND expires_at > ? \
             ORDER BY issued_at DESC, id DESC",
        )
        .bind(identity_id)
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(RefreshTokenRecord::from).collect())
    }

    /// Delete one batch of terminal records older than the cutoff: revoked
    /// records whose revocation is past retention, and anything whose expiry
    /// is past retention regardless of state. Returns rows deleted; callers
    /// loop until a batch comes back smaller than `limit`.
    pub async fn sweep_terminal(&self, cutoff: i64, limit: i64) -> Result<u64, sqlx::Error> {
        let result = sqlx::query(
            "DELETE FROM refresh_tokens WHERE id IN ( \
                SELECT id FROM refresh_tokens \
                WHERE (state = 'revoked' AND revoked_at < ?) OR expires_at < ? \
                LIMIT ?)",
        )
        .bind(cutoff)
        .bind(cutoff)
        .bind(limit)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Count records in a lineage by state (test and sweep introspection).
    pub async fn count_in_lineage(
        &self,
        lineage: &str,
        state: TokenState,
    ) -> Result<i64, sqlx::Error> {
        let count: (i64,) =
            sqlx::query_as("SELECT COUNT(*) FROM refresh_tokens WHERE lineage = ? AND state = ?")
                .bind(lineage)
                .bind(state.as_str())
                .fetch_one(&self.pool)
                .await?;
        Ok(count.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Database;

    async fn seed(db: &Database) -> i64 {
        db.identities()
            .create("uuid-1", "alice@example.com", None, None)
            .await
            .unwrap()
    }

    fn now() -> i64 {
        use std::time::{SystemTime, UNIX_EPOCH};
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as i64
    }

    #[tokio::test]
    async fn test_create_and_lookup() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        let id = db
            .refresh_tokens()
            .create("hash-1", identity, "lin-1", t, t + 600)
            .await
            .unwrap();

        let record = db
            .refresh_tokens()
            .get_by_hash("hash-1")
            .await
            .unwrap()
            .unwrap();
        assert_eq!(record.id, id);
        assert_eq!(record.identity_id, identity);
        assert_eq!(record.lineage, "lin-1");
        assert_eq!(record.state, TokenState::Active);
        assert!(record.superseded_by.is_none());

        assert!(db.refresh_tokens().get_by_hash("nope").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_supersede_links_successor() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        db.refresh_tokens()
            .create("hash-1", identity, "lin-1", t, t + 600)
            .await
            .unwrap();
        let old = db
            .refresh_tokens()
            .get_by_hash("hash-1")
            .await
            .unwrap()
            .unwrap();

        let successor_id = db
            .refresh_tokens()
            .supersede(&old, "hash-2", t + 1, t + 601)
            .await
            .unwrap()
            .expect("first rotation should win");

        let old = db.refresh_tokens().get_by_id(old.id).await.unwrap().unwrap();
        assert_eq!(old.state, TokenState::Rotated);
        assert_eq!(old.superseded_by, Some(successor_id));

        let successor = db
            .refresh_tokens()
            .get_by_id(successor_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(successor.state, TokenState::Active);
        assert_eq!(successor.lineage, "lin-1");
        assert_eq!(successor.identity_id, identity);
    }

    #[tokio::test]
    async fn test_supersede_is_single_use() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        db.refresh_tokens()
            .create("hash-1", identity, "lin-1", t, t + 600)
            .await
            .unwrap();
        let old = db
            .refresh_tokens()
            .get_by_hash("hash-1")
            .await
            .unwrap()
            .unwrap();

        let first = db
            .refresh_tokens()
            .supersede(&old, "hash-2", t, t + 600)
            .await
            .unwrap();
        assert!(first.is_some());

        // Same pre-image record presented again: the conditional update sees
        // a non-active state and refuses.
        let second = db
            .refresh_tokens()
            .supersede(&old, "hash-3", t, t + 600)
            .await
            .unwrap();
        assert!(second.is_none());

        // The loser must not have written its successor.
        assert!(db.refresh_tokens().get_by_hash("hash-3").await.unwrap().is_none());
        assert_eq!(
            db.refresh_tokens()
                .count_in_lineage("lin-1", TokenState::Active)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_concurrent_supersede_has_one_winner() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        db.refresh_tokens()
            .create("hash-1", identity, "lin-1", t, t + 600)
            .await
            .unwrap();
        let old = db
            .refresh_tokens()
            .get_by_hash("hash-1")
            .await
            .unwrap()
            .unwrap();

        let store_a = db.refresh_tokens();
        let store_b = db.refresh_tokens();
        let old_a = old.clone();
        let old_b = old.clone();

        let (a, b) = tokio::join!(
            store_a.supersede(&old_a, "hash-a", t, t + 600),
            store_b.supersede(&old_b, "hash-b", t, t + 600),
        );

        let a = a.unwrap();
        let b = b.unwrap();
        assert!(
            a.is_some() ^ b.is_some(),
            "exactly one concurrent rotation must win (a={:?}, b={:?})",
            a,
            b
        );
        assert_eq!(
            db.refresh_tokens()
                .count_in_lineage("lin-1", TokenState::Active)
                .await
                .unwrap(),
            1
        );
    }

    #[tokio::test]
    async fn test_revocation_is_idempotent() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        let id = db
            .refresh_tokens()
            .create("hash-1", identity, "lin-1", t, t + 600)
            .await
            .unwrap();

        assert!(db.refresh_tokens().revoke_one(id, t).await.unwrap());
        assert!(!db.refresh_tokens().revoke_one(id, t + 10).await.unwrap());

        // Revocation time is set by the first transition only.
        let record = db.refresh_tokens().get_by_id(id).await.unwrap().unwrap();
        assert_eq!(record.state, TokenState::Revoked);
        assert_eq!(record.revoked_at, Some(t));
    }

    #[tokio::test]
    async fn test_revoke_lineage_and_identity() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        db.refresh_tokens()
            .create("hash-1", identity, "lin-1", t, t + 600)
            .await
            .unwrap();
        db.refresh_tokens()
            .create("hash-2", identity, "lin-1", t, t + 600)
            .await
            .unwrap();
        db.refresh_tokens()
            .create("hash-3", identity, "lin-2", t, t + 600)
            .await
            .unwrap();

        let n = db.refresh_tokens().revoke_lineage("lin-1", t).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(
            db.refresh_tokens()
                .count_in_lineage("lin-2", TokenState::Active)
                .await
                .unwrap(),
            1
        );

        let n = db
            .refresh_tokens()
            .revoke_all_for_identity(identity, t)
            .await
            .unwrap();
        assert_eq!(n, 1);

        // Second pass is a no-op, not an error.
        let n = db
            .refresh_tokens()
            .revoke_all_for_identity(identity, t)
            .await
            .unwrap();
        assert_eq!(n, 0);
    }

    #[tokio::test]
    async fn test_list_active_excludes_expired_and_revoked() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();

        db.refresh_tokens()
            .create("live", identity, "lin-1", t, t + 600)
            .await
            .unwrap();
        db.refresh_tokens()
            .create("expired", identity, "lin-2", t - 700, t - 100)
            .await
            .unwrap();
        let dead = db
            .refresh_tokens()
            .create("revoked", identity, "lin-3", t, t + 600)
            .await
            .unwrap();
        db.refresh_tokens().revoke_one(dead, t).await.unwrap();

        let active = db
            .refresh_tokens()
            .list_active_for_identity(identity, t)
            .await
            .unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].token_hash, "live");
    }

    #[tokio::test]
    async fn test_sweep_terminal() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = seed(&db).await;
        let t = now();
        let retention = 30 * 24 * 3600;

        // Long-dead: revoked well past retention.
        let old_revoked = db
            .refresh_tokens()
            .create("old-revoked", identity, "lin-1", t - 3 * retention, t - 2 * retention)
            .await
            .unwrap();
        db.refresh_tokens()
            .revoke_one(old_revoked, t - 2 * retention)
            .await
            .unwrap();
        // Long-expired but never revoked.
        db.refresh_tokens()
            .create("old-expired", identity, "lin-2", t - 3 * retention, t - 2 * retention)
            .await
            .unwrap();
        // Recently revoked: inside the retention window, must survive.
        let fresh_revoked = db
            .refresh_tokens()
            .create("fresh-revoked", identity, "lin-3", t, t + 600)
            .await
            .unwrap();
        db.refresh_tokens().revoke_one(fresh_revoked, t).await.unwrap();
        // Live record, must survive.
        db.refresh_tokens()
            .create("live", identity, "lin-4", t, t + 600)
            .await
            .unwrap();

        let deleted = db
            .refresh_tokens()
            .sweep_terminal(t - retention, 100)
            .await
            .unwrap();
        assert_eq!(deleted, 2);

        assert!(db.refresh_tokens().get_by_hash("old-revoked").await.unwrap().is_none());
        assert!(db.refresh_tokens().get_by_hash("old-expired").await.unwrap().is_none());
        assert!(db.refresh_tokens().get_by_hash("fresh-revoked").await.unwrap().is_some());
        assert!(db.refresh_tokens().get_by_hash("live").await.unwrap().is_some());
    }
}
