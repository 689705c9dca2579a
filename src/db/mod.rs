mod identity;
mod token;

use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub use identity::{FederatedLink, Identity, IdentityStore};
pub use token::{RefreshTokenRecord, RefreshTokenStore, TokenState};

#[derive(Clone)]
pub struct Database {
    pool: SqlitePool,
}

impl Database {
    /// Open or create a database at the given path.
    /// Use ":memory:" for an in-memory database.
    pub async fn open(path: &str) -> Result<Self, sqlx::Error> {
        let url = if path == ":memory:" {
            // A plain :memory: database gives every pooled connection its own
            // empty database; a named shared-cache memory database gives the
            // whole pool one instance.
            format!(
                "sqlite:file:{}?mode=memory&cache=shared",
                uuid::Uuid::new_v4().simple()
            )
        } else {
            format!("sqlite:{}?mode=rwc", path)
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&url)
            .await?;

        let db = Self { pool };
        db.migrate().await?;
        Ok(db)
    }

    /// Get the current schema version.
    async fn get_version(&self) -> Result<i32, sqlx::Error> {
        let result: Option<(i32,)> = sqlx::query_as("SELECT version FROM schema_version LIMIT 1")
            .fetch_optional(&self.pool)
            .await?;
        Ok(result.map(|r| r.0).unwrap_or(0))
    }

    /// Set the schema version within a transaction.
    async fn set_version(
        tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
        version: i32,
    ) -> Result<(), sqlx::Error> {
        sqlx::query("DELETE FROM schema_version")
            .execute(&mut **tx)
            .await?;
        sqlx::query("INSERT INTO schema_version (version) VALUES (?)")
            .bind(version)
            .execute(&mut **tx)
            .await?;
        Ok(())
    }

    /// Run database migrations.
    async fn migrate(&self) -> Result<(), sqlx::Error> {
        sqlx::query("CREATE TABLE IF NOT EXISTS schema_version (version INTEGER NOT NULL)")
            .execute(&self.pool)
            .await?;

        let version = self.get_version().await?;

        if version < 1 {
            self.migrate_v1().await?;
        }

        Ok(())
    }

    /// Execute a list of queries in a transaction, then set the version.
    async fn run_migration(
        &self,
        version: i32,
        queries: &[&'static str],
    ) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for query in queries {
            sqlx::query(*query).execute(&mut *tx).await?;
        }
        Self::set_version(&mut tx, version).await?;
        tx.commit().await?;
        Ok(())
    }

    async fn migrate_v1(&self) -> Result<(), sqlx::Error> {
        self.run_migration(
            1,
            &[
                // Identities table. The directory proper is an external
                // collaborator; this service stores only what credential
                // verification needs.
                "CREATE TABLE identities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    uuid TEXT UNIQUE NOT NULL,
                    identifier TEXT UNIQUE NOT NULL COLLATE NOCASE,
                    password_hash TEXT,
                    display_name TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_identities_uuid ON identities(uuid)",
                "CREATE INDEX idx_identities_identifier ON identities(identifier)",
                // Linked OAuth provider identities
                "CREATE TABLE federated_identities (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    provider TEXT NOT NULL,
                    subject TEXT NOT NULL,
                    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
                    email TEXT,
                    created_at TEXT NOT NULL DEFAULT (datetime('now')),
                    UNIQUE(provider, subject)
                )",
                "CREATE INDEX idx_federated_identity_id ON federated_identities(identity_id)",
                // Refresh token ledger. Keyed by the SHA-256 of the opaque
                // bearer secret; the secret itself is never stored.
                "CREATE TABLE refresh_tokens (
                    id INTEGER PRIMARY KEY AUTOINCREMENT,
                    token_hash TEXT UNIQUE NOT NULL,
                    identity_id INTEGER NOT NULL REFERENCES identities(id) ON DELETE CASCADE,
                    lineage TEXT NOT NULL,
                    state TEXT NOT NULL DEFAULT 'active',
                    issued_at INTEGER NOT NULL,
                    expires_at INTEGER NOT NULL,
                    revoked_at INTEGER,
                    superseded_by INTEGER REFERENCES refresh_tokens(id),
                    created_at TEXT NOT NULL DEFAULT (datetime('now'))
                )",
                "CREATE INDEX idx_refresh_tokens_hash ON refresh_tokens(token_hash)",
                "CREATE INDEX idx_refresh_tokens_identity ON refresh_tokens(identity_id)",
                "CREATE INDEX idx_refresh_tokens_lineage ON refresh_tokens(lineage)",
            ],
        )
        .await
    }

    /// Get the identity store.
    pub fn identities(&self) -> IdentityStore {
        IdentityStore::new(self.pool.clone())
    }

    /// Get the refresh token ledger.
    pub fn refresh_tokens(&self) -> RefreshTokenStore {
        RefreshTokenStore::new(self.pool.clone())
    }

    /// Get the underlying connection pool (for tests that need raw SQL access).
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }
}
