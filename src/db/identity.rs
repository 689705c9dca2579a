//! Identity directory access.
//!
//! The directory is conceptually external to the session subsystem: it is
//! read for credential verification, and written only to link a new OAuth
//! identity on first federated login or to store a changed password hash.

use sqlx::sqlite::SqlitePool;

#[derive(Clone)]
pub struct IdentityStore {
    pool: SqlitePool,
}

/// A user account as seen by the authentication subsystem.
#[derive(Debug, Clone)]
pub struct Identity {
    pub id: i64,
    pub uuid: String,
    pub identifier: String,
    /// None for OAuth-only accounts.
    pub password_hash: Option<String>,
    pub display_name: Option<String>,
}

#[derive(sqlx::FromRow)]
struct IdentityRow {
    id: i64,
    uuid: String,
    identifier: String,
    password_hash: Option<String>,
    display_name: Option<String>,
}

impl From<IdentityRow> for Identity {
    fn from(row: IdentityRow) -> Self {
        Self {
            id: row.id,
            uuid: row.uuid,
            identifier: row.identifier,
            password_hash: row.password_hash,
            display_name: row.display_name,
        }
    }
}

/// A linked OAuth provider identity.
#[derive(Debug, Clone)]
pub struct FederatedLink {
    pub provider: String,
    pub subject: String,
    pub identity_id: i64,
    pub email: Option<String>,
}

impl IdentityStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Create a new identity. Returns the identity ID.
    pub async fn create(
        &self,
        uuid: &str,
        identifier: &str,
        password_hash: Option<&str>,
        display_name: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO identities (uuid, identifier, password_hash, display_name) VALUES (?, ?, ?, ?)",
        )
        .bind(uuid)
        .bind(identifier)
        .bind(password_hash)
        .bind(display_name)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Get an identity by its login identifier.
    pub async fn get_by_identifier(&self, identifier: &str) -> Result<Option<Identity>, sqlx::Error> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, uuid, identifier, password_hash, display_name FROM identities WHERE identifier = ?",
        )
        .bind(identifier)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Identity::from))
    }

    /// Get an identity by ID.
    pub async fn get_by_id(&self, id: i64) -> Result<Option<Identity>, sqlx::Error> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, uuid, identifier, password_hash, display_name FROM identities WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Identity::from))
    }

    /// Get an identity by UUID.
    pub async fn get_by_uuid(&self, uuid: &str) -> Result<Option<Identity>, sqlx::Error> {
        let row: Option<IdentityRow> = sqlx::query_as(
            "SELECT id, uuid, identifier, password_hash, display_name FROM identities WHERE uuid = ?",
        )
        .bind(uuid)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(Identity::from))
    }

    /// Replace the stored password hash.
    pub async fn update_password(&self, id: i64, password_hash: &str) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("UPDATE identities SET password_hash = ? WHERE id = ?")
            .bind(password_hash)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Find the identity linked to an OAuth provider identity.
    pub async fn find_federated(
        &self,
        provider: &str,
        subject: &str,
    ) -> Result<Option<i64>, sqlx::Error> {
        let row: Option<(i64,)> = sqlx::query_as(
            "SELECT identity_id FROM federated_identities WHERE provider = ? AND subject = ?",
        )
        .bind(provider)
        .bind(subject)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| r.0))
    }

    /// Create a new identity together with its OAuth provider link.
    /// The insert pair is transactional so a crash cannot leave an identity
    /// without its link.
    pub async fn create_federated(
        &self,
        uuid: &str,
        identifier: &str,
        display_name: Option<&str>,
        provider: &str,
        subject: &str,
        email: Option<&str>,
    ) -> Result<i64, sqlx::Error> {
        let mut tx = self.pool.begin().await?;

        let result = sqlx::query(
            "INSERT INTO identities (uuid, identifier, display_name) VALUES (?, ?, ?)",
        )
        .bind(uuid)
        .bind(identifier)
        .bind(display_name)
        .execute(&mut *tx)
        .await?;
        let identity_id = result.last_insert_rowid();

        sqlx::query(
            "INSERT INTO federated_identities (provider, subject, identity_id, email) VALUES (?, ?, ?, ?)",
        )
        .bind(provider)
        .bind(subject)
        .bind(identity_id)
        .bind(email)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(identity_id)
    }

    /// List the OAuth provider links for an identity.
    pub async fn list_federated(&self, identity_id: i64) -> Result<Vec<FederatedLink>, sqlx::Error> {
        let rows: Vec<(String, String, i64, Option<String>)> = sqlx::query_as(
            "SELECT provider, subject, identity_id, email FROM federated_identities WHERE identity_id = ? ORDER BY created_at",
        )
        .bind(identity_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(provider, subject, identity_id, email)| FederatedLink {
                provider,
                subject,
                identity_id,
                email,
            })
            .collect())
    }
}
