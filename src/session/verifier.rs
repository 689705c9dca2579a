//! Credential verification: password logins and federated profiles.

use crate::db::{Database, Identity};
use crate::oauth::FederatedProfile;
use crate::password::{verify_password, DUMMY_HASH};

use super::SessionError;

/// Outcome of resolving a federated profile.
#[derive(Debug, Clone)]
pub struct FederatedResolution {
    pub identity: Identity,
    /// True when this login created the identity.
    pub created: bool,
}

/// Verifies credentials against the identity directory. Performs no logging
/// and consults no rate limiter; callers apply the limiter before invoking.
#[derive(Clone)]
pub struct CredentialVerifier {
    db: Database,
}

impl CredentialVerifier {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Verify an identifier/secret pair.
    ///
    /// "No such identity", "no password on this account", and "wrong secret"
    /// all fail with the same `InvalidCredentials`, and all three paths run
    /// an Argon2 verification so their timing stays in the same class and
    /// the endpoint cannot be used to enumerate accounts.
    pub async fn verify_password_login(
        &self,
        identifier: &str,
        secret: &str,
    ) -> Result<Identity, SessionError> {
        let identity = self.db.identities().get_by_identifier(identifier).await?;

        match identity {
            Some(identity) => {
                let hash = identity.password_hash.as_deref().unwrap_or(DUMMY_HASH);
                if verify_password(hash, secret) && identity.password_hash.is_some() {
                    Ok(identity)
                } else {
                    Err(SessionError::InvalidCredentials)
                }
            }
            None => {
                verify_password(DUMMY_HASH, secret);
                Err(SessionError::InvalidCredentials)
            }
        }
    }

    /// Resolve a federated profile to a local identity, creating and linking
    /// one on first login.
    ///
    /// A profile whose email already belongs to an identity without this
    /// provider link is a `FederationConflict`; accounts are never silently
    /// merged on an email match.
    pub async fn resolve_federated(
        &self,
        provider: &str,
        profile: &FederatedProfile,
    ) -> Result<FederatedResolution, SessionError> {
        if let Some(identity_id) = self
            .db
            .identities()
            .find_federated(provider, &profile.subject)
            .await?
        {
            let identity = self
                .db
                .identities()
                .get_by_id(identity_id)
                .await?
                .ok_or(SessionError::IdentityNotFound)?;
            return Ok(FederatedResolution {
                identity,
                created: false,
            });
        }

        if let Some(email) = profile.email.as_deref() {
            if self.db.identities().get_by_identifier(email).await?.is_some() {
                return Err(SessionError::FederationConflict);
            }
        }

        // First federated login: create the identity and its link. Profile
        // fields are best-effort initial values; a provider that withholds
        // the email gets a synthesized identifier.
        let identifier = profile
            .email
            .clone()
            .unwrap_or_else(|| format!("{}:{}", provider, profile.subject));
        let uuid = uuid::Uuid::new_v4().to_string();

        let created = self
            .db
            .identities()
            .create_federated(
                &uuid,
                &identifier,
                profile.display_name.as_deref(),
                provider,
                &profile.subject,
                profile.email.as_deref(),
            )
            .await;

        let identity_id = match created {
            Ok(id) => id,
            // Two first logins racing on the same subject: one insert hits
            // the unique (provider, subject) constraint. Fall back to the
            // link the winner created.
            Err(e) if is_unique_violation(&e) => self
                .db
                .identities()
                .find_federated(provider, &profile.subject)
                .await?
                .ok_or(SessionError::FederationConflict)?,
            Err(e) => return Err(e.into()),
        };

        let identity = self
            .db
            .identities()
            .get_by_id(identity_id)
            .await?
            .ok_or(SessionError::IdentityNotFound)?;

        Ok(FederatedResolution {
            identity,
            created: true,
        })
    }
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    matches!(e, sqlx::Error::Database(db) if db.is_unique_violation())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::password::hash_password;

    async fn setup() -> (Database, CredentialVerifier) {
        let db = Database::open(":memory:").await.unwrap();
        let verifier = CredentialVerifier::new(db.clone());
        (db, verifier)
    }

    #[tokio::test]
    async fn test_password_login_happy_path() {
        let (db, verifier) = setup().await;
        let hash = hash_password("correct horse battery").unwrap();
        db.identities()
            .create("uuid-1", "alice@example.com", Some(&hash), Some("Alice"))
            .await
            .unwrap();

        let identity = verifier
            .verify_password_login("alice@example.com", "correct horse battery")
            .await
            .unwrap();
        assert_eq!(identity.uuid, "uuid-1");
    }

    #[tokio::test]
    async fn test_wrong_secret_and_unknown_identifier_are_identical() {
        let (db, verifier) = setup().await;
        let hash = hash_password("correct horse battery").unwrap();
        db.identities()
            .create("uuid-1", "alice@example.com", Some(&hash), None)
            .await
            .unwrap();

        let wrong = verifier
            .verify_password_login("alice@example.com", "wrong")
            .await
            .unwrap_err();
        let unknown = verifier
            .verify_password_login("nobody@example.com", "wrong")
            .await
            .unwrap_err();

        assert!(matches!(wrong, SessionError::InvalidCredentials));
        assert!(matches!(unknown, SessionError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_oauth_only_account_rejects_password_login() {
        let (db, verifier) = setup().await;
        db.identities()
            .create("uuid-1", "alice@example.com", None, None)
            .await
            .unwrap();

        let err = verifier
            .verify_password_login("alice@example.com", "anything")
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::InvalidCredentials));
    }

    #[tokio::test]
    async fn test_first_federated_login_creates_identity() {
        let (db, verifier) = setup().await;
        let profile = FederatedProfile {
            subject: "gh-9001".to_string(),
            email: Some("alice@example.com".to_string()),
            display_name: Some("Alice".to_string()),
        };

        let resolved = verifier.resolve_federated("github", &profile).await.unwrap();
        assert!(resolved.created);
        assert_eq!(resolved.identity.identifier, "alice@example.com");
        assert!(resolved.identity.password_hash.is_none());

        let again = verifier.resolve_federated("github", &profile).await.unwrap();
        assert!(!again.created);
        assert_eq!(again.identity.id, resolved.identity.id);

        let links = db.identities().list_federated(resolved.identity.id).await.unwrap();
        assert_eq!(links.len(), 1);
    }

    #[tokio::test]
    async fn test_email_collision_is_a_conflict() {
        let (db, verifier) = setup().await;
        db.identities()
            .create("uuid-1", "alice@example.com", None, None)
            .await
            .unwrap();

        let profile = FederatedProfile {
            subject: "gh-9001".to_string(),
            email: Some("alice@example.com".to_string()),
            display_name: None,
        };

        let err = verifier.resolve_federated("github", &profile).await.unwrap_err();
        assert!(matches!(err, SessionError::FederationConflict));
    }

    #[tokio::test]
    async fn test_profile_without_email_gets_synthesized_identifier() {
        let (_db, verifier) = setup().await;
        let profile = FederatedProfile {
            subject: "gh-42".to_string(),
            email: None,
            display_name: None,
        };

        let resolved = verifier.resolve_federated("github", &profile).await.unwrap();
        assert_eq!(resolved.identity.identifier, "github:gh-42");
    }
}
