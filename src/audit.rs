//! Activity audit interface.
//!
//! The audit logger is an external collaborator. It is notified strictly
//! before or after the ledger's transactional writes, never from inside
//! them, so a slow sink can never hold a ledger transaction open.

use tracing::{info, warn};

/// Security-relevant session events.
#[derive(Debug, Clone)]
pub enum AuditEvent {
    /// Password or federated login succeeded.
    LoginSucceeded { identity_id: i64 },
    /// A new identity was created from a federated profile.
    FederatedIdentityCreated { identity_id: i64, provider: String },
    /// A rotated or revoked refresh token was presented again.
    ReuseDetected { identity_id: i64, lineage: String },
    /// Sessions were revoked outside the rotation flow.
    SessionsRevoked { identity_id: i64, count: u64 },
    /// The stored password hash was replaced.
    PasswordChanged { identity_id: i64 },
}

/// Sink for audit events.
pub trait AuditLog: Send + Sync {
    fn record(&self, event: AuditEvent);
}

/// Default sink: structured tracing events.
pub struct TracingAuditLog;

impl AuditLog for TracingAuditLog {
    fn record(&self, event: AuditEvent) {
        match event {
            AuditEvent::LoginSucceeded { identity_id } => {
                info!(identity_id, "Login succeeded");
            }
            AuditEvent::FederatedIdentityCreated { identity_id, provider } => {
                info!(identity_id, provider = %provider, "Federated identity created");
            }
            AuditEvent::ReuseDetected { identity_id, lineage } => {
                warn!(identity_id, lineage = %lineage, "Refresh token reuse detected");
            }
            AuditEvent::SessionsRevoked { identity_id, count } => {
                info!(identity_id, count, "Sessions revoked");
            }
            AuditEvent::PasswordChanged { identity_id } => {
                info!(identity_id, "Password changed");
            }
        }
    }
}
