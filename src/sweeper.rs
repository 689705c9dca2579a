//! Scheduled sweep of terminal refresh-token records.
//!
//! Housekeeping only: validity is always re-derived from `state` and
//! `expires_at`, never from record absence, so a delayed or skipped sweep
//! grows storage but never changes an authorization decision.

use crate::db::Database;
use crate::session::unix_now;
use std::time::Duration;
use tracing::{error, info};

/// How long terminal records are retained before deletion.
const RETENTION_SECS: i64 = 30 * 24 * 60 * 60; // 30 days

/// Interval between sweep runs.
const SWEEP_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60); // 1 day

/// Rows deleted per batch.
const SWEEP_BATCH: i64 = 500;

/// Run one full sweep, deleting in batches until the backlog is drained.
pub async fn run_sweep(db: &Database) {
    let cutoff = unix_now() - RETENTION_SECS;
    let mut total = 0u64;

    loop {
        match db.refresh_tokens().sweep_terminal(cutoff, SWEEP_BATCH).await {
            Ok(deleted) => {
                total += deleted;
                if deleted < SWEEP_BATCH as u64 {
                    break;
                }
            }
            Err(e) => {
                error!("Failed to sweep refresh token ledger: {}", e);
                return;
            }
        }
    }

    if total > 0 {
        info!("Swept {} terminal refresh token records", total);
    }
}

/// Spawn a background task that sweeps periodically.
/// Returns the handle so shutdown can abort the task; nothing starts
/// implicitly at module load.
pub fn spawn_sweep_scheduler(db: Database) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        // The immediate first tick; startup already swept.
        interval.tick().await;

        loop {
            interval.tick().await;
            run_sweep(&db).await;
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_sweep_removes_only_stale_terminal_records() {
        let db = Database::open(":memory:").await.unwrap();
        let identity = db
            .identities()
            .create("uuid-1", "alice@example.com", None, None)
            .await
            .unwrap();
        let now = unix_now();

        let stale = db
            .refresh_tokens()
            .create("stale", identity, "lin-1", now - 3 * RETENTION_SECS, now - 2 * RETENTION_SECS)
            .await
            .unwrap();
        db.refresh_tokens()
            .revoke_one(stale, now - 2 * RETENTION_SECS)
            .await
            .unwrap();
        db.refresh_tokens()
            .create("live", identity, "lin-2", now, now + 600)
            .await
            .unwrap();

        run_sweep(&db).await;

        assert!(db.refresh_tokens().get_by_hash("stale").await.unwrap().is_none());
        assert!(db.refresh_tokens().get_by_hash("live").await.unwrap().is_some());
    }
}
