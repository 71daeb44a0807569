//! Retention sweeps run from the master scheduler tick.
//!
//! These are the only paths allowed to hard-delete; they intentionally
//! bypass the soft-delete read filters.

use sqlx::PgPool;
use tracing::info;

use crate::failures::FailureStore;
use crate::imports::ImportStore;
use crate::library::LibraryStore;
use crate::notifications::NotificationStore;
use crate::StoreResult;

/// Retention windows in days (import timeout is hours).
pub struct RetentionPolicy {
    pub stuck_import_hours: i64,
    pub trashed_library_days: i64,
    pub feed_entry_days: i64,
    pub notification_days: i64,
    pub worker_failure_days: i64,
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            stuck_import_hours: 1,
            trashed_library_days: 90,
            feed_entry_days: 90,
            notification_days: 90,
            worker_failure_days: 30,
        }
    }
}

#[derive(Debug, Default)]
pub struct CleanupReport {
    pub stuck_imports_failed: u64,
    pub library_entries_purged: u64,
    pub feed_entries_pruned: u64,
    pub notifications_pruned: u64,
    pub worker_failures_pruned: u64,
}

pub struct CleanupStore;

impl CleanupStore {
    pub async fn run(pool: &PgPool, policy: &RetentionPolicy) -> StoreResult<CleanupReport> {
        let report = CleanupReport {
            stuck_imports_failed: ImportStore::fail_stuck(pool, policy.stuck_import_hours).await?,
            library_entries_purged:
                LibraryStore::hard_delete_trashed(pool, policy.trashed_library_days).await?,
            feed_entries_pruned: Self::prune_feed_entries(pool, policy.feed_entry_days).await?,
            notifications_pruned:
                NotificationStore::prune_older_than(pool, policy.notification_days).await?,
            worker_failures_pruned:
                FailureStore::prune_older_than(pool, policy.worker_failure_days).await?,
        };
        info!(
            stuck_imports = report.stuck_imports_failed,
            library_purged = report.library_entries_purged,
            feed_pruned = report.feed_entries_pruned,
            notifications_pruned = report.notifications_pruned,
            failures_pruned = report.worker_failures_pruned,
            "cleanup pass complete"
        );
        Ok(report)
    }

    async fn prune_feed_entries(pool: &PgPool, days: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM feed_entries WHERE last_updated_at < now() - ($1 || ' days')::interval",
        )
        .bind(days.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
