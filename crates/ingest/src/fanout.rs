//! Feed fan-out worker.
//!
//! Consumes `feed-fanout` jobs and bumps every follower's feed cache
//! version key (`feed:v:<user>`). Readers build cache keys from the
//! current version, so an increment invalidates all cached pages at once.
//! Each fan-out job runs the increment exactly once per follower.

use std::sync::Arc;

use async_trait::async_trait;
use sqlx::PgPool;
use tracing::info;
use uuid::Uuid;

use mangatrack_core::jobs::FanoutJob;
use mangatrack_kvs::Kvs;
use mangatrack_queue::{Job, JobError, JobHandler};
use mangatrack_store::library::LibraryStore;

pub fn feed_version_key(user_id: Uuid) -> String {
    format!("feed:v:{}", user_id)
}

pub struct FanoutWorker {
    pool: PgPool,
    kvs: Arc<dyn Kvs>,
}

impl FanoutWorker {
    pub fn new(pool: PgPool, kvs: Arc<dyn Kvs>) -> Self {
        Self { pool, kvs }
    }

    async fn fan_out(&self, job: &FanoutJob) -> Result<(), JobError> {
        let followers = LibraryStore::followers_of_series(&self.pool, job.series_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        let mut invalidated = 0usize;
        for user_id in &followers {
            self.kvs
                .incr(&feed_version_key(*user_id))
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            invalidated += 1;
        }

        info!(
            series_id = %job.series_id,
            chapter = %job.chapter_number,
            followers = invalidated,
            "feed fan-out complete"
        );
        Ok(())
    }
}

#[async_trait]
impl JobHandler for FanoutWorker {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: FanoutJob = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad fanout payload: {}", e)))?;
        self.fan_out(&payload).await
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_version_key_shape() {
        let id = Uuid::nil();
        assert_eq!(
            feed_version_key(id),
            "feed:v:00000000-0000-0000-0000-000000000000"
        );
    }
}
