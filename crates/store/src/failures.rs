//! Dead-letter persistence: every job's final failure becomes a
//! `worker_failures` row.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mangatrack_queue::{DeadLetterSink, FailedJob};

use crate::StoreResult;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct WorkerFailureRow {
    pub id: Uuid,
    pub queue: String,
    pub job_id: String,
    pub job_name: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: i32,
    pub created_at: DateTime<Utc>,
}

pub struct FailureStore;

impl FailureStore {
    pub async fn record(pool: &PgPool, failure: &FailedJob) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO worker_failures (queue, job_id, job_name, payload, error, attempts)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(&failure.queue)
        .bind(&failure.job_id)
        .bind(&failure.name)
        .bind(&failure.payload)
        .bind(&failure.error)
        .bind(failure.attempts as i32)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn recent(pool: &PgPool, limit: i64) -> StoreResult<Vec<WorkerFailureRow>> {
        let rows = sqlx::query_as::<_, WorkerFailureRow>(
            "SELECT id, queue, job_id, job_name, payload, error, attempts, created_at
             FROM worker_failures
             ORDER BY created_at DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn prune_older_than(pool: &PgPool, days: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM worker_failures WHERE created_at < now() - ($1 || ' days')::interval",
        )
        .bind(days.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

/// [`DeadLetterSink`] adapter wired into the queue manager.
pub struct PgDeadLetterSink {
    pool: PgPool,
}

impl PgDeadLetterSink {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl DeadLetterSink for PgDeadLetterSink {
    async fn record(&self, failure: &FailedJob) {
        if let Err(e) = FailureStore::record(&self.pool, failure).await {
            // Losing a dead letter is logged, never fatal to the worker.
            tracing::error!(
                queue = %failure.queue,
                job_id = %failure.job_id,
                error = %e,
                "failed to persist worker failure"
            );
        }
    }
}
