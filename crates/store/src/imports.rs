//! Library import jobs.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::{StoreError, StoreResult};

const IMPORT_COLUMNS: &str =
    "id, user_id, source, status, total, processed, error, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ImportJobRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub status: String,
    pub total: i32,
    pub processed: i32,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub struct ImportStore;

impl ImportStore {
    pub async fn create(
        pool: &PgPool,
        user_id: Uuid,
        source: &str,
        total: i32,
    ) -> StoreResult<ImportJobRow> {
        let row = sqlx::query_as::<_, ImportJobRow>(&format!(
            "INSERT INTO import_jobs (user_id, source, total)
             VALUES ($1, $2, $3)
             RETURNING {}",
            IMPORT_COLUMNS
        ))
        .bind(user_id)
        .bind(source)
        .bind(total)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> StoreResult<Option<ImportJobRow>> {
        let row = sqlx::query_as::<_, ImportJobRow>(&format!(
            "SELECT {} FROM import_jobs WHERE id = $1",
            IMPORT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_processing(pool: &PgPool, id: Uuid) -> StoreResult<()> {
        Self::set_status(pool, id, "processing", None).await
    }

    pub async fn mark_completed(pool: &PgPool, id: Uuid, processed: i32) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE import_jobs
             SET status = 'completed', processed = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(processed)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn mark_failed(pool: &PgPool, id: Uuid, error: &str) -> StoreResult<()> {
        Self::set_status(pool, id, "failed", Some(error)).await
    }

    async fn set_status(
        pool: &PgPool,
        id: Uuid,
        status: &str,
        error: Option<&str>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE import_jobs SET status = $2, error = $3, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status)
        .bind(error)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn bump_progress(pool: &PgPool, id: Uuid, processed: i32) -> StoreResult<()> {
        sqlx::query("UPDATE import_jobs SET processed = $2, updated_at = now() WHERE id = $1")
            .bind(id)
            .bind(processed)
            .execute(pool)
            .await?;
        Ok(())
    }

    /// Fail jobs stuck in pending/processing for more than `hours`.
    pub async fn fail_stuck(pool: &PgPool, hours: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE import_jobs
             SET status = 'failed', error = 'import timed out', updated_at = now()
             WHERE status IN ('pending', 'processing')
               AND updated_at < now() - ($1 || ' hours')::interval",
        )
        .bind(hours.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
