//! Per-user chapter read state: LWW upserts on `updated_at`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::StoreResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ChapterReadRow {
    pub user_id: Uuid,
    pub chapter_id: Uuid,
    pub is_read: bool,
    pub updated_at: DateTime<Utc>,
    pub read_at: Option<DateTime<Utc>>,
    pub device_id: Option<String>,
    pub source_used_id: Option<Uuid>,
}

pub struct ReadsStore;

impl ReadsStore {
    pub async fn get(
        pool: &PgPool,
        user_id: Uuid,
        chapter_id: Uuid,
    ) -> StoreResult<Option<ChapterReadRow>> {
        let row = sqlx::query_as::<_, ChapterReadRow>(
            "SELECT user_id, chapter_id, is_read, updated_at, read_at, device_id, source_used_id
             FROM user_chapter_reads
             WHERE user_id = $1 AND chapter_id = $2",
        )
        .bind(user_id)
        .bind(chapter_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn is_read(pool: &PgPool, user_id: Uuid, chapter_id: Uuid) -> StoreResult<bool> {
        Ok(Self::get(pool, user_id, chapter_id)
            .await?
            .map(|r| r.is_read)
            .unwrap_or(false))
    }

    /// Bulk-mark every chapter of `series_id` with `1 ≤ number_value ≤
    /// target` as read, as one statement. LWW: an upsert only wins when its
    /// `updated_at` is not older than the stored one. Returns the number of
    /// rows that were newly flipped to read.
    pub async fn bulk_mark_read(
        executor: impl sqlx::PgExecutor<'_>,
        user_id: Uuid,
        series_id: Uuid,
        target: f64,
        read_at: DateTime<Utc>,
        device_id: Option<&str>,
        source_used_id: Option<Uuid>,
    ) -> StoreResult<u64> {
        let result = sqlx::query(
            "INSERT INTO user_chapter_reads
                 (user_id, chapter_id, is_read, updated_at, read_at, device_id, source_used_id)
             SELECT $1, c.id, TRUE, $4, $4, $5, $6
             FROM chapters c
             WHERE c.series_id = $2 AND c.deleted_at IS NULL
               AND c.number_value IS NOT NULL
               AND c.number_value >= 1 AND c.number_value <= $3
             ON CONFLICT (user_id, chapter_id) DO UPDATE
                 SET is_read = TRUE,
                     updated_at = EXCLUDED.updated_at,
                     read_at = COALESCE(user_chapter_reads.read_at, EXCLUDED.read_at),
                     device_id = COALESCE(EXCLUDED.device_id, user_chapter_reads.device_id),
                     source_used_id = COALESCE(EXCLUDED.source_used_id, user_chapter_reads.source_used_id)
                 WHERE user_chapter_reads.updated_at <= EXCLUDED.updated_at
                   AND NOT user_chapter_reads.is_read",
        )
        .bind(user_id)
        .bind(series_id)
        .bind(target)
        .bind(read_at)
        .bind(device_id)
        .bind(source_used_id)
        .execute(executor)
        .await?;
        Ok(result.rows_affected())
    }

    /// Single-chapter LWW write (unread toggles and device sync).
    pub async fn upsert_one(
        pool: &PgPool,
        user_id: Uuid,
        chapter_id: Uuid,
        is_read: bool,
        updated_at: DateTime<Utc>,
        device_id: Option<&str>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "INSERT INTO user_chapter_reads
                 (user_id, chapter_id, is_read, updated_at, read_at, device_id)
             VALUES ($1, $2, $3, $4, CASE WHEN $3 THEN $4 ELSE NULL END, $5)
             ON CONFLICT (user_id, chapter_id) DO UPDATE
                 SET is_read = EXCLUDED.is_read,
                     updated_at = EXCLUDED.updated_at,
                     read_at = CASE WHEN EXCLUDED.is_read THEN EXCLUDED.updated_at
                                    ELSE user_chapter_reads.read_at END,
                     device_id = COALESCE(EXCLUDED.device_id, user_chapter_reads.device_id)
                 WHERE user_chapter_reads.updated_at <= EXCLUDED.updated_at",
        )
        .bind(user_id)
        .bind(chapter_id)
        .bind(is_read)
        .bind(updated_at)
        .bind(device_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Authoritative read count, used by the reconciler.
    pub async fn derived_count(pool: &PgPool, user_id: Uuid) -> StoreResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM user_chapter_reads WHERE user_id = $1 AND is_read",
        )
        .bind(user_id)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }
}
