//! CRUD and scheduling queries for the `series_sources` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mangatrack_core::{SourceName, SourceStatus, SyncPriority};

use crate::error::map_unique_violation;
use crate::{StoreError, StoreResult};

const SOURCE_COLUMNS: &str = "id, series_id, source_name, source_id, source_url, sync_priority, \
     source_status, failure_count, last_checked_at, last_success_at, next_check_at, \
     source_chapter_count, created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SeriesSourceRow {
    pub id: Uuid,
    pub series_id: Uuid,
    pub source_name: String,
    pub source_id: String,
    pub source_url: String,
    pub sync_priority: String,
    pub source_status: String,
    pub failure_count: i32,
    pub last_checked_at: Option<DateTime<Utc>>,
    pub last_success_at: Option<DateTime<Utc>>,
    pub next_check_at: Option<DateTime<Utc>>,
    pub source_chapter_count: i32,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl SeriesSourceRow {
    pub fn name(&self) -> Option<SourceName> {
        self.source_name.parse().ok()
    }

    pub fn priority(&self) -> SyncPriority {
        self.sync_priority.parse().unwrap_or(SyncPriority::Warm)
    }

    pub fn status(&self) -> SourceStatus {
        self.source_status.parse().unwrap_or(SourceStatus::Active)
    }
}

/// A due source joined with the series fields the gatekeeper needs.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct DueSourceRow {
    pub id: Uuid,
    pub series_id: Uuid,
    pub source_name: String,
    pub sync_priority: String,
    pub catalog_tier: String,
    pub total_follows: i64,
}

#[derive(Debug)]
pub struct NewSeriesSource {
    pub series_id: Uuid,
    pub source_name: SourceName,
    pub source_id: String,
    pub source_url: String,
}

/// Stateless store for `series_sources`.
pub struct SeriesSourceStore;

impl SeriesSourceStore {
    /// Attach a source to a series. `(source_name, source_id)` is unique.
    pub async fn attach(pool: &PgPool, new: NewSeriesSource) -> StoreResult<SeriesSourceRow> {
        let result = sqlx::query_as::<_, SeriesSourceRow>(&format!(
            "INSERT INTO series_sources (series_id, source_name, source_id, source_url)
             VALUES ($1, $2, $3, $4)
             RETURNING {}",
            SOURCE_COLUMNS
        ))
        .bind(new.series_id)
        .bind(new.source_name.as_str())
        .bind(&new.source_id)
        .bind(&new.source_url)
        .fetch_one(pool)
        .await;

        result.map_err(|e| map_unique_violation(e, &format!("{}:{}", new.source_name, new.source_id)))
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> StoreResult<Option<SeriesSourceRow>> {
        let row = sqlx::query_as::<_, SeriesSourceRow>(&format!(
            "SELECT {} FROM series_sources WHERE id = $1",
            SOURCE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn list_for_series(pool: &PgPool, series_id: Uuid) -> StoreResult<Vec<SeriesSourceRow>> {
        let rows = sqlx::query_as::<_, SeriesSourceRow>(&format!(
            "SELECT {} FROM series_sources WHERE series_id = $1 ORDER BY created_at ASC",
            SOURCE_COLUMNS
        ))
        .bind(series_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Sources due for a poll: not broken, live series, `next_check_at`
    /// absent or in the past. Ordered so the longest-overdue go first.
    pub async fn find_due(
        pool: &PgPool,
        now: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<DueSourceRow>> {
        let rows = sqlx::query_as::<_, DueSourceRow>(
            "SELECT ss.id, ss.series_id, ss.source_name, ss.sync_priority,
                    s.catalog_tier, s.total_follows
             FROM series_sources ss
             JOIN series s ON s.id = ss.series_id
             WHERE ss.source_status <> 'broken'
               AND s.deleted_at IS NULL
               AND (ss.next_check_at IS NULL OR ss.next_check_at <= $1)
             ORDER BY ss.next_check_at ASC NULLS FIRST
             LIMIT $2",
        )
        .bind(now)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_next_check(
        pool: &PgPool,
        id: Uuid,
        next_check_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE series_sources SET next_check_at = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(next_check_at)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Successful poll: stamp timestamps, clear failures, reactivate.
    pub async fn mark_success(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> StoreResult<()> {
        sqlx::query(
            "UPDATE series_sources
             SET last_checked_at = $2, last_success_at = $2, failure_count = 0,
                 source_status = 'active', updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn record_failure(pool: &PgPool, id: Uuid, at: DateTime<Utc>) -> StoreResult<i32> {
        let count: i32 = sqlx::query_scalar(
            "UPDATE series_sources
             SET failure_count = failure_count + 1, last_checked_at = $2, updated_at = now()
             WHERE id = $1
             RETURNING failure_count",
        )
        .bind(id)
        .bind(at)
        .fetch_one(pool)
        .await?;
        Ok(count)
    }

    pub async fn set_status(pool: &PgPool, id: Uuid, status: SourceStatus) -> StoreResult<()> {
        sqlx::query(
            "UPDATE series_sources SET source_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    /// New chapter landed: count it and pull the source forward.
    pub async fn bump_hot(
        pool: &PgPool,
        id: Uuid,
        next_check_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE series_sources
             SET source_chapter_count = source_chapter_count + 1,
                 sync_priority = 'hot', next_check_at = $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(next_check_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    // ── Priority maintenance ─────────────────────────────────────────

    /// Promote sources of well-followed series to HOT.
    pub async fn promote_popular_to_hot(pool: &PgPool, follows_threshold: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE series_sources ss
             SET sync_priority = 'hot', updated_at = now()
             FROM series s
             WHERE s.id = ss.series_id
               AND s.deleted_at IS NULL
               AND ss.sync_priority <> 'hot'
               AND s.total_follows > $1",
        )
        .bind(follows_threshold)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// HOT → WARM when stale for a day and not widely followed.
    pub async fn demote_stale_hot(pool: &PgPool, follows_threshold: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE series_sources ss
             SET sync_priority = 'warm', updated_at = now()
             FROM series s
             WHERE s.id = ss.series_id
               AND ss.sync_priority = 'hot'
               AND (ss.last_success_at IS NULL OR ss.last_success_at < now() - interval '1 day')
               AND s.total_follows <= $1",
        )
        .bind(follows_threshold)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// WARM → COLD after a week without success.
    pub async fn demote_stale_warm(pool: &PgPool) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE series_sources
             SET sync_priority = 'cold', updated_at = now()
             WHERE sync_priority = 'warm'
               AND (last_success_at IS NULL OR last_success_at < now() - interval '7 days')",
        )
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Sources to include in the latest-updates sweep (one per source name).
    pub async fn active_source_names(pool: &PgPool) -> StoreResult<Vec<String>> {
        let rows: Vec<String> = sqlx::query_scalar(
            "SELECT DISTINCT source_name FROM series_sources WHERE source_status = 'active'",
        )
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Resolve a series source by its public URL (metadata enrichment).
    pub async fn find_by_url(pool: &PgPool, source_url: &str) -> StoreResult<Option<SeriesSourceRow>> {
        let row = sqlx::query_as::<_, SeriesSourceRow>(&format!(
            "SELECT {} FROM series_sources WHERE source_url = $1 LIMIT 1",
            SOURCE_COLUMNS
        ))
        .bind(source_url)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Resolve a series source by its origin coordinates.
    pub async fn find_by_origin(
        pool: &PgPool,
        source_name: SourceName,
        source_id: &str,
    ) -> StoreResult<Option<SeriesSourceRow>> {
        let row = sqlx::query_as::<_, SeriesSourceRow>(&format!(
            "SELECT {} FROM series_sources WHERE source_name = $1 AND source_id = $2",
            SOURCE_COLUMNS
        ))
        .bind(source_name.as_str())
        .bind(source_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }
}
