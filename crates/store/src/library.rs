//! Library entries: a user's tracked series.
//!
//! `(user_id, source_url)` is the functional key. Removal is a soft delete;
//! re-adding the same source URL restores the soft-deleted row. Progress
//! updates are conditional SQL so `last_read_chapter` only moves forward.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mangatrack_core::{LibraryStatus, MetadataStatus};

use crate::error::map_unique_violation;
use crate::{StoreError, StoreResult};

const LIBRARY_COLUMNS: &str = "id, user_id, series_id, source_url, source_name, title, status, \
     last_read_chapter, last_read_at, user_rating, preferred_source, metadata_status, \
     series_completion_xp_granted, created_at, updated_at, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct LibraryEntryRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub series_id: Option<Uuid>,
    pub source_url: String,
    pub source_name: Option<String>,
    pub title: Option<String>,
    pub status: String,
    pub last_read_chapter: f64,
    pub last_read_at: Option<DateTime<Utc>>,
    pub user_rating: Option<i32>,
    pub preferred_source: Option<String>,
    pub metadata_status: String,
    pub series_completion_xp_granted: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl LibraryEntryRow {
    pub fn library_status(&self) -> LibraryStatus {
        self.status.parse().unwrap_or(LibraryStatus::Reading)
    }
}

#[derive(Debug)]
pub struct NewLibraryEntry {
    pub user_id: Uuid,
    pub series_id: Option<Uuid>,
    pub source_url: String,
    pub source_name: Option<String>,
    pub title: Option<String>,
    pub status: LibraryStatus,
}

/// Fields a PATCH may change.
#[derive(Debug, Default)]
pub struct LibraryPatch {
    pub status: Option<LibraryStatus>,
    pub user_rating: Option<i32>,
    pub preferred_source: Option<String>,
}

#[derive(Debug, Clone, Copy)]
pub enum LibrarySort {
    Updated,
    LatestChapter,
    Title,
    Rating,
    Added,
}

impl std::str::FromStr for LibrarySort {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "updated" => Ok(LibrarySort::Updated),
            "latest_chapter" => Ok(LibrarySort::LatestChapter),
            "title" => Ok(LibrarySort::Title),
            "rating" => Ok(LibrarySort::Rating),
            "added" => Ok(LibrarySort::Added),
            other => Err(format!("unknown sort '{}'", other)),
        }
    }
}

impl LibrarySort {
    fn order_clause(&self) -> &'static str {
        match self {
            LibrarySort::Updated => "le.updated_at DESC",
            LibrarySort::LatestChapter => "s.last_chapter_at DESC NULLS LAST",
            LibrarySort::Title => "COALESCE(le.title, s.title) ASC",
            LibrarySort::Rating => "le.user_rating DESC NULLS LAST",
            LibrarySort::Added => "le.created_at DESC",
        }
    }
}

#[derive(Debug, Default, serde::Serialize)]
pub struct LibraryStats {
    pub total: i64,
    pub reading: i64,
    pub completed: i64,
    pub planning: i64,
    pub dropped: i64,
    pub paused: i64,
}

pub struct LibraryStore;

impl LibraryStore {
    /// Add an entry, restoring any soft-deleted row for the same
    /// `(user, source_url)`. Returns the row and whether a live entry
    /// already existed (conflict for the API).
    pub async fn add(pool: &PgPool, new: NewLibraryEntry) -> StoreResult<LibraryEntryRow> {
        if let Some(existing) = sqlx::query_as::<_, LibraryEntryRow>(&format!(
            "SELECT {} FROM library_entries WHERE user_id = $1 AND source_url = $2",
            LIBRARY_COLUMNS
        ))
        .bind(new.user_id)
        .bind(&new.source_url)
        .fetch_optional(pool)
        .await?
        {
            if existing.deleted_at.is_none() {
                return Err(StoreError::Duplicate(new.source_url));
            }
            // Restore the soft-deleted entry.
            let row = sqlx::query_as::<_, LibraryEntryRow>(&format!(
                "UPDATE library_entries
                 SET deleted_at = NULL, status = $2, updated_at = now()
                 WHERE id = $1
                 RETURNING {}",
                LIBRARY_COLUMNS
            ))
            .bind(existing.id)
            .bind(new.status.as_str())
            .fetch_one(pool)
            .await?;
            return Ok(row);
        }

        let result = sqlx::query_as::<_, LibraryEntryRow>(&format!(
            "INSERT INTO library_entries (user_id, series_id, source_url, source_name, title, status)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING {}",
            LIBRARY_COLUMNS
        ))
        .bind(new.user_id)
        .bind(new.series_id)
        .bind(&new.source_url)
        .bind(&new.source_name)
        .bind(&new.title)
        .bind(new.status.as_str())
        .fetch_one(pool)
        .await;

        result.map_err(|e| map_unique_violation(e, &new.source_url))
    }

    /// Get an entry scoped to its owner. Other users' entries read as
    /// missing, not forbidden.
    pub async fn get_for_user(
        pool: &PgPool,
        user_id: Uuid,
        entry_id: Uuid,
    ) -> StoreResult<Option<LibraryEntryRow>> {
        let row = sqlx::query_as::<_, LibraryEntryRow>(&format!(
            "SELECT {} FROM library_entries
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL",
            LIBRARY_COLUMNS
        ))
        .bind(entry_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn list(
        pool: &PgPool,
        user_id: Uuid,
        q: Option<&str>,
        status: Option<LibraryStatus>,
        sort: LibrarySort,
        limit: i64,
        offset: i64,
    ) -> StoreResult<Vec<LibraryEntryRow>> {
        let sql = format!(
            "SELECT {} FROM library_entries le
             LEFT JOIN series s ON s.id = le.series_id
             WHERE le.user_id = $1 AND le.deleted_at IS NULL
               AND ($2::text IS NULL OR COALESCE(le.title, s.title, '') ILIKE $2)
               AND ($3::text IS NULL OR le.status = $3)
             ORDER BY {}
             LIMIT $4 OFFSET $5",
            LIBRARY_COLUMNS_QUALIFIED,
            sort.order_clause()
        );
        let pattern = q.map(|q| format!("%{}%", q));
        let rows = sqlx::query_as::<_, LibraryEntryRow>(&sql)
            .bind(user_id)
            .bind(pattern)
            .bind(status.map(|s| s.as_str()))
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }

    pub async fn stats(pool: &PgPool, user_id: Uuid) -> StoreResult<LibraryStats> {
        let rows: Vec<(String, i64)> = sqlx::query_as(
            "SELECT status, COUNT(*) FROM library_entries
             WHERE user_id = $1 AND deleted_at IS NULL
             GROUP BY status",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;

        let mut stats = LibraryStats::default();
        for (status, count) in rows {
            stats.total += count;
            match status.as_str() {
                "reading" => stats.reading = count,
                "completed" => stats.completed = count,
                "planning" => stats.planning = count,
                "dropped" => stats.dropped = count,
                "paused" => stats.paused = count,
                _ => {}
            }
        }
        Ok(stats)
    }

    pub async fn patch(
        pool: &PgPool,
        user_id: Uuid,
        entry_id: Uuid,
        patch: LibraryPatch,
    ) -> StoreResult<LibraryEntryRow> {
        let row = sqlx::query_as::<_, LibraryEntryRow>(&format!(
            "UPDATE library_entries
             SET status = COALESCE($3, status),
                 user_rating = COALESCE($4, user_rating),
                 preferred_source = COALESCE($5, preferred_source),
                 updated_at = now()
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL
             RETURNING {}",
            LIBRARY_COLUMNS
        ))
        .bind(entry_id)
        .bind(user_id)
        .bind(patch.status.map(|s| s.as_str()))
        .bind(patch.user_rating)
        .bind(&patch.preferred_source)
        .fetch_optional(pool)
        .await?;
        row.ok_or(StoreError::NotFound(entry_id))
    }

    pub async fn soft_delete(pool: &PgPool, user_id: Uuid, entry_id: Uuid) -> StoreResult<LibraryEntryRow> {
        let row = sqlx::query_as::<_, LibraryEntryRow>(&format!(
            "UPDATE library_entries
             SET deleted_at = now(), updated_at = now()
             WHERE id = $1 AND user_id = $2 AND deleted_at IS NULL
             RETURNING {}",
            LIBRARY_COLUMNS
        ))
        .bind(entry_id)
        .bind(user_id)
        .fetch_optional(pool)
        .await?;
        row.ok_or(StoreError::NotFound(entry_id))
    }

    /// Monotonic progress write: only moves `last_read_chapter` forward.
    /// Returns true when the row advanced.
    pub async fn advance_progress(
        executor: impl sqlx::PgExecutor<'_>,
        entry_id: Uuid,
        target: f64,
        read_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE library_entries
             SET last_read_chapter = $2, last_read_at = $3, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL AND last_read_chapter < $2",
        )
        .bind(entry_id)
        .bind(target)
        .bind(read_at)
        .execute(executor)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// One-way completion XP flag. Returns true on the single transition.
    pub async fn grant_completion_xp_once(pool: &PgPool, entry_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE library_entries
             SET series_completion_xp_granted = TRUE, updated_at = now()
             WHERE id = $1 AND NOT series_completion_xp_granted",
        )
        .bind(entry_id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn set_metadata_status(
        pool: &PgPool,
        entry_id: Uuid,
        status: MetadataStatus,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE library_entries SET metadata_status = $2, updated_at = now() WHERE id = $1",
        )
        .bind(entry_id)
        .bind(status.as_str())
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn link_series(pool: &PgPool, entry_id: Uuid, series_id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE library_entries SET series_id = $2, updated_at = now() WHERE id = $1",
        )
        .bind(entry_id)
        .bind(series_id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Users following a series (live entries only), for feed fan-out.
    pub async fn followers_of_series(pool: &PgPool, series_id: Uuid) -> StoreResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT DISTINCT user_id FROM library_entries
             WHERE series_id = $1 AND deleted_at IS NULL",
        )
        .bind(series_id)
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }

    /// Source URLs already in a user's live library, for import dedup.
    pub async fn existing_source_urls(pool: &PgPool, user_id: Uuid) -> StoreResult<Vec<String>> {
        let urls: Vec<String> = sqlx::query_scalar(
            "SELECT source_url FROM library_entries WHERE user_id = $1 AND deleted_at IS NULL",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await?;
        Ok(urls)
    }

    /// Hard-delete soft-deleted entries older than `days`. Cleanup path:
    /// deliberately bypasses the soft-delete filter.
    pub async fn hard_delete_trashed(pool: &PgPool, days: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM library_entries
             WHERE deleted_at IS NOT NULL AND deleted_at < now() - ($1 || ' days')::interval",
        )
        .bind(days.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}

const LIBRARY_COLUMNS_QUALIFIED: &str = "le.id, le.user_id, le.series_id, le.source_url, \
     le.source_name, le.title, le.status, le.last_read_chapter, le.last_read_at, \
     le.user_rating, le.preferred_source, le.metadata_status, \
     le.series_completion_xp_granted, le.created_at, le.updated_at, le.deleted_at";

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_sort_parse() {
        assert!(matches!(LibrarySort::from_str("updated"), Ok(LibrarySort::Updated)));
        assert!(matches!(LibrarySort::from_str("latest_chapter"), Ok(LibrarySort::LatestChapter)));
        assert!(LibrarySort::from_str("random").is_err());
    }

    #[test]
    fn test_sort_clauses_are_distinct() {
        let clauses = [
            LibrarySort::Updated.order_clause(),
            LibrarySort::LatestChapter.order_clause(),
            LibrarySort::Title.order_clause(),
            LibrarySort::Rating.order_clause(),
            LibrarySort::Added.order_clause(),
        ];
        let unique: std::collections::HashSet<_> = clauses.iter().collect();
        assert_eq!(unique.len(), clauses.len());
    }
}
