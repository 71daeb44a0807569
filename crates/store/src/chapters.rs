//! Logical chapters and per-source availability records.
//!
//! A logical chapter is identified by `(series_id, chapter_number)`; every
//! source's view of it attaches as a `chapter_sources` row. Callers run
//! these upserts under the per-(series, chapter) ingest lock, so the
//! select-then-insert paths are race-free within a key; the ON CONFLICT
//! clauses absorb cross-key replays.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::StoreResult;

const CHAPTER_COLUMNS: &str = "id, series_id, chapter_number, number_value, chapter_slug, \
     chapter_title, published_at, first_detected_at, created_at, updated_at, deleted_at";

const CHAPTER_SOURCE_COLUMNS: &str = "id, chapter_id, series_source_id, source_name, \
     source_chapter_url, source_chapter_id, source_published_at, detected_at, is_available, \
     created_at, updated_at";

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ChapterRow {
    pub id: Uuid,
    pub series_id: Uuid,
    pub chapter_number: String,
    pub number_value: Option<f64>,
    pub chapter_slug: String,
    pub chapter_title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub first_detected_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct ChapterSourceRow {
    pub id: Uuid,
    pub chapter_id: Uuid,
    pub series_source_id: Uuid,
    pub source_name: String,
    pub source_chapter_url: String,
    pub source_chapter_id: Option<String>,
    pub source_published_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub is_available: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewChapter {
    pub series_id: Uuid,
    pub chapter_number: String,
    pub number_value: Option<f64>,
    pub chapter_slug: String,
    pub chapter_title: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
    pub first_detected_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewChapterSource {
    pub chapter_id: Uuid,
    pub series_source_id: Uuid,
    pub source_name: String,
    pub source_chapter_url: String,
    pub source_chapter_id: Option<String>,
    pub source_published_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
}

/// Result of an upsert: the row plus whether it was created by this call.
#[derive(Debug)]
pub struct Upserted<T> {
    pub row: T,
    pub created: bool,
}

pub struct ChapterStore;

impl ChapterStore {
    /// Upsert the logical chapter. An existing row keeps its identity and
    /// `first_detected_at`; title and publish date fill in when previously
    /// missing.
    pub async fn upsert(pool: &PgPool, new: NewChapter) -> StoreResult<Upserted<ChapterRow>> {
        if let Some(existing) =
            Self::find_by_identity(pool, new.series_id, &new.chapter_number).await?
        {
            let row = sqlx::query_as::<_, ChapterRow>(&format!(
                "UPDATE chapters
                 SET chapter_title = COALESCE(chapter_title, $2),
                     published_at = COALESCE(published_at, $3),
                     updated_at = now()
                 WHERE id = $1
                 RETURNING {}",
                CHAPTER_COLUMNS
            ))
            .bind(existing.id)
            .bind(&new.chapter_title)
            .bind(new.published_at)
            .fetch_one(pool)
            .await?;
            return Ok(Upserted { row, created: false });
        }

        let inserted = sqlx::query_as::<_, ChapterRow>(&format!(
            "INSERT INTO chapters
                 (series_id, chapter_number, number_value, chapter_slug, chapter_title,
                  published_at, first_detected_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (series_id, chapter_number) DO NOTHING
             RETURNING {}",
            CHAPTER_COLUMNS
        ))
        .bind(new.series_id)
        .bind(&new.chapter_number)
        .bind(new.number_value)
        .bind(&new.chapter_slug)
        .bind(&new.chapter_title)
        .bind(new.published_at)
        .bind(new.first_detected_at)
        .fetch_optional(pool)
        .await?;

        match inserted {
            Some(row) => Ok(Upserted { row, created: true }),
            None => {
                // Lost a cross-key race; the row exists now.
                let row = Self::find_by_identity(pool, new.series_id, &new.chapter_number)
                    .await?
                    .ok_or(sqlx::Error::RowNotFound)?;
                Ok(Upserted { row, created: false })
            }
        }
    }

    pub async fn find_by_identity(
        pool: &PgPool,
        series_id: Uuid,
        chapter_number: &str,
    ) -> StoreResult<Option<ChapterRow>> {
        let row = sqlx::query_as::<_, ChapterRow>(&format!(
            "SELECT {} FROM chapters
             WHERE series_id = $1 AND chapter_number = $2 AND deleted_at IS NULL",
            CHAPTER_COLUMNS
        ))
        .bind(series_id)
        .bind(chapter_number)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn find_by_slug(
        pool: &PgPool,
        series_id: Uuid,
        slug: &str,
    ) -> StoreResult<Option<ChapterRow>> {
        let row = sqlx::query_as::<_, ChapterRow>(&format!(
            "SELECT {} FROM chapters
             WHERE series_id = $1 AND chapter_slug = $2 AND deleted_at IS NULL
             ORDER BY first_detected_at ASC
             LIMIT 1",
            CHAPTER_COLUMNS
        ))
        .bind(series_id)
        .bind(slug)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Whether the series has a chapter with this exact numeric value.
    pub async fn exists_number(
        pool: &PgPool,
        series_id: Uuid,
        number_value: f64,
    ) -> StoreResult<bool> {
        let found: Option<i64> = sqlx::query_scalar(
            "SELECT 1 FROM chapters
             WHERE series_id = $1 AND number_value = $2 AND deleted_at IS NULL
             LIMIT 1",
        )
        .bind(series_id)
        .bind(number_value)
        .fetch_optional(pool)
        .await?;
        Ok(found.is_some())
    }

    /// `first_detected_at` of the next chapter above `number_value`, for
    /// gap-recovery ordering.
    pub async fn next_detected_after(
        pool: &PgPool,
        series_id: Uuid,
        number_value: f64,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let detected: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT first_detected_at FROM chapters
             WHERE series_id = $1 AND number_value > $2 AND deleted_at IS NULL
             ORDER BY number_value ASC
             LIMIT 1",
        )
        .bind(series_id)
        .bind(number_value)
        .fetch_optional(pool)
        .await?;
        Ok(detected)
    }

    /// Chapters of a series, numbered first in reading order, then
    /// unnumbered by detection time.
    pub async fn list_for_series(pool: &PgPool, series_id: Uuid) -> StoreResult<Vec<ChapterRow>> {
        let rows = sqlx::query_as::<_, ChapterRow>(&format!(
            "SELECT {} FROM chapters
             WHERE series_id = $1 AND deleted_at IS NULL
             ORDER BY number_value ASC NULLS LAST, first_detected_at ASC",
            CHAPTER_COLUMNS
        ))
        .bind(series_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Chapter ids for the bulk-mark range `1 ≤ number_value ≤ target`.
    pub async fn ids_in_read_range(
        pool: &PgPool,
        series_id: Uuid,
        target: f64,
    ) -> StoreResult<Vec<Uuid>> {
        let ids: Vec<Uuid> = sqlx::query_scalar(
            "SELECT id FROM chapters
             WHERE series_id = $1 AND deleted_at IS NULL
               AND number_value IS NOT NULL
               AND number_value >= 1 AND number_value <= $2",
        )
        .bind(series_id)
        .bind(target)
        .fetch_all(pool)
        .await?;
        Ok(ids)
    }
}

pub struct ChapterSourceStore;

impl ChapterSourceStore {
    /// Upsert an availability record. Re-ingestion refreshes the source
    /// metadata but never rewrites `detected_at`.
    pub async fn upsert(
        pool: &PgPool,
        new: NewChapterSource,
    ) -> StoreResult<Upserted<ChapterSourceRow>> {
        let inserted = sqlx::query_as::<_, ChapterSourceRow>(&format!(
            "INSERT INTO chapter_sources
                 (chapter_id, series_source_id, source_name, source_chapter_url,
                  source_chapter_id, source_published_at, detected_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7)
             ON CONFLICT (series_source_id, chapter_id) DO NOTHING
             RETURNING {}",
            CHAPTER_SOURCE_COLUMNS
        ))
        .bind(new.chapter_id)
        .bind(new.series_source_id)
        .bind(&new.source_name)
        .bind(&new.source_chapter_url)
        .bind(&new.source_chapter_id)
        .bind(new.source_published_at)
        .bind(new.detected_at)
        .fetch_optional(pool)
        .await?;

        if let Some(row) = inserted {
            return Ok(Upserted { row, created: true });
        }

        let row = sqlx::query_as::<_, ChapterSourceRow>(&format!(
            "UPDATE chapter_sources
             SET source_chapter_url = $3,
                 source_chapter_id = COALESCE($4, source_chapter_id),
                 source_published_at = COALESCE($5, source_published_at),
                 is_available = TRUE,
                 updated_at = now()
             WHERE series_source_id = $1 AND chapter_id = $2
             RETURNING {}",
            CHAPTER_SOURCE_COLUMNS
        ))
        .bind(new.series_source_id)
        .bind(new.chapter_id)
        .bind(&new.source_chapter_url)
        .bind(&new.source_chapter_id)
        .bind(new.source_published_at)
        .fetch_one(pool)
        .await?;
        Ok(Upserted { row, created: false })
    }

    /// All availability records for a series, for the chapter listing API.
    pub async fn list_for_series(
        pool: &PgPool,
        series_id: Uuid,
    ) -> StoreResult<Vec<ChapterSourceRow>> {
        let rows = sqlx::query_as::<_, ChapterSourceRow>(&format!(
            "SELECT {} FROM chapter_sources cs
             JOIN chapters c ON c.id = cs.chapter_id
             WHERE c.series_id = $1 AND c.deleted_at IS NULL
             ORDER BY cs.detected_at ASC",
            CHAPTER_SOURCE_COLUMNS_QUALIFIED
        ))
        .bind(series_id)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}

const CHAPTER_SOURCE_COLUMNS_QUALIFIED: &str = "cs.id, cs.chapter_id, cs.series_source_id, \
     cs.source_name, cs.source_chapter_url, cs.source_chapter_id, cs.source_published_at, \
     cs.detected_at, cs.is_available, cs.created_at, cs.updated_at";
