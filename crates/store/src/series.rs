//! CRUD and maintenance queries for the `series` table.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mangatrack_core::CatalogTier;

use crate::error::map_unique_violation;
use crate::{StoreError, StoreResult};

const SERIES_COLUMNS: &str = "id, title, canonical_external_id, catalog_tier, tier_reason, \
     activity_score, last_activity_at, last_chapter_at, total_follows, content_rating, \
     seeded, created_at, updated_at, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct SeriesRow {
    pub id: Uuid,
    pub title: String,
    pub canonical_external_id: Option<String>,
    pub catalog_tier: String,
    pub tier_reason: Option<String>,
    pub activity_score: f64,
    pub last_activity_at: Option<DateTime<Utc>>,
    pub last_chapter_at: Option<DateTime<Utc>>,
    pub total_follows: i64,
    pub content_rating: Option<String>,
    pub seeded: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

impl SeriesRow {
    pub fn tier(&self) -> CatalogTier {
        self.catalog_tier.parse().unwrap_or(CatalogTier::C)
    }
}

/// Inputs for a tier evaluation pass.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TierInputRow {
    pub id: Uuid,
    pub catalog_tier: String,
    pub activity_score: f64,
    pub total_follows: i64,
    pub last_chapter_at: Option<DateTime<Utc>>,
    pub seeded: bool,
}

#[derive(Debug)]
pub struct NewSeries {
    pub title: String,
    pub canonical_external_id: Option<String>,
    pub content_rating: Option<String>,
}

/// Stateless store for `series`.
pub struct SeriesStore;

impl SeriesStore {
    pub async fn create(pool: &PgPool, new: NewSeries) -> StoreResult<SeriesRow> {
        let result = sqlx::query_as::<_, SeriesRow>(&format!(
            "INSERT INTO series (title, canonical_external_id, content_rating)
             VALUES ($1, $2, $3)
             RETURNING {}",
            SERIES_COLUMNS
        ))
        .bind(&new.title)
        .bind(&new.canonical_external_id)
        .bind(&new.content_rating)
        .fetch_one(pool)
        .await;

        result.map_err(|e| map_unique_violation(e, &new.title))
    }

    pub async fn get(pool: &PgPool, id: Uuid) -> StoreResult<Option<SeriesRow>> {
        let row = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {} FROM series WHERE id = $1 AND deleted_at IS NULL",
            SERIES_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Monotonic bump of `last_chapter_at` — only moves forward.
    pub async fn bump_last_chapter_at(
        pool: &PgPool,
        id: Uuid,
        at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE series SET last_chapter_at = $2, updated_at = now()
             WHERE id = $1 AND (last_chapter_at IS NULL OR last_chapter_at < $2)",
        )
        .bind(id)
        .bind(at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn increment_follows(pool: &PgPool, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE series SET total_follows = total_follows + 1, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Floored decrement: `total_follows` never drops below zero.
    pub async fn decrement_follows(pool: &PgPool, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE series SET total_follows = GREATEST(total_follows - 1, 0), updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn search_by_title(
        pool: &PgPool,
        q: &str,
        limit: i64,
    ) -> StoreResult<Vec<SeriesRow>> {
        let pattern = format!("%{}%", q);
        let rows = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {} FROM series
             WHERE deleted_at IS NULL AND title ILIKE $1
             ORDER BY total_follows DESC, title ASC
             LIMIT $2",
            SERIES_COLUMNS
        ))
        .bind(pattern)
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Discovery surface: highest activity first.
    pub async fn discover(pool: &PgPool, limit: i64, offset: i64) -> StoreResult<Vec<SeriesRow>> {
        let rows = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {} FROM series
             WHERE deleted_at IS NULL
             ORDER BY activity_score DESC, total_follows DESC
             LIMIT $1 OFFSET $2",
            SERIES_COLUMNS
        ))
        .bind(limit)
        .bind(offset)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    /// Trending surface: most recent chapter activity first.
    pub async fn trending(pool: &PgPool, limit: i64) -> StoreResult<Vec<SeriesRow>> {
        let rows = sqlx::query_as::<_, SeriesRow>(&format!(
            "SELECT {} FROM series
             WHERE deleted_at IS NULL AND last_chapter_at IS NOT NULL
             ORDER BY last_chapter_at DESC, activity_score DESC
             LIMIT $1",
            SERIES_COLUMNS
        ))
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }

    pub async fn set_tier(
        pool: &PgPool,
        id: Uuid,
        tier: CatalogTier,
        reason: &str,
    ) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE series SET catalog_tier = $2, tier_reason = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(tier.as_str())
        .bind(reason)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    pub async fn set_activity_score(
        pool: &PgPool,
        id: Uuid,
        score: f64,
        last_activity_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE series SET activity_score = $2,
                    last_activity_at = COALESCE($3, last_activity_at),
                    updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(score)
        .bind(last_activity_at)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Weekly decay for idle series: −`penalty` per pass, floored at zero.
    pub async fn decay_idle_scores(pool: &PgPool, penalty: f64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE series SET activity_score = GREATEST(activity_score - $1, 0), updated_at = now()
             WHERE deleted_at IS NULL
               AND activity_score > 0
               AND (last_activity_at IS NULL OR last_activity_at < now() - interval '7 days')",
        )
        .bind(penalty)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Batch of tier-evaluation inputs, least-recently updated first.
    pub async fn tier_refresh_batch(pool: &PgPool, limit: i64) -> StoreResult<Vec<TierInputRow>> {
        let rows = sqlx::query_as::<_, TierInputRow>(
            "SELECT id, catalog_tier, activity_score, total_follows, last_chapter_at, seeded
             FROM series
             WHERE deleted_at IS NULL
             ORDER BY updated_at ASC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(pool)
        .await?;
        Ok(rows)
    }
}
