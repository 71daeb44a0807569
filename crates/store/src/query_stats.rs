//! Per-normalized-query search statistics for the storm controller.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::StoreResult;

#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QueryStatsRow {
    pub normalized_query: String,
    pub total_searches: i64,
    pub last_enqueued_at: Option<DateTime<Utc>>,
    pub last_deferred_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

pub struct QueryStatsStore;

impl QueryStatsStore {
    /// Count a search and return the updated stats row.
    pub async fn record_search(pool: &PgPool, normalized: &str) -> StoreResult<QueryStatsRow> {
        let row = sqlx::query_as::<_, QueryStatsRow>(
            "INSERT INTO query_stats (normalized_query, total_searches)
             VALUES ($1, 1)
             ON CONFLICT (normalized_query) DO UPDATE
                 SET total_searches = query_stats.total_searches + 1,
                     updated_at = now()
             RETURNING normalized_query, total_searches, last_enqueued_at,
                       last_deferred_at, updated_at",
        )
        .bind(normalized)
        .fetch_one(pool)
        .await?;
        Ok(row)
    }

    pub async fn get(pool: &PgPool, normalized: &str) -> StoreResult<Option<QueryStatsRow>> {
        let row = sqlx::query_as::<_, QueryStatsRow>(
            "SELECT normalized_query, total_searches, last_enqueued_at, last_deferred_at, updated_at
             FROM query_stats
             WHERE normalized_query = $1",
        )
        .bind(normalized)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn mark_enqueued(pool: &PgPool, normalized: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE query_stats SET last_enqueued_at = now(), updated_at = now()
             WHERE normalized_query = $1",
        )
        .bind(normalized)
        .execute(pool)
        .await?;
        Ok(())
    }

    pub async fn mark_deferred(pool: &PgPool, normalized: &str) -> StoreResult<()> {
        sqlx::query(
            "UPDATE query_stats SET last_deferred_at = now(), updated_at = now()
             WHERE normalized_query = $1",
        )
        .bind(normalized)
        .execute(pool)
        .await?;
        Ok(())
    }
}
