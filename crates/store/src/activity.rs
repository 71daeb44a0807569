//! Append-only activity events and the time-decayed series score.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use mangatrack_core::ActivityEventType;

use crate::series::SeriesStore;
use crate::StoreResult;

#[derive(Debug)]
pub struct NewActivityEvent {
    pub series_id: Uuid,
    pub chapter_id: Option<Uuid>,
    pub user_id: Option<Uuid>,
    pub source_name: Option<String>,
    pub event_type: ActivityEventType,
}

pub struct ActivityStore;

impl ActivityStore {
    /// Append the event and refresh the series' decayed score.
    pub async fn record(pool: &PgPool, event: NewActivityEvent) -> StoreResult<()> {
        sqlx::query(
            "INSERT INTO activity_events
                 (series_id, chapter_id, user_id, source_name, event_type, weight)
             VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(event.series_id)
        .bind(event.chapter_id)
        .bind(event.user_id)
        .bind(&event.source_name)
        .bind(event.event_type.as_str())
        .bind(event.event_type.weight())
        .execute(pool)
        .await?;

        Self::refresh_score(pool, event.series_id).await?;
        Ok(())
    }

    /// Recompute the activity score as a half-life-weighted sum of the last
    /// 90 days of events (half-life 30 days), then store it on the series.
    pub async fn refresh_score(pool: &PgPool, series_id: Uuid) -> StoreResult<f64> {
        let row: (Option<f64>, Option<DateTime<Utc>>) = sqlx::query_as(
            "SELECT
                 SUM(weight * POWER(0.5, EXTRACT(EPOCH FROM (now() - created_at)) / 2592000.0)),
                 MAX(created_at)
             FROM activity_events
             WHERE series_id = $1 AND created_at > now() - interval '90 days'",
        )
        .bind(series_id)
        .fetch_one(pool)
        .await?;

        let score = row.0.unwrap_or(0.0);
        SeriesStore::set_activity_score(pool, series_id, score, row.1).await?;
        Ok(score)
    }

    /// Most recent `chapter_detected` event for a series, for tier checks.
    pub async fn last_chapter_detected_at(
        pool: &PgPool,
        series_id: Uuid,
    ) -> StoreResult<Option<DateTime<Utc>>> {
        let at: Option<DateTime<Utc>> = sqlx::query_scalar(
            "SELECT MAX(created_at) FROM activity_events
             WHERE series_id = $1 AND event_type = 'chapter_detected'",
        )
        .bind(series_id)
        .fetch_one(pool)
        .await?;
        Ok(at)
    }
}
