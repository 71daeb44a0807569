//! User-visible notifications written by the delivery worker.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::StoreResult;

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct NotificationRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub series_id: Option<Uuid>,
    pub chapter_id: Option<Uuid>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub scheduled_for: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug)]
pub struct NewNotification {
    pub user_id: Uuid,
    pub series_id: Option<Uuid>,
    pub chapter_id: Option<Uuid>,
    pub kind: String,
    pub payload: serde_json::Value,
    pub scheduled_for: Option<DateTime<Utc>>,
}

pub struct NotificationStore;

impl NotificationStore {
    pub async fn create(pool: &PgPool, new: NewNotification) -> StoreResult<Uuid> {
        let id: Uuid = sqlx::query_scalar(
            "INSERT INTO notifications (user_id, series_id, chapter_id, kind, payload, scheduled_for)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id",
        )
        .bind(new.user_id)
        .bind(new.series_id)
        .bind(new.chapter_id)
        .bind(&new.kind)
        .bind(&new.payload)
        .bind(new.scheduled_for)
        .fetch_one(pool)
        .await?;
        Ok(id)
    }

    pub async fn mark_sent(pool: &PgPool, id: Uuid) -> StoreResult<()> {
        sqlx::query("UPDATE notifications SET sent_at = now() WHERE id = $1")
            .bind(id)
            .execute(pool)
            .await?;
        Ok(())
    }

    pub async fn prune_older_than(pool: &PgPool, days: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "DELETE FROM notifications WHERE created_at < now() - ($1 || ' days')::interval",
        )
        .bind(days.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
