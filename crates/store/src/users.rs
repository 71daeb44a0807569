//! Users: identity plus gamification counters.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::error::map_unique_violation;
use crate::{StoreError, StoreResult};

const USER_COLUMNS: &str = "id, username, email, xp, level, streak_days, longest_streak, \
     last_read_at, chapters_read, trust_score, season_xp, current_season, last_violation_at, \
     is_premium, feed_last_seen_at, created_at, updated_at, deleted_at";

#[derive(Debug, Clone, sqlx::FromRow, serde::Serialize)]
pub struct UserRow {
    pub id: Uuid,
    pub username: String,
    pub email: Option<String>,
    pub xp: i64,
    pub level: i32,
    pub streak_days: i32,
    pub longest_streak: i32,
    pub last_read_at: Option<DateTime<Utc>>,
    pub chapters_read: i64,
    pub trust_score: f64,
    pub season_xp: i64,
    pub current_season: Option<String>,
    pub last_violation_at: Option<DateTime<Utc>>,
    pub is_premium: bool,
    pub feed_last_seen_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
}

/// Gamification fields written together on an XP award.
#[derive(Debug)]
pub struct XpAward {
    pub xp_delta: i64,
    pub level: i32,
    pub streak_days: i32,
    pub longest_streak: i32,
    pub season_xp: i64,
    pub current_season: String,
    pub chapters_read_delta: i64,
    pub last_read_at: DateTime<Utc>,
}

pub struct UserStore;

impl UserStore {
    pub async fn get(pool: &PgPool, id: Uuid) -> StoreResult<Option<UserRow>> {
        let row = sqlx::query_as::<_, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1 AND deleted_at IS NULL",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    pub async fn create(pool: &PgPool, username: &str, email: Option<&str>) -> StoreResult<UserRow> {
        let result = sqlx::query_as::<_, UserRow>(&format!(
            "INSERT INTO users (username, email) VALUES ($1, $2) RETURNING {}",
            USER_COLUMNS
        ))
        .bind(username)
        .bind(email)
        .fetch_one(pool)
        .await;
        result.map_err(|e| map_unique_violation(e, username))
    }

    pub async fn update_profile(
        pool: &PgPool,
        id: Uuid,
        username: Option<&str>,
        email: Option<&str>,
    ) -> StoreResult<UserRow> {
        let result = sqlx::query_as::<_, UserRow>(&format!(
            "UPDATE users
             SET username = COALESCE($2, username),
                 email = COALESCE($3, email),
                 updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
             RETURNING {}",
            USER_COLUMNS
        ))
        .bind(id)
        .bind(username)
        .bind(email)
        .fetch_optional(pool)
        .await;

        match result {
            Ok(Some(row)) => Ok(row),
            Ok(None) => Err(StoreError::NotFound(id)),
            Err(e) => Err(map_unique_violation(e, username.unwrap_or(""))),
        }
    }

    pub async fn soft_delete(pool: &PgPool, id: Uuid) -> StoreResult<()> {
        let result = sqlx::query(
            "UPDATE users SET deleted_at = now(), updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL",
        )
        .bind(id)
        .execute(pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(id));
        }
        Ok(())
    }

    /// Apply an XP award and its gamification side effects in one write.
    pub async fn apply_award(
        executor: impl sqlx::PgExecutor<'_>,
        id: Uuid,
        award: &XpAward,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users
             SET xp = xp + $2,
                 level = $3,
                 streak_days = $4,
                 longest_streak = $5,
                 season_xp = $6,
                 current_season = $7,
                 chapters_read = chapters_read + $8,
                 last_read_at = $9,
                 updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(award.xp_delta)
        .bind(award.level)
        .bind(award.streak_days)
        .bind(award.longest_streak)
        .bind(award.season_xp)
        .bind(&award.current_season)
        .bind(award.chapters_read_delta)
        .bind(award.last_read_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    /// Progress without an award still counts chapters and stamps read time.
    pub async fn record_reads(
        executor: impl sqlx::PgExecutor<'_>,
        id: Uuid,
        chapters_read_delta: i64,
        last_read_at: DateTime<Utc>,
    ) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users
             SET chapters_read = chapters_read + $2, last_read_at = $3, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(chapters_read_delta)
        .bind(last_read_at)
        .execute(executor)
        .await?;
        Ok(())
    }

    pub async fn add_xp(pool: &PgPool, id: Uuid, delta: i64) -> StoreResult<()> {
        sqlx::query(
            "UPDATE users SET xp = xp + $2, season_xp = season_xp + $2, updated_at = now()
             WHERE id = $1",
        )
        .bind(id)
        .bind(delta)
        .execute(pool)
        .await?;
        Ok(())
    }

    /// Clamp-adjust trust score and stamp the violation time.
    pub async fn apply_trust_penalty(pool: &PgPool, id: Uuid, penalty: f64) -> StoreResult<f64> {
        let score: f64 = sqlx::query_scalar(
            "UPDATE users
             SET trust_score = GREATEST(trust_score - $2, 0),
                 last_violation_at = now(),
                 updated_at = now()
             WHERE id = $1
             RETURNING trust_score",
        )
        .bind(id)
        .bind(penalty)
        .fetch_one(pool)
        .await?;
        Ok(score)
    }

    /// Daily trust restoration for users with no violation in `quiet_days`.
    pub async fn restore_trust(pool: &PgPool, amount: f64, quiet_days: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE users
             SET trust_score = LEAST(trust_score + $1, 1.0), updated_at = now()
             WHERE deleted_at IS NULL
               AND trust_score < 1.0
               AND (last_violation_at IS NULL
                    OR last_violation_at < now() - ($2 || ' days')::interval)",
        )
        .bind(amount)
        .bind(quiet_days.to_string())
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }

    /// Watermark: strict-greater update only.
    pub async fn advance_feed_seen(
        pool: &PgPool,
        id: Uuid,
        seen_at: DateTime<Utc>,
    ) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE users
             SET feed_last_seen_at = $2, updated_at = now()
             WHERE id = $1 AND deleted_at IS NULL
               AND (feed_last_seen_at IS NULL OR feed_last_seen_at < $2)",
        )
        .bind(id)
        .bind(seen_at)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Rewrite `chapters_read` from the derived count (the authoritative
    /// number). Returns users whose counter drifted.
    pub async fn reconcile_chapters_read(pool: &PgPool, batch: i64) -> StoreResult<u64> {
        let result = sqlx::query(
            "UPDATE users u
             SET chapters_read = d.derived, updated_at = now()
             FROM (
                 SELECT u2.id, COALESCE(r.cnt, 0) AS derived
                 FROM users u2
                 LEFT JOIN (
                     SELECT user_id, COUNT(*) AS cnt
                     FROM user_chapter_reads WHERE is_read GROUP BY user_id
                 ) r ON r.user_id = u2.id
                 WHERE u2.deleted_at IS NULL
                 ORDER BY u2.updated_at ASC
                 LIMIT $1
             ) d
             WHERE u.id = d.id AND u.chapters_read <> d.derived",
        )
        .bind(batch)
        .execute(pool)
        .await?;
        Ok(result.rows_affected())
    }
}
