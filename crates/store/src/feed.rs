//! Feed entries: one row per `(series, chapter_number)` with an ordered,
//! append-only list of discovering sources.
//!
//! The sources list is decoded into an `IndexMap` keyed by source name so
//! insertion order survives the round trip and a replayed job can never
//! append the same source twice. `first_discovered_at` is immutable after
//! creation.

use chrono::{DateTime, Utc};
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use uuid::Uuid;

use crate::StoreResult;

const FEED_COLUMNS: &str = "id, series_id, chapter_number, logical_chapter_id, sources, \
     first_discovered_at, last_updated_at, created_at";

#[derive(Debug, Clone, sqlx::FromRow, Serialize)]
pub struct FeedEntryRow {
    pub id: Uuid,
    pub series_id: Uuid,
    pub chapter_number: String,
    pub logical_chapter_id: Option<Uuid>,
    pub sources: serde_json::Value,
    pub first_discovered_at: DateTime<Utc>,
    pub last_updated_at: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
}

impl FeedEntryRow {
    pub fn source_list(&self) -> Vec<FeedSource> {
        decode_sources(&self.sources).into_values().collect()
    }
}

/// One source's appearance in a feed entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedSource {
    pub name: String,
    pub url: String,
    pub discovered_at: DateTime<Utc>,
}

/// Outcome of a feed upsert, used by fan-out to decide cache invalidation.
#[derive(Debug)]
pub struct FeedUpsert {
    pub row: FeedEntryRow,
    pub created: bool,
    pub source_appended: bool,
}

fn decode_sources(value: &serde_json::Value) -> IndexMap<String, FeedSource> {
    let list: Vec<FeedSource> = serde_json::from_value(value.clone()).unwrap_or_default();
    list.into_iter().map(|s| (s.name.clone(), s)).collect()
}

fn encode_sources(sources: &IndexMap<String, FeedSource>) -> serde_json::Value {
    let list: Vec<&FeedSource> = sources.values().collect();
    serde_json::to_value(list).unwrap_or_else(|_| serde_json::Value::Array(vec![]))
}

pub struct FeedStore;

impl FeedStore {
    /// Upsert the feed entry for `(series, chapter_number)`, appending
    /// `source` if it is not already listed. Runs under the per-chapter
    /// ingest lock.
    pub async fn upsert(
        pool: &PgPool,
        series_id: Uuid,
        chapter_number: &str,
        logical_chapter_id: Uuid,
        source: FeedSource,
        detected_at: DateTime<Utc>,
    ) -> StoreResult<FeedUpsert> {
        let existing = Self::get(pool, series_id, chapter_number).await?;

        let Some(entry) = existing else {
            let sources = serde_json::to_value(vec![&source])
                .unwrap_or_else(|_| serde_json::Value::Array(vec![]));
            let row = sqlx::query_as::<_, FeedEntryRow>(&format!(
                "INSERT INTO feed_entries
                     (series_id, chapter_number, logical_chapter_id, sources,
                      first_discovered_at, last_updated_at)
                 VALUES ($1, $2, $3, $4, $5, $5)
                 ON CONFLICT (series_id, chapter_number) DO UPDATE
                     SET last_updated_at = EXCLUDED.last_updated_at
                 RETURNING {}",
                FEED_COLUMNS
            ))
            .bind(series_id)
            .bind(chapter_number)
            .bind(logical_chapter_id)
            .bind(&sources)
            .bind(detected_at)
            .fetch_one(pool)
            .await?;
            return Ok(FeedUpsert { row, created: true, source_appended: true });
        };

        let mut sources = decode_sources(&entry.sources);
        let source_appended = !sources.contains_key(&source.name);
        if !source_appended && entry.logical_chapter_id.is_some() {
            // Replay with nothing new: leave the row untouched so repeated
            // ingestion converges byte-for-byte.
            return Ok(FeedUpsert { row: entry, created: false, source_appended: false });
        }
        if source_appended {
            sources.insert(source.name.clone(), source);
        }

        let row = sqlx::query_as::<_, FeedEntryRow>(&format!(
            "UPDATE feed_entries
             SET sources = $2,
                 last_updated_at = CASE WHEN $5 THEN $3 ELSE last_updated_at END,
                 logical_chapter_id = COALESCE(logical_chapter_id, $4)
             WHERE id = $1
             RETURNING {}",
            FEED_COLUMNS
        ))
        .bind(entry.id)
        .bind(encode_sources(&sources))
        .bind(Utc::now())
        .bind(logical_chapter_id)
        .bind(source_appended)
        .fetch_one(pool)
        .await?;

        Ok(FeedUpsert { row, created: false, source_appended })
    }

    pub async fn get(
        pool: &PgPool,
        series_id: Uuid,
        chapter_number: &str,
    ) -> StoreResult<Option<FeedEntryRow>> {
        let row = sqlx::query_as::<_, FeedEntryRow>(&format!(
            "SELECT {} FROM feed_entries WHERE series_id = $1 AND chapter_number = $2",
            FEED_COLUMNS
        ))
        .bind(series_id)
        .bind(chapter_number)
        .fetch_optional(pool)
        .await?;
        Ok(row)
    }

    /// Page of a user's activity feed: entries for series in their library,
    /// newest first, keyset-paginated on `(last_updated_at, id)`.
    pub async fn activity_page(
        pool: &PgPool,
        user_id: Uuid,
        cursor: Option<(DateTime<Utc>, Uuid)>,
        unread_only: bool,
        limit: i64,
    ) -> StoreResult<Vec<FeedEntryRow>> {
        let (cursor_d, cursor_i) = match cursor {
            Some((d, i)) => (Some(d), Some(i)),
            None => (None, None),
        };
        let unread_clause = if unread_only {
            "AND NOT EXISTS (
                 SELECT 1 FROM user_chapter_reads ucr
                 WHERE ucr.user_id = $1
                   AND ucr.chapter_id = fe.logical_chapter_id
                   AND ucr.is_read)"
        } else {
            ""
        };
        let sql = format!(
            "SELECT {} FROM feed_entries fe
             WHERE fe.series_id IN (
                     SELECT le.series_id FROM library_entries le
                     WHERE le.user_id = $1 AND le.deleted_at IS NULL
                       AND le.series_id IS NOT NULL)
               AND ($2::timestamptz IS NULL
                    OR (fe.last_updated_at, fe.id) < ($2, $3))
               {}
             ORDER BY fe.last_updated_at DESC, fe.id DESC
             LIMIT $4",
            FEED_COLUMNS_QUALIFIED, unread_clause
        );
        let rows = sqlx::query_as::<_, FeedEntryRow>(&sql)
            .bind(user_id)
            .bind(cursor_d)
            .bind(cursor_i)
            .bind(limit)
            .fetch_all(pool)
            .await?;
        Ok(rows)
    }
}

const FEED_COLUMNS_QUALIFIED: &str = "fe.id, fe.series_id, fe.chapter_number, \
     fe.logical_chapter_id, fe.sources, fe.first_discovered_at, fe.last_updated_at, \
     fe.created_at";

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn src(name: &str) -> FeedSource {
        FeedSource {
            name: name.to_string(),
            url: format!("https://example.com/{}", name),
            discovered_at: Utc::now(),
        }
    }

    #[test]
    fn test_decode_preserves_order() {
        let value = serde_json::to_value(vec![src("mangadex"), src("comick")]).unwrap();
        let decoded = decode_sources(&value);
        let names: Vec<&String> = decoded.keys().collect();
        assert_eq!(names, vec!["mangadex", "comick"]);
    }

    #[test]
    fn test_append_dedups_by_name() {
        let value = serde_json::to_value(vec![src("mangadex")]).unwrap();
        let mut sources = decode_sources(&value);
        assert!(sources.contains_key("mangadex"));
        // A replayed job tries to append the same source again.
        if !sources.contains_key("mangadex") {
            sources.insert("mangadex".to_string(), src("mangadex"));
        }
        assert_eq!(sources.len(), 1);
        sources.insert("comick".to_string(), src("comick"));
        let encoded = encode_sources(&sources);
        let round: Vec<FeedSource> = serde_json::from_value(encoded).unwrap();
        assert_eq!(round.len(), 2);
        assert_eq!(round[0].name, "mangadex");
        assert_eq!(round[1].name, "comick");
    }

    #[test]
    fn test_decode_garbage_is_empty() {
        let decoded = decode_sources(&serde_json::json!({"not": "a list"}));
        assert!(decoded.is_empty());
    }
}
