//! Activity feed and the seen watermark.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use mangatrack_store::feed::FeedStore;
use mangatrack_store::users::UserStore;

use crate::auth::AuthUser;
use crate::cursor::{self, Cursor};
use crate::error::ApiError;
use crate::state::AppState;

use super::validate_limit;

/// Feed pages are cached in the KVS for this long, keyed by the user's
/// feed version — fan-out bumps the version instead of deleting keys.
const FEED_CACHE_TTL_MS: u64 = 60_000;

#[derive(Deserialize)]
pub struct ActivityParams {
    cursor: Option<String>,
    limit: Option<i64>,
    filter: Option<String>,
}

pub async fn feed_activity(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ActivityParams>,
) -> Result<Response, ApiError> {
    let limit = validate_limit(params.limit, 30, 100)?;
    let unread_only = match params.filter.as_deref() {
        None | Some("all") => false,
        Some("unread") => true,
        Some(other) => {
            return Err(ApiError::Validation(format!("unknown filter '{}'", other)));
        }
    };
    let cursor = params
        .cursor
        .as_deref()
        .map(cursor::decode)
        .transpose()
        .map_err(|e| ApiError::Validation(e.to_string()))?;

    // Version-keyed cache: fan-out invalidates by bumping feed:v:<user>.
    let version = state
        .kvs
        .get(&format!("feed:v:{}", user.id))
        .await
        .ok()
        .flatten()
        .unwrap_or_else(|| "0".to_string());
    let cache_key = format!(
        "feed:act:{}:v{}:{}:{}:{}",
        user.id,
        version,
        if unread_only { "unread" } else { "all" },
        params.cursor.as_deref().unwrap_or("-"),
        limit
    );
    if let Ok(Some(cached)) = state.kvs.get(&cache_key).await {
        if let Ok(body) = serde_json::from_str::<serde_json::Value>(&cached) {
            return Ok(Json(body).into_response());
        }
    }

    let rows = FeedStore::activity_page(
        &state.pool,
        user.id,
        cursor.map(|c| (c.d, c.i)),
        unread_only,
        limit,
    )
    .await?;

    let next_cursor = if rows.len() as i64 == limit {
        rows.last()
            .map(|row| cursor::encode(&Cursor { d: row.last_updated_at, i: row.id }))
    } else {
        None
    };
    let entries: Vec<serde_json::Value> = rows
        .iter()
        .map(|row| {
            serde_json::json!({
                "id": row.id,
                "series_id": row.series_id,
                "chapter_number": row.chapter_number,
                "logical_chapter_id": row.logical_chapter_id,
                "sources": row.source_list(),
                "first_discovered_at": row.first_discovered_at,
                "last_updated_at": row.last_updated_at,
            })
        })
        .collect();

    let body = serde_json::json!({"entries": entries, "nextCursor": next_cursor});
    state
        .kvs
        .set_px(&cache_key, &body.to_string(), FEED_CACHE_TTL_MS)
        .await
        .ok();

    Ok(Json(body).into_response())
}

#[derive(Deserialize)]
pub struct SeenBody {
    last_seen_at: String,
}

/// Watermark update: strictly-greater only, so replays and out-of-order
/// requests are no-ops.
pub async fn feed_seen(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<SeenBody>,
) -> Result<Response, ApiError> {
    let seen_at: DateTime<Utc> = DateTime::parse_from_rfc3339(&body.last_seen_at)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|_| ApiError::Validation("last_seen_at must be an ISO timestamp".to_string()))?;

    let updated = UserStore::advance_feed_seen(&state.pool, user.id, seen_at).await?;
    Ok(Json(serde_json::json!({"updated": updated})).into_response())
}
