//! Series endpoints: chapter listing, source attachment, search,
//! discover, trending.

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;
use uuid::Uuid;

use mangatrack_core::jobs::{sync_job_id, SyncJob, QUEUE_SYNC};
use mangatrack_core::{ActivityEventType, CrawlReason, SourceName};
use mangatrack_queue::{JobOptions, JobPriority};
use mangatrack_scheduler::UserClass;
use mangatrack_sources::is_allowed_source_url;
use mangatrack_store::activity::{ActivityStore, NewActivityEvent};
use mangatrack_store::chapters::{ChapterSourceStore, ChapterStore};
use mangatrack_store::series::SeriesStore;
use mangatrack_store::series_sources::{NewSeriesSource, SeriesSourceStore};
use mangatrack_store::users::UserStore;

use crate::auth::{AuthUser, MaybeAuthUser};
use crate::error::ApiError;
use crate::state::AppState;

use super::{validate_limit, validate_offset};

const MAX_QUERY_LEN: usize = 200;

// ── Chapters ─────────────────────────────────────────────────────────

pub async fn series_chapters(
    State(state): State<Arc<AppState>>,
    Path(series_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let series = SeriesStore::get(&state.pool, series_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let chapters = ChapterStore::list_for_series(&state.pool, series.id).await?;
    let sources = ChapterSourceStore::list_for_series(&state.pool, series.id).await?;

    // Group availability records under their logical chapter, keeping
    // detection order within each group.
    let mut by_chapter: HashMap<Uuid, Vec<serde_json::Value>> = HashMap::new();
    for source in sources {
        by_chapter.entry(source.chapter_id).or_default().push(serde_json::json!({
            "source_name": source.source_name,
            "url": source.source_chapter_url,
            "detected_at": source.detected_at,
            "is_available": source.is_available,
        }));
    }

    let groups: Vec<serde_json::Value> = chapters
        .into_iter()
        .map(|chapter| {
            let sources = by_chapter.remove(&chapter.id).unwrap_or_default();
            serde_json::json!({
                "id": chapter.id,
                "chapter_number": chapter.chapter_number,
                "chapter_slug": chapter.chapter_slug,
                "title": chapter.chapter_title,
                "published_at": chapter.published_at,
                "first_detected_at": chapter.first_detected_at,
                "sources": sources,
            })
        })
        .collect();

    Ok(Json(serde_json::json!({"series_id": series.id, "chapters": groups})).into_response())
}

// ── Attach source ────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AttachSourceBody {
    source_name: String,
    source_id: String,
    source_url: String,
}

pub async fn series_attach_source(
    State(state): State<Arc<AppState>>,
    _user: AuthUser,
    Path(series_id): Path<Uuid>,
    Json(body): Json<AttachSourceBody>,
) -> Result<Response, ApiError> {
    let name = SourceName::from_str(&body.source_name).map_err(ApiError::Validation)?;
    if body.source_id.trim().is_empty() {
        return Err(ApiError::Validation("source_id is required".to_string()));
    }
    if !is_allowed_source_url(&body.source_url, name) {
        return Err(ApiError::Forbidden("source host is not allow-listed"));
    }

    let series = SeriesStore::get(&state.pool, series_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    let source = SeriesSourceStore::attach(
        &state.pool,
        NewSeriesSource {
            series_id: series.id,
            source_name: name,
            source_id: body.source_id.trim().to_string(),
            source_url: body.source_url,
        },
    )
    .await?;

    // User-requested syncs go straight to the front of the queue.
    let payload = SyncJob {
        series_source_id: source.id,
        reason: CrawlReason::UserRequest,
        target_chapters: None,
    };
    state
        .queues
        .add(
            QUEUE_SYNC,
            "sync",
            serde_json::to_value(&payload).map_err(|e| ApiError::Internal(e.to_string()))?,
            JobOptions::default()
                .with_job_id(sync_job_id(source.id))
                .with_priority(JobPriority::Critical),
        )
        .await?;

    Ok((StatusCode::CREATED, Json(source)).into_response())
}

// ── Search / discover / trending ─────────────────────────────────────

#[derive(Deserialize)]
pub struct SearchParams {
    q: String,
}

pub async fn series_search(
    State(state): State<Arc<AppState>>,
    MaybeAuthUser(user): MaybeAuthUser,
    Query(params): Query<SearchParams>,
) -> Result<Response, ApiError> {
    let q = params.q.trim();
    if q.is_empty() || q.len() > MAX_QUERY_LEN {
        return Err(ApiError::Validation(format!(
            "q must be 1..={} characters",
            MAX_QUERY_LEN
        )));
    }

    let results = SeriesStore::search_by_title(&state.pool, q, 20).await?;
    if let Some(top) = results.first() {
        ActivityStore::record(
            &state.pool,
            NewActivityEvent {
                series_id: top.id,
                chapter_id: None,
                user_id: user.map(|u| u.id),
                source_name: None,
                event_type: ActivityEventType::SearchImpression,
            },
        )
        .await?;
    }

    let class = match user {
        None => UserClass::Free,
        Some(auth) => match UserStore::get(&state.pool, auth.id).await? {
            Some(row) if row.is_premium => UserClass::Premium,
            Some(_) => UserClass::LoggedIn,
            None => UserClass::Free,
        },
    };
    let decision = state
        .storm
        .maybe_enqueue(q, class)
        .await
        .map_err(ApiError::from)?;

    Ok(Json(serde_json::json!({
        "results": results,
        "external": {"enqueued": decision.enqueued, "reason": decision.reason},
    }))
    .into_response())
}

#[derive(Deserialize)]
pub struct PageParams {
    limit: Option<i64>,
    offset: Option<i64>,
}

pub async fn series_discover(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Response, ApiError> {
    let limit = validate_limit(params.limit, 20, 100)?;
    let offset = validate_offset(params.offset)?;
    let series = SeriesStore::discover(&state.pool, limit, offset).await?;
    Ok(Json(serde_json::json!({"series": series})).into_response())
}

pub async fn series_trending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PageParams>,
) -> Result<Response, ApiError> {
    let limit = validate_limit(params.limit, 20, 50)?;
    let series = SeriesStore::trending(&state.pool, limit).await?;
    Ok(Json(serde_json::json!({"series": series})).into_response())
}
