//! Library endpoints: list, add, patch, delete, bulk, progress, import,
//! metadata retry.

use std::collections::HashSet;
use std::str::FromStr;
use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use mangatrack_core::jobs::{ImportEntry, ImportJobPayload, MetadataJob, QUEUE_IMPORT, QUEUE_METADATA};
use mangatrack_core::{ActivityEventType, LibraryStatus, MetadataStatus};
use mangatrack_progress::ProgressRequest;
use mangatrack_queue::{JobOptions, JobPriority};
use mangatrack_store::activity::{ActivityStore, NewActivityEvent};
use mangatrack_store::imports::ImportStore;
use mangatrack_store::library::{LibraryPatch, LibrarySort, LibraryStore, NewLibraryEntry};
use mangatrack_store::series::SeriesStore;
use mangatrack_store::series_sources::SeriesSourceStore;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

use super::{validate_limit, validate_offset};

const MAX_BULK_UPDATES: usize = 50;
const MAX_IMPORT_ENTRIES: usize = 500;
const MAX_PREFERRED_SOURCE_LEN: usize = 50;

// ── List ─────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ListParams {
    q: Option<String>,
    status: Option<String>,
    sort: Option<String>,
    limit: Option<i64>,
    offset: Option<i64>,
}

#[derive(Serialize)]
struct Pagination {
    limit: i64,
    offset: i64,
    total: i64,
}

pub async fn library_list(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Query(params): Query<ListParams>,
) -> Result<Response, ApiError> {
    let limit = validate_limit(params.limit, 50, 200)?;
    let offset = validate_offset(params.offset)?;
    let status = params
        .status
        .as_deref()
        .map(LibraryStatus::from_str)
        .transpose()
        .map_err(ApiError::Validation)?;
    let sort = params
        .sort
        .as_deref()
        .map(LibrarySort::from_str)
        .transpose()
        .map_err(ApiError::Validation)?
        .unwrap_or(LibrarySort::Updated);

    let entries = LibraryStore::list(
        &state.pool,
        user.id,
        params.q.as_deref(),
        status,
        sort,
        limit,
        offset,
    )
    .await?;
    let stats = LibraryStore::stats(&state.pool, user.id).await?;
    let total = stats.total;

    Ok(Json(serde_json::json!({
        "entries": entries,
        "stats": stats,
        "pagination": Pagination { limit, offset, total },
    }))
    .into_response())
}

// ── Add ──────────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct AddBody {
    #[serde(rename = "seriesId")]
    series_id: Uuid,
    status: Option<String>,
}

pub async fn library_add(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<AddBody>,
) -> Result<Response, ApiError> {
    let status = body
        .status
        .as_deref()
        .map(LibraryStatus::from_str)
        .transpose()
        .map_err(ApiError::Validation)?
        .unwrap_or(LibraryStatus::Reading);

    let series = SeriesStore::get(&state.pool, body.series_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    // The functional key is the source URL; prefer the series' first
    // attached source, falling back to an internal URL.
    let sources = SeriesSourceStore::list_for_series(&state.pool, series.id).await?;
    let source_url = sources
        .first()
        .map(|s| s.source_url.clone())
        .unwrap_or_else(|| format!("mangatrack://series/{}", series.id));
    let source_name = sources.first().map(|s| s.source_name.clone());

    let entry = LibraryStore::add(
        &state.pool,
        NewLibraryEntry {
            user_id: user.id,
            series_id: Some(series.id),
            source_url,
            source_name,
            title: Some(series.title.clone()),
            status,
        },
    )
    .await?;

    SeriesStore::increment_follows(&state.pool, series.id).await?;
    ActivityStore::record(
        &state.pool,
        NewActivityEvent {
            series_id: series.id,
            chapter_id: None,
            user_id: Some(user.id),
            source_name: None,
            event_type: ActivityEventType::SeriesFollowed,
        },
    )
    .await?;

    Ok((StatusCode::CREATED, Json(entry)).into_response())
}

// ── Patch / delete ───────────────────────────────────────────────────

#[derive(Deserialize, Clone)]
pub struct PatchBody {
    status: Option<String>,
    rating: Option<i32>,
    preferred_source: Option<String>,
}

fn validate_patch(body: &PatchBody) -> Result<LibraryPatch, ApiError> {
    let status = body
        .status
        .as_deref()
        .map(LibraryStatus::from_str)
        .transpose()
        .map_err(ApiError::Validation)?;
    if let Some(rating) = body.rating {
        if !(1..=10).contains(&rating) {
            return Err(ApiError::Validation(format!("rating {} out of range 1..=10", rating)));
        }
    }
    if let Some(source) = &body.preferred_source {
        if source.len() > MAX_PREFERRED_SOURCE_LEN {
            return Err(ApiError::Validation("preferred_source too long".to_string()));
        }
    }
    Ok(LibraryPatch {
        status,
        user_rating: body.rating,
        preferred_source: body.preferred_source.clone(),
    })
}

pub async fn library_patch(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<PatchBody>,
) -> Result<Response, ApiError> {
    let patch = validate_patch(&body)?;
    // The progress engine owns status transitions (toggle heuristics,
    // one-time completion XP).
    let row = state.progress.update_status(user.id, entry_id, patch).await?;
    Ok(Json(row).into_response())
}

pub async fn library_delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(entry_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let row = LibraryStore::soft_delete(&state.pool, user.id, entry_id).await?;
    if let Some(series_id) = row.series_id {
        SeriesStore::decrement_follows(&state.pool, series_id).await?;
    }
    Ok(Json(serde_json::json!({"deleted": true})).into_response())
}

// ── Bulk patch ───────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct BulkBody {
    updates: Vec<BulkUpdate>,
}

#[derive(Deserialize)]
pub struct BulkUpdate {
    id: Uuid,
    #[serde(flatten)]
    patch: PatchBody,
}

pub async fn library_bulk_patch(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<BulkBody>,
) -> Result<Response, ApiError> {
    if body.updates.is_empty() || body.updates.len() > MAX_BULK_UPDATES {
        return Err(ApiError::Validation(format!(
            "updates must contain 1..={} items",
            MAX_BULK_UPDATES
        )));
    }
    // Validate everything before touching any row.
    let mut validated = Vec::with_capacity(body.updates.len());
    for update in &body.updates {
        validated.push((update.id, validate_patch(&update.patch)?));
    }

    let mut results = Vec::with_capacity(validated.len());
    for (entry_id, patch) in validated {
        match state.progress.update_status(user.id, entry_id, patch).await {
            Ok(row) => results.push(serde_json::json!({"id": entry_id, "ok": true, "entry": row})),
            Err(e) => results.push(serde_json::json!({
                "id": entry_id,
                "ok": false,
                "error": e.to_string(),
            })),
        }
    }
    Ok(Json(serde_json::json!({"results": results})).into_response())
}

// ── Progress ─────────────────────────────────────────────────────────

pub async fn library_progress(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(entry_id): Path<Uuid>,
    Json(body): Json<ProgressRequest>,
) -> Result<Response, ApiError> {
    if let Some(number) = body.chapter_number {
        if !number.is_finite() || number < 0.0 {
            return Err(ApiError::Validation(format!("chapterNumber {} is invalid", number)));
        }
    }
    let outcome = state.progress.update_progress(user.id, entry_id, body).await?;
    Ok(Json(outcome).into_response())
}

// ── Import ───────────────────────────────────────────────────────────

#[derive(Deserialize)]
pub struct ImportBody {
    source: String,
    entries: Vec<ImportEntryBody>,
}

#[derive(Deserialize)]
pub struct ImportEntryBody {
    url: String,
    title: Option<String>,
    external_id: Option<String>,
}

pub async fn library_import(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<ImportBody>,
) -> Result<Response, ApiError> {
    if body.entries.is_empty() || body.entries.len() > MAX_IMPORT_ENTRIES {
        return Err(ApiError::Validation(format!(
            "entries must contain 1..={} items",
            MAX_IMPORT_ENTRIES
        )));
    }
    if body.source.trim().is_empty() {
        return Err(ApiError::Validation("source is required".to_string()));
    }

    // De-duplicate within the batch by URL, external id, and title.
    let existing: HashSet<String> = LibraryStore::existing_source_urls(&state.pool, user.id)
        .await?
        .into_iter()
        .collect();
    let mut seen_urls = HashSet::new();
    let mut seen_externals = HashSet::new();
    let mut seen_titles = HashSet::new();
    let mut entries = Vec::new();
    let mut skipped = 0usize;

    for entry in body.entries {
        let url = entry.url.trim().to_string();
        if url.is_empty() {
            return Err(ApiError::Validation("entry url is required".to_string()));
        }
        let dup_in_batch = !seen_urls.insert(url.clone())
            || entry
                .external_id
                .as_ref()
                .map(|e| !seen_externals.insert(e.clone()))
                .unwrap_or(false)
            || entry
                .title
                .as_ref()
                .map(|t| !seen_titles.insert(t.to_lowercase()))
                .unwrap_or(false);
        if dup_in_batch || existing.contains(&url) {
            skipped += 1;
            continue;
        }
        entries.push(ImportEntry { url, title: entry.title, external_id: entry.external_id });
    }

    let queued = entries.len();
    let job = ImportStore::create(&state.pool, user.id, &body.source, queued as i32).await?;

    let payload = ImportJobPayload {
        import_id: job.id,
        user_id: user.id,
        source: body.source,
        entries,
    };
    state
        .queues
        .add(
            QUEUE_IMPORT,
            "library-import",
            serde_json::to_value(&payload).map_err(|e| ApiError::Internal(e.to_string()))?,
            JobOptions::default().with_job_id(format!("import-{}", job.id)),
        )
        .await?;

    Ok((
        StatusCode::ACCEPTED,
        Json(serde_json::json!({"importId": job.id, "queued": queued, "skipped": skipped})),
    )
        .into_response())
}

// ── Metadata retry ───────────────────────────────────────────────────

pub async fn library_retry_metadata(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Path(entry_id): Path<Uuid>,
) -> Result<Response, ApiError> {
    let entry = LibraryStore::get_for_user(&state.pool, user.id, entry_id)
        .await?
        .ok_or(ApiError::NotFound)?;

    LibraryStore::set_metadata_status(&state.pool, entry.id, MetadataStatus::Pending).await?;
    let payload = MetadataJob { entry_id: entry.id, user_id: user.id };
    state
        .queues
        .add(
            QUEUE_METADATA,
            "metadata-resolve",
            serde_json::to_value(&payload).map_err(|e| ApiError::Internal(e.to_string()))?,
            JobOptions::default()
                .with_job_id(format!("metadata-{}", entry.id))
                .with_priority(JobPriority::Critical),
        )
        .await?;

    Ok((StatusCode::ACCEPTED, Json(serde_json::json!({"status": "pending"}))).into_response())
}
