//! Queue worker wiring: handler implementations owned by the server
//! process (notification delivery, external search, import, metadata) and
//! the per-queue worker pool spawner.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use mangatrack_core::jobs::{
    ImportJobPayload, MetadataJob, NotifyJob, SearchJob, QUEUE_CHECK, QUEUE_FANOUT, QUEUE_IMPORT,
    QUEUE_INGEST, QUEUE_METADATA, QUEUE_NOTIFY, QUEUE_SEARCH, QUEUE_SYNC,
};
use mangatrack_core::{LibraryStatus, MetadataStatus};
use mangatrack_ingest::{ChapterIngestor, FanoutWorker};
use mangatrack_kvs::Kvs;
use mangatrack_notify::{Dispatcher, Notification};
use mangatrack_queue::{run_worker, Job, JobError, JobHandler, QueueManager, WorkerOptions};
use mangatrack_scheduler::SourcePollWorker;
use mangatrack_sources::SourceRegistry;
use mangatrack_store::imports::ImportStore;
use mangatrack_store::library::{LibraryStore, NewLibraryEntry};
use mangatrack_store::notifications::{NewNotification, NotificationStore};
use mangatrack_store::series::SeriesStore;
use mangatrack_store::series_sources::SeriesSourceStore;

use crate::state::AppState;

// ── Notification delivery ────────────────────────────────────────────

/// Consumes collapsed `notification-delivery` jobs: one row per follower
/// plus a dispatch through the configured channels.
pub struct NotifyDeliveryWorker {
    pool: PgPool,
    dispatcher: Arc<Dispatcher>,
}

impl NotifyDeliveryWorker {
    pub fn new(pool: PgPool, dispatcher: Arc<Dispatcher>) -> Self {
        Self { pool, dispatcher }
    }
}

#[async_trait]
impl JobHandler for NotifyDeliveryWorker {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: NotifyJob = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad notify payload: {}", e)))?;

        let series = SeriesStore::get(&self.pool, payload.series_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        let title = series.map(|s| s.title).unwrap_or_else(|| "a followed series".to_string());

        let followers = LibraryStore::followers_of_series(&self.pool, payload.series_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        for user_id in &followers {
            let id = NotificationStore::create(
                &self.pool,
                NewNotification {
                    user_id: *user_id,
                    series_id: Some(payload.series_id),
                    chapter_id: Some(payload.chapter_id),
                    kind: "new_chapter".to_string(),
                    payload: serde_json::json!({
                        "chapter_number": payload.chapter_number,
                        "series_title": title,
                    }),
                    scheduled_for: None,
                },
            )
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
            NotificationStore::mark_sent(&self.pool, id)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
        }

        let notification = Notification {
            subject: format!("New chapter of {}", title),
            body: format!("Chapter {} was discovered", payload.chapter_number),
            metadata: HashMap::from([
                ("series_id".to_string(), payload.series_id.to_string()),
                ("chapter_number".to_string(), payload.chapter_number.clone()),
            ]),
        };
        self.dispatcher.dispatch(&notification).await;

        info!(
            series_id = %payload.series_id,
            chapter = %payload.chapter_number,
            followers = followers.len(),
            "chapter notification delivered"
        );
        Ok(())
    }
}

// ── External discovery search ────────────────────────────────────────

/// Runs one deduplicated external search across implemented sources.
pub struct ExternalSearchWorker {
    registry: Arc<SourceRegistry>,
    kvs: Arc<dyn Kvs>,
}

impl ExternalSearchWorker {
    pub fn new(registry: Arc<SourceRegistry>, kvs: Arc<dyn Kvs>) -> Self {
        Self { registry, kvs }
    }
}

#[async_trait]
impl JobHandler for ExternalSearchWorker {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: SearchJob = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad search payload: {}", e)))?;

        let mut hits = Vec::new();
        for name in self.registry.implemented() {
            let Ok(client) = self.registry.client(name) else {
                continue;
            };
            if self.registry.breaker().check(name).is_err() {
                continue;
            }
            match client.search_series(&payload.normalized_query).await {
                Ok(results) => {
                    self.registry.breaker().record_success(name);
                    hits.extend(results);
                }
                Err(e) => {
                    self.registry.breaker().record_failure(name);
                    warn!(source = %name, error = %e, "external search failed");
                }
            }
        }

        // Stash discovery results briefly for the next local search to
        // surface; series creation happens through attach/enrichment.
        let key = format!("search:ext:{}", payload.normalized_query);
        let body = serde_json::to_string(&hits).unwrap_or_else(|_| "[]".to_string());
        self.kvs
            .set_px(&key, &body, 10 * 60 * 1000)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        info!(query = %payload.normalized_query, hits = hits.len(), "external search complete");
        Ok(())
    }
}

// ── Library import ───────────────────────────────────────────────────

pub struct ImportWorker {
    pool: PgPool,
    queues: Arc<QueueManager>,
}

impl ImportWorker {
    pub fn new(pool: PgPool, queues: Arc<QueueManager>) -> Self {
        Self { pool, queues }
    }
}

#[async_trait]
impl JobHandler for ImportWorker {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: ImportJobPayload = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad import payload: {}", e)))?;

        ImportStore::mark_processing(&self.pool, payload.import_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        let mut processed = 0i32;
        for entry in &payload.entries {
            let created = LibraryStore::add(
                &self.pool,
                NewLibraryEntry {
                    user_id: payload.user_id,
                    series_id: None,
                    source_url: entry.url.clone(),
                    source_name: None,
                    title: entry.title.clone(),
                    status: LibraryStatus::Reading,
                },
            )
            .await;
            match created {
                Ok(row) => {
                    // Resolution links the entry to a series when possible.
                    let meta = MetadataJob { entry_id: row.id, user_id: payload.user_id };
                    self.queues
                        .add(
                            QUEUE_METADATA,
                            "metadata-resolve",
                            serde_json::to_value(&meta)
                                .map_err(|e| JobError::permanent(e.to_string()))?,
                            mangatrack_queue::JobOptions::default()
                                .with_job_id(format!("metadata-{}", row.id)),
                        )
                        .await
                        .map_err(|e| JobError::transient(e.to_string()))?;
                    processed += 1;
                }
                Err(mangatrack_store::StoreError::Duplicate(_)) => {
                    // Raced into the library since the API dedup pass.
                }
                Err(e) => {
                    ImportStore::mark_failed(&self.pool, payload.import_id, &e.to_string())
                        .await
                        .ok();
                    return Err(JobError::transient(e.to_string()));
                }
            }
            ImportStore::bump_progress(&self.pool, payload.import_id, processed)
                .await
                .ok();
        }

        ImportStore::mark_completed(&self.pool, payload.import_id, processed)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        info!(import_id = %payload.import_id, processed, "library import complete");
        Ok(())
    }
}

// ── Metadata resolution ──────────────────────────────────────────────

/// Links a library entry to a tracked series by its source URL.
/// Enrichment against external catalogs is a collaborator behind this
/// seam; a miss is never fatal — the entry stays usable as `unavailable`
/// and is retried periodically.
pub struct MetadataWorker {
    pool: PgPool,
}

impl MetadataWorker {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobHandler for MetadataWorker {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: MetadataJob = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad metadata payload: {}", e)))?;

        let Some(entry) =
            LibraryStore::get_for_user(&self.pool, payload.user_id, payload.entry_id)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?
        else {
            return Ok(()); // entry removed meanwhile
        };

        if entry.series_id.is_some() {
            LibraryStore::set_metadata_status(&self.pool, entry.id, MetadataStatus::Enriched)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            return Ok(());
        }

        let matched = SeriesSourceStore::find_by_url(&self.pool, &entry.source_url)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        match matched {
            Some(source) => {
                LibraryStore::link_series(&self.pool, entry.id, source.series_id)
                    .await
                    .map_err(|e| JobError::transient(e.to_string()))?;
                LibraryStore::set_metadata_status(&self.pool, entry.id, MetadataStatus::Enriched)
                    .await
                    .map_err(|e| JobError::transient(e.to_string()))?;
            }
            None => {
                LibraryStore::set_metadata_status(
                    &self.pool,
                    entry.id,
                    MetadataStatus::Unavailable,
                )
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            }
        }
        Ok(())
    }
}

// ── Worker pool spawner ──────────────────────────────────────────────

/// Spawn every queue worker with its per-queue settings. Returns the
/// join handles so shutdown can drain them.
pub fn spawn_workers(
    state: Arc<AppState>,
    dispatcher: Arc<Dispatcher>,
    shutdown: watch::Receiver<bool>,
) -> Vec<tokio::task::JoinHandle<()>> {
    let poll_worker = Arc::new(SourcePollWorker::new(
        state.pool.clone(),
        state.queues.clone(),
        state.registry.clone(),
        state.rate.clone(),
        state.negative.clone(),
        state.config.crawl.clone(),
    ));

    let handlers: Vec<(&'static str, Arc<dyn JobHandler>, WorkerOptions)> = vec![
        (
            QUEUE_SYNC,
            poll_worker.clone(),
            WorkerOptions::default()
                .with_concurrency(20)
                .with_rate_limit(10, Duration::from_secs(1))
                .with_job_timeout(Duration::from_secs(120)),
        ),
        (
            QUEUE_CHECK,
            poll_worker,
            WorkerOptions::default()
                .with_concurrency(2)
                .with_rate_limit(3, Duration::from_secs(1)),
        ),
        (
            QUEUE_INGEST,
            Arc::new(ChapterIngestor::new(
                state.pool.clone(),
                state.kvs.clone(),
                state.queues.clone(),
            )),
            WorkerOptions::default().with_concurrency(10).with_job_timeout(Duration::from_secs(60)),
        ),
        (
            QUEUE_FANOUT,
            Arc::new(FanoutWorker::new(state.pool.clone(), state.kvs.clone())),
            WorkerOptions::default().with_concurrency(5),
        ),
        (
            QUEUE_NOTIFY,
            Arc::new(NotifyDeliveryWorker::new(state.pool.clone(), dispatcher)),
            WorkerOptions::default()
                .with_concurrency(15)
                .with_rate_limit(1000, Duration::from_secs(60)),
        ),
        (
            QUEUE_SEARCH,
            Arc::new(ExternalSearchWorker::new(state.registry.clone(), state.kvs.clone())),
            WorkerOptions::default().with_concurrency(2),
        ),
        (
            QUEUE_IMPORT,
            Arc::new(ImportWorker::new(state.pool.clone(), state.queues.clone())),
            WorkerOptions::default().with_concurrency(2).with_job_timeout(Duration::from_secs(300)),
        ),
        (
            QUEUE_METADATA,
            Arc::new(MetadataWorker::new(state.pool.clone())),
            WorkerOptions::default().with_concurrency(2),
        ),
    ];

    handlers
        .into_iter()
        .map(|(queue, handler, opts)| {
            tokio::spawn(run_worker(
                state.queues.clone(),
                state.kvs.clone(),
                queue,
                handler,
                opts,
                shutdown.clone(),
            ))
        })
        .collect()
}
