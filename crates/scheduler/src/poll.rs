//! Source-poll worker.
//!
//! Consumes `sync-source` and `check-source` jobs: backpressure and
//! circuit checks, URL allow-listing, rate-limit token acquisition, the
//! scrape itself, then per-chapter ingest fan-out. Error classes map to
//! scheduling decisions rather than blind retries.

use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{info, warn};

use mangatrack_core::config::CrawlConfig;
use mangatrack_core::jobs::{
    ingest_job_id, ChapterPayload, IngestJob, SyncJob, QUEUE_INGEST, QUEUE_NOTIFY,
};
use mangatrack_core::{CrawlReason, SourceName, SourceStatus};
use mangatrack_kvs::{NegativeCache, RateLimiter};
use mangatrack_queue::{Job, JobError, JobHandler, JobOptions, JobPriority, QueueManager};
use mangatrack_sources::{is_allowed_source_url, ScrapedSeries, SourceError, SourceRegistry};
use mangatrack_store::series_sources::{SeriesSourceRow, SeriesSourceStore};

use mangatrack_ingest::normalize::{identity_key, normalize_label};

/// Deferral windows per failure class.
const DEFER_BACKPRESSURE_MIN: i64 = 15;
const DEFER_RATE_TOKEN_MIN: i64 = 5;
const DEFER_RATE_LIMITED_H: i64 = 1;
const DEFER_BLOCKED_H: i64 = 2;
const DEFER_BROKEN_H: i64 = 1;
const DEFER_NOT_FOUND_H: i64 = 24;
const DEFER_NOT_IMPLEMENTED_D: i64 = 7;

/// Notification queue backlog considered critical for backpressure.
const NOTIFY_BACKLOG_CRITICAL: u64 = 10_000;

pub struct SourcePollWorker {
    pool: PgPool,
    queues: Arc<QueueManager>,
    registry: Arc<SourceRegistry>,
    rate: Arc<RateLimiter>,
    negative: Arc<NegativeCache>,
    crawl: CrawlConfig,
}

impl SourcePollWorker {
    pub fn new(
        pool: PgPool,
        queues: Arc<QueueManager>,
        registry: Arc<SourceRegistry>,
        rate: Arc<RateLimiter>,
        negative: Arc<NegativeCache>,
        crawl: CrawlConfig,
    ) -> Self {
        Self { pool, queues, registry, rate, negative, crawl }
    }

    async fn poll(&self, sync: &SyncJob) -> Result<(), JobError> {
        // 1. Load the source; a vanished row simply ends the job.
        let Some(source) = SeriesSourceStore::get(&self.pool, sync.series_source_id)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?
        else {
            return Ok(());
        };

        // 2. Backpressure: when downstream is drowning, push the poll out.
        if self.system_overloaded().await {
            self.defer(&source, ChronoDuration::minutes(DEFER_BACKPRESSURE_MIN)).await?;
            return Ok(());
        }

        let Some(name) = SourceName::from_str(&source.source_name).ok() else {
            self.deactivate(&source, "unknown source name").await?;
            return Err(JobError::permanent(format!(
                "unknown source name '{}'",
                source.source_name
            )));
        };

        // 3. Circuit breaker (with probe admission).
        if let Err(SourceError::CircuitOpen { .. }) = self.registry.breaker().check(name) {
            SeriesSourceStore::set_status(&self.pool, source.id, SourceStatus::Broken)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            self.defer(&source, ChronoDuration::hours(DEFER_BROKEN_H)).await?;
            return Ok(());
        }

        // 4. Allow-list.
        if !is_allowed_source_url(&source.source_url, name) {
            self.deactivate(&source, "url failed allow-list").await?;
            return Err(JobError::permanent(format!(
                "source url not allow-listed: {}",
                source.source_url
            )));
        }

        // 5. Rate-limit token.
        let timeout = Duration::from_secs(self.crawl.rate_acquire_timeout_secs);
        if !self.rate.acquire(name.as_str(), timeout).await {
            self.defer(&source, ChronoDuration::minutes(DEFER_RATE_TOKEN_MIN)).await?;
            return Ok(());
        }

        // 6. Scrape.
        let client = match self.registry.client(name) {
            Ok(client) => client,
            Err(SourceError::NotImplemented(_)) => {
                self.deactivate(&source, "no provider implementation").await?;
                return Ok(());
            }
            Err(e) => return Err(JobError::transient(e.to_string())),
        };

        let targets = sync.target_chapters.as_deref();
        match client.scrape_series(&source.source_id, targets).await {
            Ok(scraped) => {
                self.registry.breaker().record_success(name);
                self.handle_scraped(&source, name, sync, scraped).await
            }
            Err(e) => {
                self.registry.breaker().record_failure(name);
                self.handle_scrape_error(&source, e).await
            }
        }
    }

    async fn handle_scraped(
        &self,
        source: &SeriesSourceRow,
        name: SourceName,
        sync: &SyncJob,
        scraped: ScrapedSeries,
    ) -> Result<(), JobError> {
        let now = Utc::now();

        // Gap recovery narrows to the requested chapter identities when the
        // client returned the full list.
        let recovery = sync.reason == CrawlReason::GapRecovery;
        let chapters: Vec<_> = match sync.target_chapters.as_ref() {
            Some(targets) if !targets.is_empty() => scraped
                .chapters
                .into_iter()
                .filter(|c| {
                    let normalized = normalize_label(&c.number_label, c.title.as_deref());
                    targets.contains(&identity_key(normalized.number))
                })
                .collect(),
            _ => scraped.chapters,
        };

        if chapters.is_empty() {
            self.negative
                .record_result(source.id, true)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            SeriesSourceStore::mark_success(&self.pool, source.id, now)
                .await
                .map_err(|e| JobError::transient(e.to_string()))?;
            return Ok(());
        }

        self.negative
            .record_result(source.id, false)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        let mut jobs = Vec::with_capacity(chapters.len());
        for chapter in &chapters {
            let normalized = normalize_label(&chapter.number_label, chapter.title.as_deref());
            let identity = identity_key(normalized.number);
            let payload = IngestJob {
                series_id: source.series_id,
                series_source_id: source.id,
                source_name: name,
                chapter: ChapterPayload {
                    number_label: chapter.number_label.clone(),
                    title: chapter.title.clone(),
                    url: chapter.url.clone(),
                    source_chapter_id: chapter.source_chapter_id.clone(),
                    published_at: chapter.published_at,
                },
                recovery,
            };
            jobs.push((
                "ingest".to_string(),
                serde_json::to_value(&payload)
                    .map_err(|e| JobError::permanent(e.to_string()))?,
                JobOptions::default()
                    .with_job_id(ingest_job_id(source.id, &identity))
                    .with_priority(if recovery { JobPriority::High } else { JobPriority::Standard }),
            ));
        }
        let enqueued = self
            .queues
            .add_bulk(QUEUE_INGEST, jobs)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        SeriesSourceStore::mark_success(&self.pool, source.id, now)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        info!(
            series_source_id = %source.id,
            source = %name,
            chapters = chapters.len(),
            enqueued = enqueued.len(),
            recovery,
            "source polled"
        );
        Ok(())
    }

    /// Map a scrape failure to its scheduling decision.
    async fn handle_scrape_error(
        &self,
        source: &SeriesSourceRow,
        error: SourceError,
    ) -> Result<(), JobError> {
        SeriesSourceStore::record_failure(&self.pool, source.id, Utc::now())
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;

        match &error {
            SourceError::RateLimited { .. } => {
                self.defer(source, ChronoDuration::hours(DEFER_RATE_LIMITED_H)).await?;
                Ok(())
            }
            SourceError::ProxyBlocked { .. } => {
                self.defer(source, ChronoDuration::hours(DEFER_BLOCKED_H)).await?;
                Ok(())
            }
            SourceError::Forbidden { .. } => {
                self.defer(source, ChronoDuration::hours(DEFER_BLOCKED_H)).await?;
                Ok(())
            }
            SourceError::NotFound { .. } => {
                warn!(series_source_id = %source.id, error = %error, "series missing on source");
                self.defer(source, ChronoDuration::hours(DEFER_NOT_FOUND_H)).await?;
                Ok(())
            }
            SourceError::NotImplemented(_) => {
                self.deactivate(source, "no provider implementation").await?;
                Ok(())
            }
            SourceError::CircuitOpen { .. } => {
                SeriesSourceStore::set_status(&self.pool, source.id, SourceStatus::Broken)
                    .await
                    .map_err(|e| JobError::transient(e.to_string()))?;
                self.defer(source, ChronoDuration::hours(DEFER_BROKEN_H)).await?;
                Ok(())
            }
            // Transient network/upstream trouble goes through queue backoff.
            SourceError::Http(_)
            | SourceError::Upstream { .. }
            | SourceError::Decode { .. }
            | SourceError::InvalidUrl(_) => Err(JobError::transient(error.to_string())),
        }
    }

    async fn system_overloaded(&self) -> bool {
        let ingest_backlog = self
            .queues
            .counts(QUEUE_INGEST)
            .await
            .map(|c| c.backlog())
            .unwrap_or(0);
        if ingest_backlog > self.crawl.ingest_backlog_critical {
            warn!(ingest_backlog, "ingest backlog critical — deferring polls");
            return true;
        }
        let notify_backlog = self
            .queues
            .counts(QUEUE_NOTIFY)
            .await
            .map(|c| c.backlog())
            .unwrap_or(0);
        if notify_backlog > NOTIFY_BACKLOG_CRITICAL {
            warn!(notify_backlog, "notification backlog critical — deferring polls");
            return true;
        }
        false
    }

    async fn defer(
        &self,
        source: &SeriesSourceRow,
        by: ChronoDuration,
    ) -> Result<(), JobError> {
        SeriesSourceStore::set_next_check(&self.pool, source.id, Utc::now() + by)
            .await
            .map_err(|e| JobError::transient(e.to_string()))
    }

    async fn deactivate(&self, source: &SeriesSourceRow, why: &str) -> Result<(), JobError> {
        warn!(series_source_id = %source.id, reason = why, "source deactivated");
        SeriesSourceStore::set_status(&self.pool, source.id, SourceStatus::Inactive)
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        self.defer(source, ChronoDuration::days(DEFER_NOT_IMPLEMENTED_D)).await
    }
}

#[async_trait]
impl JobHandler for SourcePollWorker {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: SyncJob = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad sync payload: {}", e)))?;
        self.poll(&payload).await
    }
}
