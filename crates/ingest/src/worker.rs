//! Chapter-ingest worker.
//!
//! Consumes `chapter-ingest` jobs and folds one scraped chapter into the
//! logical graph under a per-(series, identity) distributed lock:
//! chapter + availability upserts, gap detection, feed entry, activity
//! events, notification collapse, and fan-out.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use sqlx::PgPool;
use tracing::{debug, info, warn};
use uuid::Uuid;

use mangatrack_core::jobs::{
    fanout_job_id, gap_recovery_job_id, notify_job_id, FanoutJob, IngestJob, NotifyJob, SyncJob,
    QUEUE_CHECK, QUEUE_FANOUT, QUEUE_NOTIFY,
};
use mangatrack_core::{ActivityEventType, CrawlReason};
use mangatrack_kvs::{DistLock, Kvs};
use mangatrack_queue::{Job, JobError, JobHandler, JobOptions, JobPriority, QueueManager};
use mangatrack_store::activity::{ActivityStore, NewActivityEvent};
use mangatrack_store::chapters::{ChapterSourceStore, ChapterStore, NewChapter, NewChapterSource};
use mangatrack_store::feed::{FeedSource, FeedStore};
use mangatrack_store::series::SeriesStore;
use mangatrack_store::series_sources::SeriesSourceStore;
use mangatrack_store::StoreError;

use crate::normalize::{identity_key, missing_previous_integer, normalize_label};

const LOCK_TTL: Duration = Duration::from_secs(30);
const LOCK_WAIT: Duration = Duration::from_secs(10);
const GAP_RECOVERY_DELAY_MS: u64 = 60_000;
const NOTIFY_DELAY_NORMAL_MS: u64 = 10 * 60 * 1000;
const NOTIFY_DELAY_RECOVERY_MS: u64 = 60_000;
const HOT_RECHECK_MINUTES: i64 = 15;

pub struct ChapterIngestor {
    pool: PgPool,
    kvs: Arc<dyn Kvs>,
    queues: Arc<QueueManager>,
}

impl ChapterIngestor {
    pub fn new(pool: PgPool, kvs: Arc<dyn Kvs>, queues: Arc<QueueManager>) -> Self {
        Self { pool, kvs, queues }
    }

    async fn ingest(&self, job: &IngestJob) -> Result<(), JobError> {
        let normalized = normalize_label(
            &job.chapter.number_label,
            job.chapter.title.as_deref(),
        );
        let identity = identity_key(normalized.number);

        // Serialize all work on this logical chapter.
        let lock_key = format!("ingest:lock:{}:{}", job.series_id, identity);
        let lock = DistLock::acquire_wait(self.kvs.clone(), &lock_key, LOCK_TTL, LOCK_WAIT)
            .await
            .map_err(|e| JobError::transient(format!("lock kvs error: {}", e)))?
            .ok_or_else(|| JobError::transient(format!("ingest lock busy: {}", lock_key)))?;

        let result = self.ingest_locked(job, &identity, normalized.number, &normalized.slug).await;

        if let Err(e) = lock.release().await {
            warn!(key = %lock_key, error = %e, "failed to release ingest lock");
        }
        result
    }

    async fn ingest_locked(
        &self,
        job: &IngestJob,
        identity: &str,
        number: Option<f64>,
        slug: &str,
    ) -> Result<(), JobError> {
        let now = Utc::now();
        let detected_at = self.resolve_detected_at(job, number, now).await?;

        // 1. Logical chapter.
        let chapter = ChapterStore::upsert(
            &self.pool,
            NewChapter {
                series_id: job.series_id,
                chapter_number: identity.to_string(),
                number_value: number,
                chapter_slug: slug.to_string(),
                chapter_title: job.chapter.title.clone(),
                published_at: job.chapter.published_at,
                first_detected_at: detected_at,
            },
        )
        .await
        .map_err(store_err)?;

        if chapter.created {
            ActivityStore::record(
                &self.pool,
                NewActivityEvent {
                    series_id: job.series_id,
                    chapter_id: Some(chapter.row.id),
                    user_id: None,
                    source_name: Some(job.source_name.as_str().to_string()),
                    event_type: ActivityEventType::ChapterDetected,
                },
            )
            .await
            .map_err(store_err)?;
        }

        // 2. Gap detection (skipped while recovering, or we'd loop).
        if !job.recovery {
            if let Some(number) = number {
                self.maybe_schedule_gap_recovery(job, number).await?;
            }
        }

        // 3. Availability record.
        let availability = ChapterSourceStore::upsert(
            &self.pool,
            NewChapterSource {
                chapter_id: chapter.row.id,
                series_source_id: job.series_source_id,
                source_name: job.source_name.as_str().to_string(),
                source_chapter_url: job.chapter.url.clone(),
                source_chapter_id: job.chapter.source_chapter_id.clone(),
                source_published_at: job.chapter.published_at,
                detected_at,
            },
        )
        .await
        .map_err(store_err)?;

        if availability.created {
            SeriesSourceStore::bump_hot(
                &self.pool,
                job.series_source_id,
                now + ChronoDuration::minutes(HOT_RECHECK_MINUTES),
            )
            .await
            .map_err(store_err)?;
            ActivityStore::record(
                &self.pool,
                NewActivityEvent {
                    series_id: job.series_id,
                    chapter_id: Some(chapter.row.id),
                    user_id: None,
                    source_name: Some(job.source_name.as_str().to_string()),
                    event_type: ActivityEventType::ChapterSourceAdded,
                },
            )
            .await
            .map_err(store_err)?;
        }

        // 4. Series freshness (monotonic).
        if let Some(published_at) = job.chapter.published_at {
            SeriesStore::bump_last_chapter_at(&self.pool, job.series_id, published_at)
                .await
                .map_err(store_err)?;
        }

        // 5. Feed entry.
        let feed = FeedStore::upsert(
            &self.pool,
            job.series_id,
            identity,
            chapter.row.id,
            FeedSource {
                name: job.source_name.as_str().to_string(),
                url: job.chapter.url.clone(),
                discovered_at: detected_at,
            },
            detected_at,
        )
        .await
        .map_err(store_err)?;

        // 6. Downstream effects only when the feed actually changed.
        if feed.created || feed.source_appended {
            self.enqueue_notification(job, chapter.row.id, identity).await?;
            self.enqueue_fanout(job, chapter.row.id, identity).await?;
        }

        info!(
            series_id = %job.series_id,
            chapter = identity,
            source = %job.source_name,
            chapter_created = chapter.created,
            source_added = availability.created,
            recovery = job.recovery,
            "chapter ingested"
        );
        Ok(())
    }

    /// Normally `now`; under gap recovery, 1ms before the next chapter's
    /// detection time so feed ordering stays monotonic.
    async fn resolve_detected_at(
        &self,
        job: &IngestJob,
        number: Option<f64>,
        now: DateTime<Utc>,
    ) -> Result<DateTime<Utc>, JobError> {
        if !job.recovery {
            return Ok(now);
        }
        let Some(number) = number else {
            return Ok(now);
        };
        let next = ChapterStore::next_detected_after(&self.pool, job.series_id, number)
            .await
            .map_err(store_err)?;
        Ok(match next {
            Some(next_detected) => next_detected - ChronoDuration::milliseconds(1),
            None => now,
        })
    }

    async fn maybe_schedule_gap_recovery(
        &self,
        job: &IngestJob,
        number: f64,
    ) -> Result<(), JobError> {
        let Some(prev) = missing_previous_integer(number) else {
            return Ok(());
        };
        let exists = ChapterStore::exists_number(&self.pool, job.series_id, prev as f64)
            .await
            .map_err(store_err)?;
        if exists {
            return Ok(());
        }

        let payload = SyncJob {
            series_source_id: job.series_source_id,
            reason: CrawlReason::GapRecovery,
            target_chapters: Some(vec![prev.to_string()]),
        };
        let enqueued = self
            .queues
            .add(
                QUEUE_CHECK,
                "gap-recovery",
                serde_json::to_value(&payload)
                    .map_err(|e| JobError::permanent(e.to_string()))?,
                JobOptions::default()
                    .with_job_id(gap_recovery_job_id(job.series_id))
                    .with_priority(JobPriority::High)
                    .with_delay_ms(GAP_RECOVERY_DELAY_MS),
            )
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        if enqueued.is_some() {
            debug!(
                series_id = %job.series_id,
                missing = prev,
                "gap detected — recovery scheduled"
            );
        }
        Ok(())
    }

    async fn enqueue_notification(
        &self,
        job: &IngestJob,
        chapter_id: Uuid,
        identity: &str,
    ) -> Result<(), JobError> {
        let delay = if job.recovery { NOTIFY_DELAY_RECOVERY_MS } else { NOTIFY_DELAY_NORMAL_MS };
        let payload = NotifyJob {
            series_id: job.series_id,
            chapter_id,
            chapter_number: identity.to_string(),
        };
        // One collapsed notification per series: bursts within the delay
        // window dedup on the jobId.
        self.queues
            .add(
                QUEUE_NOTIFY,
                "chapter-notify",
                serde_json::to_value(&payload)
                    .map_err(|e| JobError::permanent(e.to_string()))?,
                JobOptions::default()
                    .with_job_id(notify_job_id(job.series_id))
                    .with_delay_ms(delay),
            )
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        Ok(())
    }

    async fn enqueue_fanout(
        &self,
        job: &IngestJob,
        chapter_id: Uuid,
        identity: &str,
    ) -> Result<(), JobError> {
        let payload = FanoutJob {
            series_id: job.series_id,
            series_source_id: job.series_source_id,
            chapter_id,
            chapter_number: identity.to_string(),
        };
        self.queues
            .add(
                QUEUE_FANOUT,
                "feed-fanout",
                serde_json::to_value(&payload)
                    .map_err(|e| JobError::permanent(e.to_string()))?,
                JobOptions::default().with_job_id(fanout_job_id(job.series_source_id, chapter_id)),
            )
            .await
            .map_err(|e| JobError::transient(e.to_string()))?;
        Ok(())
    }
}

fn store_err(e: StoreError) -> JobError {
    match e {
        // A vanished row will not come back; retrying cannot help.
        StoreError::NotFound(_) | StoreError::Invalid { .. } => JobError::permanent(e.to_string()),
        StoreError::Duplicate(_) | StoreError::Database(_) => JobError::transient(e.to_string()),
    }
}

#[async_trait]
impl JobHandler for ChapterIngestor {
    async fn handle(&self, job: &Job) -> Result<(), JobError> {
        let payload: IngestJob = job
            .payload_as()
            .map_err(|e| JobError::permanent(format!("bad ingest payload: {}", e)))?;
        self.ingest(&payload).await
    }
}
