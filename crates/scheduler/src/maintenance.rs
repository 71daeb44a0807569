//! Sub-scheduler tasks run from the master tick: sync-priority
//! maintenance, trust decay, the chapters_read reconciler, and the
//! latest-updates sweep.

use std::str::FromStr;
use std::sync::Arc;

use sqlx::PgPool;
use tracing::{debug, info};

use mangatrack_core::config::{CrawlConfig, LimitsConfig};
use mangatrack_core::jobs::{ingest_job_id, ChapterPayload, IngestJob, QUEUE_INGEST};
use mangatrack_core::SourceName;
use mangatrack_kvs::RateLimiter;
use mangatrack_queue::{JobOptions, QueueManager};
use mangatrack_sources::SourceRegistry;
use mangatrack_store::series_sources::SeriesSourceStore;
use mangatrack_store::users::UserStore;
use mangatrack_store::StoreResult;

use mangatrack_ingest::normalize::{identity_key, normalize_label};

/// §a of the master tick: promote/demote sync priorities.
pub async fn run_priority_maintenance(pool: &PgPool, crawl: &CrawlConfig) -> StoreResult<()> {
    let promoted =
        SeriesSourceStore::promote_popular_to_hot(pool, crawl.priority_boost_follows).await?;
    let demoted_hot =
        SeriesSourceStore::demote_stale_hot(pool, crawl.priority_boost_follows).await?;
    let demoted_warm = SeriesSourceStore::demote_stale_warm(pool).await?;
    if promoted + demoted_hot + demoted_warm > 0 {
        info!(promoted, demoted_hot, demoted_warm, "sync priorities maintained");
    }
    Ok(())
}

/// Restore a little trust to users with a quiet week.
pub async fn run_trust_decay(pool: &PgPool, limits: &LimitsConfig) -> StoreResult<()> {
    let restored = UserStore::restore_trust(pool, limits.trust_decay_daily, 7).await?;
    if restored > 0 {
        debug!(users = restored, "trust restored");
    }
    Ok(())
}

/// Rewrite drifting `chapters_read` counters from the derived count.
pub async fn run_chapters_read_reconciler(pool: &PgPool) -> StoreResult<()> {
    let corrected = UserStore::reconcile_chapters_read(pool, 500).await?;
    if corrected > 0 {
        info!(users = corrected, "chapters_read reconciled");
    }
    Ok(())
}

/// Safety monitor: log queue depths and flag runaway backlogs so the
/// backpressure path in the poll worker has a paper trail.
pub async fn run_safety_monitor(
    queues: &Arc<QueueManager>,
    ingest_backlog_critical: u64,
) -> Result<(), mangatrack_queue::QueueError> {
    let mut depths = Vec::new();
    for queue in [
        mangatrack_core::jobs::QUEUE_SYNC,
        mangatrack_core::jobs::QUEUE_CHECK,
        QUEUE_INGEST,
        mangatrack_core::jobs::QUEUE_FANOUT,
        mangatrack_core::jobs::QUEUE_NOTIFY,
        mangatrack_core::jobs::QUEUE_SEARCH,
    ] {
        let counts = queues.counts(queue).await?;
        if counts.backlog() > 0 {
            depths.push(format!("{}={}", queue, counts.backlog()));
        }
        if queue == QUEUE_INGEST && counts.backlog() > ingest_backlog_critical {
            tracing::warn!(
                backlog = counts.backlog(),
                threshold = ingest_backlog_critical,
                "ingest backlog above critical threshold"
            );
        }
    }
    if !depths.is_empty() {
        debug!(depths = %depths.join(" "), "queue depths");
    }
    Ok(())
}

/// Latest-feed sweep: pull each implemented source's cross-series recent
/// updates and enqueue ingest jobs for the series we already track.
pub async fn run_latest_sweep(
    pool: &PgPool,
    queues: &Arc<QueueManager>,
    registry: &Arc<SourceRegistry>,
    rate: &Arc<RateLimiter>,
) -> StoreResult<()> {
    let active_names = SeriesSourceStore::active_source_names(pool).await?;

    for raw_name in active_names {
        let Ok(name) = SourceName::from_str(&raw_name) else {
            continue;
        };
        let Ok(client) = registry.client(name) else {
            continue;
        };
        if registry.breaker().check(name).is_err() {
            continue;
        }
        if !rate.try_acquire(name.as_str()).await {
            continue;
        }

        let updates = match client.scrape_latest().await {
            Ok(updates) => {
                registry.breaker().record_success(name);
                updates
            }
            Err(e) => {
                registry.breaker().record_failure(name);
                debug!(source = %name, error = %e, "latest sweep failed");
                continue;
            }
        };

        let mut enqueued = 0usize;
        for update in updates {
            let Some(source) =
                SeriesSourceStore::find_by_origin(pool, name, &update.source_series_id).await?
            else {
                continue; // not a tracked series
            };
            let normalized =
                normalize_label(&update.chapter.number_label, update.chapter.title.as_deref());
            let identity = identity_key(normalized.number);
            let payload = IngestJob {
                series_id: source.series_id,
                series_source_id: source.id,
                source_name: name,
                chapter: ChapterPayload {
                    number_label: update.chapter.number_label.clone(),
                    title: update.chapter.title.clone(),
                    url: update.chapter.url.clone(),
                    source_chapter_id: update.chapter.source_chapter_id.clone(),
                    published_at: update.chapter.published_at,
                },
                recovery: false,
            };
            let added = queues
                .add(
                    QUEUE_INGEST,
                    "ingest",
                    serde_json::to_value(&payload).unwrap_or_default(),
                    JobOptions::default().with_job_id(ingest_job_id(source.id, &identity)),
                )
                .await
                .unwrap_or(None);
            if added.is_some() {
                enqueued += 1;
            }
        }
        if enqueued > 0 {
            info!(source = %name, enqueued, "latest sweep enqueued fresh chapters");
        }
    }
    Ok(())
}
