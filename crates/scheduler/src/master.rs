//! Master scheduler loop.
//!
//! Exactly one instance is active cluster-wide, enforced by the
//! `workers:global` distributed lock (TTL 60s, renewed every 30s, with a
//! stale-heartbeat takeover at 45s for crashed leaders). Each tick runs
//! priority maintenance, the isolated sub-schedulers, and sync
//! scheduling. A sub-scheduler failure never blocks the others.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sqlx::PgPool;
use tokio::sync::watch;
use tracing::{info, warn};

use mangatrack_core::config::{CrawlConfig, LimitsConfig};
use mangatrack_core::jobs::{sync_job_id, SyncJob, QUEUE_SYNC};
use mangatrack_core::{CatalogTier, CrawlReason, SyncPriority};
use mangatrack_kvs::{DistLock, Kvs, NegativeCache, RateLimiter};
use mangatrack_queue::{JobOptions, QueueManager};
use mangatrack_sources::SourceRegistry;
use mangatrack_store::cleanup::{CleanupStore, RetentionPolicy};
use mangatrack_store::series_sources::SeriesSourceStore;

use crate::gatekeeper::Gatekeeper;
use crate::intervals::poll_interval;
use crate::maintenance;
use crate::storm::SearchStormController;
use crate::tiers;

const LOCK_KEY: &str = "workers:global";
const HEARTBEAT_KEY: &str = "workers:heartbeat";
const LOCK_TTL: Duration = Duration::from_secs(60);
const RENEW_EVERY: Duration = Duration::from_secs(30);
const STALE_HEARTBEAT_MS: i64 = 45_000;
const FOLLOWER_RETRY: Duration = Duration::from_secs(15);
const DEFERRED_DRAIN_BUDGET: usize = 20;

/// Everything the scheduler needs, constructed once at process init.
pub struct SchedulerContext {
    pub pool: PgPool,
    pub kvs: Arc<dyn Kvs>,
    pub queues: Arc<QueueManager>,
    pub registry: Arc<SourceRegistry>,
    pub rate: Arc<RateLimiter>,
    pub negative: Arc<NegativeCache>,
    pub gatekeeper: Gatekeeper,
    pub storm: SearchStormController,
    pub crawl: CrawlConfig,
    pub limits: LimitsConfig,
    pub retention: RetentionPolicy,
}

/// Run until shutdown, competing for leadership and ticking while leader.
pub async fn run_master_scheduler(ctx: Arc<SchedulerContext>, mut shutdown: watch::Receiver<bool>) {
    info!(
        tick_secs = ctx.crawl.tick_seconds,
        "master scheduler started (competing for leadership)"
    );

    loop {
        if *shutdown.borrow() {
            return;
        }

        match DistLock::acquire(ctx.kvs.clone(), LOCK_KEY, LOCK_TTL).await {
            Ok(Some(lock)) => {
                info!("master scheduler became leader");
                lead(&ctx, &lock, &mut shutdown).await;
                if let Err(e) = lock.release().await {
                    warn!(error = %e, "failed to release scheduler lock");
                }
                if *shutdown.borrow() {
                    return;
                }
            }
            Ok(None) => {
                // Crashed leaders leave a stale heartbeat behind; clear the
                // lock only then.
                if heartbeat_stale(&ctx).await {
                    warn!("stale scheduler heartbeat detected — clearing lock");
                    ctx.kvs.del(LOCK_KEY).await.ok();
                    continue;
                }
                tokio::select! {
                    _ = tokio::time::sleep(FOLLOWER_RETRY) => {}
                    _ = shutdown.changed() => {}
                }
            }
            Err(e) => {
                warn!(error = %e, "scheduler lock acquisition failed");
                tokio::time::sleep(FOLLOWER_RETRY).await;
            }
        }
    }
}

async fn heartbeat_stale(ctx: &SchedulerContext) -> bool {
    match ctx.kvs.get(HEARTBEAT_KEY).await {
        Ok(Some(raw)) => raw
            .parse::<i64>()
            .map(|ts| Utc::now().timestamp_millis() - ts > STALE_HEARTBEAT_MS)
            .unwrap_or(true),
        Ok(None) => true,
        Err(_) => false,
    }
}

/// Tick while we hold the lock; returns when leadership or shutdown ends.
async fn lead(ctx: &SchedulerContext, lock: &DistLock, shutdown: &mut watch::Receiver<bool>) {
    let mut tick = tokio::time::interval(Duration::from_secs(ctx.crawl.tick_seconds));
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut renew = tokio::time::interval(RENEW_EVERY);

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                if *shutdown.borrow() {
                    return;
                }
            }
            _ = renew.tick() => {
                write_heartbeat(ctx).await;
                match lock.renew().await {
                    Ok(true) => {}
                    Ok(false) => {
                        warn!("scheduler lock lost — stepping down");
                        return;
                    }
                    Err(e) => {
                        warn!(error = %e, "scheduler lock renewal failed");
                    }
                }
            }
            _ = tick.tick() => {
                write_heartbeat(ctx).await;
                run_tick(ctx).await;
            }
        }
    }
}

async fn write_heartbeat(ctx: &SchedulerContext) {
    let now = Utc::now().timestamp_millis().to_string();
    if let Err(e) = ctx.kvs.set_px(HEARTBEAT_KEY, &now, LOCK_TTL.as_millis() as u64 * 2).await {
        warn!(error = %e, "scheduler heartbeat write failed");
    }
}

async fn run_tick(ctx: &SchedulerContext) {
    let started = std::time::Instant::now();

    // a. Priority maintenance.
    isolate("priority_maintenance", maintenance::run_priority_maintenance(&ctx.pool, &ctx.crawl))
        .await;

    // b. Sub-schedulers, each isolated.
    isolate("tier_maintenance", async {
        tiers::run_tier_maintenance(&ctx.pool).await.map(|_| ())
    })
    .await;
    isolate("trust_decay", maintenance::run_trust_decay(&ctx.pool, &ctx.limits)).await;
    isolate("chapters_read_reconciler", maintenance::run_chapters_read_reconciler(&ctx.pool))
        .await;
    isolate("latest_sweep", maintenance::run_latest_sweep(
        &ctx.pool,
        &ctx.queues,
        &ctx.registry,
        &ctx.rate,
    ))
    .await;
    isolate("deferred_search", async {
        ctx.storm.drain_deferred(DEFERRED_DRAIN_BUDGET).await.map(|_| ())
    })
    .await;
    isolate(
        "safety_monitor",
        maintenance::run_safety_monitor(&ctx.queues, ctx.crawl.ingest_backlog_critical),
    )
    .await;
    isolate("cleanup", async {
        CleanupStore::run(&ctx.pool, &ctx.retention).await.map(|_| ())
    })
    .await;

    // c. Sync scheduling.
    match schedule_due_sources(ctx).await {
        Ok((scheduled, skipped)) => {
            info!(
                scheduled,
                skipped,
                elapsed_ms = started.elapsed().as_millis() as u64,
                "scheduler tick complete"
            );
        }
        Err(e) => warn!(error = %e, "sync scheduling failed"),
    }
}

async fn isolate<E: std::fmt::Display>(
    name: &'static str,
    task: impl std::future::Future<Output = Result<(), E>>,
) {
    if let Err(e) = task.await {
        warn!(sub_scheduler = name, error = %e, "sub-scheduler failed");
    }
}

/// Select due sources, run each batch through the gatekeeper, enqueue the
/// allowed ones, and push `next_check_at` forward for everything touched.
async fn schedule_due_sources(ctx: &SchedulerContext) -> Result<(u64, u64), String> {
    let now = Utc::now();
    let due = SeriesSourceStore::find_due(&ctx.pool, now, ctx.crawl.sync_select_limit as i64)
        .await
        .map_err(|e| e.to_string())?;

    let mut scheduled = 0u64;
    let mut skipped = 0u64;

    for batch in due.chunks(ctx.crawl.sync_batch_size as usize) {
        for source in batch {
            let decision = ctx.gatekeeper.should_enqueue(source, CrawlReason::Periodic).await;
            if decision.allowed {
                let payload = SyncJob {
                    series_source_id: source.id,
                    reason: CrawlReason::Periodic,
                    target_chapters: None,
                };
                let added = ctx
                    .queues
                    .add(
                        QUEUE_SYNC,
                        "sync",
                        serde_json::to_value(&payload).map_err(|e| e.to_string())?,
                        JobOptions::default()
                            .with_job_id(sync_job_id(source.id))
                            .with_priority(decision.priority),
                    )
                    .await
                    .map_err(|e| e.to_string())?;
                if added.is_some() {
                    scheduled += 1;
                }
            } else {
                skipped += 1;
            }

            // Denied or not, the source gets its next slot so it is not
            // re-picked every tick.
            let tier: CatalogTier = source.catalog_tier.parse().unwrap_or(CatalogTier::C);
            let priority: SyncPriority = source.sync_priority.parse().unwrap_or(SyncPriority::Warm);
            let next = now + poll_interval(tier, priority);
            SeriesSourceStore::set_next_check(&ctx.pool, source.id, next)
                .await
                .map_err(|e| e.to_string())?;
        }
    }

    Ok((scheduled, skipped))
}
