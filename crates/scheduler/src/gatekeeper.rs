//! Crawl gatekeeper: decides whether a poll for a source may be enqueued
//! right now, and at what priority.

use std::str::FromStr;
use std::sync::Arc;

use mangatrack_core::jobs::{sync_job_id, QUEUE_SYNC};
use mangatrack_core::{CatalogTier, CrawlReason, SourceName};
use mangatrack_kvs::NegativeCache;
use mangatrack_queue::{JobPriority, QueueManager};
use mangatrack_sources::CircuitBreaker;
use mangatrack_store::series_sources::DueSourceRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateDecision {
    pub allowed: bool,
    pub priority: JobPriority,
    pub denied_reason: Option<&'static str>,
}

impl GateDecision {
    fn deny(reason: &'static str) -> Self {
        Self { allowed: false, priority: JobPriority::Standard, denied_reason: Some(reason) }
    }

    fn allow(priority: JobPriority) -> Self {
        Self { allowed: true, priority, denied_reason: None }
    }
}

/// Base priority by crawl reason, boosted one step for tier-A series or
/// follower counts above the threshold.
pub fn job_priority(
    reason: CrawlReason,
    tier: CatalogTier,
    total_follows: i64,
    boost_follows: i64,
) -> JobPriority {
    let base = match reason {
        CrawlReason::UserRequest => JobPriority::Critical,
        CrawlReason::GapRecovery => JobPriority::High,
        CrawlReason::Periodic => JobPriority::Standard,
        CrawlReason::Backfill => JobPriority::Low,
    };
    if tier == CatalogTier::A || total_follows > boost_follows {
        base.boosted()
    } else {
        base
    }
}

pub struct Gatekeeper {
    queues: Arc<QueueManager>,
    breaker: Arc<CircuitBreaker>,
    negative: Arc<NegativeCache>,
    boost_follows: i64,
}

impl Gatekeeper {
    pub fn new(
        queues: Arc<QueueManager>,
        breaker: Arc<CircuitBreaker>,
        negative: Arc<NegativeCache>,
        boost_follows: i64,
    ) -> Self {
        Self { queues, breaker, negative, boost_follows }
    }

    pub async fn should_enqueue(&self, source: &DueSourceRow, reason: CrawlReason) -> GateDecision {
        // 1. A sync job for this source is already waiting or active.
        match self.queues.is_pending(QUEUE_SYNC, &sync_job_id(source.id)).await {
            Ok(true) => return GateDecision::deny("job_pending"),
            Ok(false) => {}
            Err(_) => return GateDecision::deny("queue_unavailable"),
        }

        // 2. Circuit open for the source's provider.
        if let Ok(name) = SourceName::from_str(&source.source_name) {
            if self.breaker.is_open(name) {
                return GateDecision::deny("circuit_open");
            }
        }

        // 3. Source has been coming back empty.
        if self.negative.should_skip(source.id).await.unwrap_or(false) {
            return GateDecision::deny("negative_cached");
        }

        let tier = source.catalog_tier.parse().unwrap_or(CatalogTier::C);
        GateDecision::allow(job_priority(reason, tier, source.total_follows, self.boost_follows))
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mangatrack_core::jobs::SyncJob;
    use mangatrack_kvs::MemoryKvs;
    use mangatrack_queue::JobOptions;
    use uuid::Uuid;

    fn due_source(tier: &str, follows: i64) -> DueSourceRow {
        DueSourceRow {
            id: Uuid::new_v4(),
            series_id: Uuid::new_v4(),
            source_name: "mangadex".to_string(),
            sync_priority: "warm".to_string(),
            catalog_tier: tier.to_string(),
            total_follows: follows,
        }
    }

    fn gatekeeper(kvs: Arc<MemoryKvs>) -> (Gatekeeper, Arc<QueueManager>) {
        let kvs: Arc<dyn mangatrack_kvs::Kvs> = kvs;
        let queues = Arc::new(QueueManager::new(kvs.clone()));
        let breaker = Arc::new(CircuitBreaker::default());
        let negative = Arc::new(NegativeCache::new(kvs, 3, 60_000));
        (Gatekeeper::new(queues.clone(), breaker, negative, 100), queues)
    }

    #[test]
    fn test_priority_by_reason() {
        assert_eq!(
            job_priority(CrawlReason::UserRequest, CatalogTier::B, 0, 100),
            JobPriority::Critical
        );
        assert_eq!(
            job_priority(CrawlReason::GapRecovery, CatalogTier::B, 0, 100),
            JobPriority::High
        );
        assert_eq!(
            job_priority(CrawlReason::Periodic, CatalogTier::B, 0, 100),
            JobPriority::Standard
        );
        assert_eq!(
            job_priority(CrawlReason::Backfill, CatalogTier::B, 0, 100),
            JobPriority::Low
        );
    }

    #[test]
    fn test_priority_boosts() {
        // Tier A boosts one step.
        assert_eq!(
            job_priority(CrawlReason::Periodic, CatalogTier::A, 0, 100),
            JobPriority::High
        );
        // Popular series boost one step.
        assert_eq!(
            job_priority(CrawlReason::Backfill, CatalogTier::C, 500, 100),
            JobPriority::Standard
        );
        // Critical cannot boost further.
        assert_eq!(
            job_priority(CrawlReason::UserRequest, CatalogTier::A, 500, 100),
            JobPriority::Critical
        );
    }

    #[tokio::test]
    async fn test_denies_when_job_pending() {
        let (gatekeeper, queues) = gatekeeper(Arc::new(MemoryKvs::new()));
        let source = due_source("B", 0);

        let first = gatekeeper.should_enqueue(&source, CrawlReason::Periodic).await;
        assert!(first.allowed);

        let payload = SyncJob {
            series_source_id: source.id,
            reason: CrawlReason::Periodic,
            target_chapters: None,
        };
        queues
            .add(
                QUEUE_SYNC,
                "sync",
                serde_json::to_value(&payload).unwrap(),
                JobOptions::default().with_job_id(sync_job_id(source.id)),
            )
            .await
            .unwrap();

        let second = gatekeeper.should_enqueue(&source, CrawlReason::Periodic).await;
        assert!(!second.allowed);
        assert_eq!(second.denied_reason, Some("job_pending"));
    }

    #[tokio::test]
    async fn test_denies_on_negative_cache() {
        let kvs = Arc::new(MemoryKvs::new());
        let (gatekeeper, _queues) = gatekeeper(kvs.clone());
        let source = due_source("B", 0);

        let negative = NegativeCache::new(kvs, 3, 60_000);
        for _ in 0..3 {
            negative.record_result(source.id, true).await.unwrap();
        }

        let decision = gatekeeper.should_enqueue(&source, CrawlReason::Periodic).await;
        assert!(!decision.allowed);
        assert_eq!(decision.denied_reason, Some("negative_cached"));
    }
}
