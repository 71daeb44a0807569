//! Search storm control.
//!
//! An intent-collapse window guarantees at most one external discovery
//! search per normalized query per cooldown window, and a weighted
//! deferred queue keeps discovery traffic fair between user classes when
//! the external queue is congested.

use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracing::{debug, info};

use mangatrack_core::config::LimitsConfig;
use mangatrack_core::jobs::{SearchJob, QUEUE_SEARCH};
use mangatrack_kvs::Kvs;
use mangatrack_queue::{JobOptions, JobPriority, QueueManager};
use mangatrack_store::query_stats::QueryStatsStore;
use mangatrack_store::StoreError;

const DEFERRED_PRIORITY_KEY: &str = "search:deferred:priority";
const DEFERRED_STANDARD_KEY: &str = "search:deferred:standard";

/// Fair-share split when draining deferred searches.
const PRIORITY_SHARE_PERCENT: usize = 70;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UserClass {
    Premium,
    LoggedIn,
    Free,
}

impl UserClass {
    /// Deferred-processing weight added to the ready time.
    pub fn defer_delay_ms(&self) -> u64 {
        match self {
            UserClass::Premium => 0,
            UserClass::LoggedIn => 2 * 60 * 1000,
            UserClass::Free => 10 * 60 * 1000,
        }
    }

    fn deferred_key(&self) -> &'static str {
        match self {
            UserClass::Premium | UserClass::LoggedIn => DEFERRED_PRIORITY_KEY,
            UserClass::Free => DEFERRED_STANDARD_KEY,
        }
    }
}

/// Collapse a raw query to its dedup key.
pub fn normalized_key(q: &str) -> String {
    q.split_whitespace().collect::<Vec<_>>().join(" ").to_lowercase()
}

/// 70/30 split of a drain budget between priority and standard queues.
pub fn fair_share(budget: usize) -> (usize, usize) {
    let priority = budget * PRIORITY_SHARE_PERCENT / 100;
    (priority, budget - priority)
}

#[derive(Debug, PartialEq, Eq)]
pub struct StormDecision {
    pub enqueued: bool,
    pub reason: &'static str,
}

pub struct SearchStormController {
    pool: PgPool,
    kvs: Arc<dyn Kvs>,
    queues: Arc<QueueManager>,
    limits: LimitsConfig,
}

impl SearchStormController {
    pub fn new(
        pool: PgPool,
        kvs: Arc<dyn Kvs>,
        queues: Arc<QueueManager>,
        limits: LimitsConfig,
    ) -> Self {
        Self { pool, kvs, queues, limits }
    }

    /// Count this search and decide whether an external discovery job may
    /// be enqueued for it right now. Denials are typed by reason; a
    /// congested queue defers the query instead of dropping it.
    pub async fn maybe_enqueue(
        &self,
        raw_query: &str,
        class: UserClass,
    ) -> Result<StormDecision, StoreError> {
        let key = normalized_key(raw_query);
        if key.is_empty() {
            return Ok(StormDecision { enqueued: false, reason: "empty_query" });
        }

        let stats = QueryStatsStore::record_search(&self.pool, &key).await?;

        // 1. Too few searches to justify an external call.
        if stats.total_searches < self.limits.storm_min_searches {
            return Ok(StormDecision { enqueued: false, reason: "below_threshold" });
        }

        // 2. Intent-collapse cooldown.
        if let Some(last) = stats.last_enqueued_at {
            let elapsed_ms = (Utc::now() - last).num_milliseconds();
            if elapsed_ms >= 0 && (elapsed_ms as u64) < self.limits.storm_cooldown_ms {
                return Ok(StormDecision { enqueued: false, reason: "cooldown" });
            }
        }

        // 3. A job for this key is already waiting or active.
        if self.queues.is_pending(QUEUE_SEARCH, &key).await.unwrap_or(false) {
            return Ok(StormDecision { enqueued: false, reason: "active_job" });
        }

        // 4. Queue congestion: defer rather than pile on.
        let counts = self.queues.counts(QUEUE_SEARCH).await.unwrap_or_default();
        if counts.waiting > self.limits.storm_queue_unhealthy {
            self.defer(&key, class).await?;
            return Ok(StormDecision { enqueued: false, reason: "queue_unhealthy" });
        }

        self.enqueue(&key).await?;
        Ok(StormDecision { enqueued: true, reason: "enqueued" })
    }

    async fn enqueue(&self, key: &str) -> Result<(), StoreError> {
        let payload = SearchJob { normalized_query: key.to_string() };
        let added = self
            .queues
            .add(
                QUEUE_SEARCH,
                "external-search",
                serde_json::to_value(&payload).unwrap_or_default(),
                JobOptions::default()
                    .with_job_id(key.to_string())
                    .with_priority(JobPriority::Standard),
            )
            .await
            .unwrap_or(None);
        if added.is_some() {
            QueryStatsStore::mark_enqueued(&self.pool, key).await?;
            debug!(query = key, "external search enqueued");
        }
        Ok(())
    }

    async fn defer(&self, key: &str, class: UserClass) -> Result<(), StoreError> {
        let ready_at = Utc::now().timestamp_millis() as f64 + class.defer_delay_ms() as f64;
        if self.kvs.zadd(class.deferred_key(), ready_at, key).await.is_ok() {
            QueryStatsStore::mark_deferred(&self.pool, key).await?;
            debug!(query = key, class = ?class, "search deferred");
        }
        Ok(())
    }

    /// Scheduler sub-task: drain due deferred searches with the 70/30
    /// fair share, re-running each through the normal admission path.
    pub async fn drain_deferred(&self, budget: usize) -> Result<usize, StoreError> {
        let now_ms = Utc::now().timestamp_millis() as f64;
        let (priority_quota, standard_quota) = fair_share(budget);
        let mut drained = 0usize;

        for (zset, quota) in [
            (DEFERRED_PRIORITY_KEY, priority_quota),
            (DEFERRED_STANDARD_KEY, standard_quota),
        ] {
            let due = self
                .kvs
                .zrangebyscore_below(zset, now_ms, quota)
                .await
                .unwrap_or_default();
            for key in due {
                if !self.kvs.zrem(zset, &key).await.unwrap_or(false) {
                    continue;
                }
                // Dedup against live jobs still applies.
                if self.queues.is_pending(QUEUE_SEARCH, &key).await.unwrap_or(true) {
                    continue;
                }
                self.enqueue(&key).await?;
                drained += 1;
            }
        }

        if drained > 0 {
            info!(drained, "deferred searches released");
        }
        Ok(drained)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalized_key_collapses() {
        assert_eq!(normalized_key("  One   Piece "), "one piece");
        assert_eq!(normalized_key("ONE PIECE"), "one piece");
        assert_eq!(normalized_key("one\tpiece"), "one piece");
        assert_eq!(normalized_key("   "), "");
    }

    #[test]
    fn test_fair_share_split() {
        assert_eq!(fair_share(10), (7, 3));
        assert_eq!(fair_share(100), (70, 30));
        assert_eq!(fair_share(1), (0, 1));
        assert_eq!(fair_share(0), (0, 0));
    }

    #[test]
    fn test_defer_delays_by_class() {
        assert_eq!(UserClass::Premium.defer_delay_ms(), 0);
        assert_eq!(UserClass::LoggedIn.defer_delay_ms(), 120_000);
        assert_eq!(UserClass::Free.defer_delay_ms(), 600_000);
    }

    #[test]
    fn test_class_routes_to_queue() {
        assert_eq!(UserClass::Premium.deferred_key(), DEFERRED_PRIORITY_KEY);
        assert_eq!(UserClass::LoggedIn.deferred_key(), DEFERRED_PRIORITY_KEY);
        assert_eq!(UserClass::Free.deferred_key(), DEFERRED_STANDARD_KEY);
    }
}
