//! Per-source token acquisition.
//!
//! A windowed counter in the KVS: the first INCR of a window sets its TTL,
//! and a token is granted while the count stays at or under the window
//! budget. When the KVS is unreachable the limiter fails open to an
//! in-process bucket with the same window semantics, so crawling degrades
//! to best-effort limiting instead of stopping.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use rand::Rng;

use crate::backend::Kvs;

#[derive(Debug, Clone, Copy)]
pub struct RateLimitRule {
    pub max_per_window: u32,
    pub window_ms: u64,
}

impl RateLimitRule {
    pub fn per_second(max: u32) -> Self {
        Self { max_per_window: max, window_ms: 1000 }
    }
}

struct LocalWindow {
    started: Instant,
    count: u32,
}

pub struct RateLimiter {
    kvs: Arc<dyn Kvs>,
    default_rule: RateLimitRule,
    overrides: HashMap<String, RateLimitRule>,
    local: Mutex<HashMap<String, LocalWindow>>,
    /// Set once the first KVS failure is logged, so a Redis outage doesn't
    /// produce a warning per request.
    degraded_logged: AtomicBool,
}

impl RateLimiter {
    pub fn new(kvs: Arc<dyn Kvs>, default_rule: RateLimitRule) -> Self {
        Self {
            kvs,
            default_rule,
            overrides: HashMap::new(),
            local: Mutex::new(HashMap::new()),
            degraded_logged: AtomicBool::new(false),
        }
    }

    pub fn with_override(mut self, bucket: &str, rule: RateLimitRule) -> Self {
        self.overrides.insert(bucket.to_string(), rule);
        self
    }

    fn rule_for(&self, bucket: &str) -> RateLimitRule {
        self.overrides.get(bucket).copied().unwrap_or(self.default_rule)
    }

    /// Take one token from `bucket` if available right now.
    pub async fn try_acquire(&self, bucket: &str) -> bool {
        let rule = self.rule_for(bucket);
        let key = format!("rl:{}", bucket);
        match self.kvs.incr_px(&key, rule.window_ms).await {
            Ok(count) => count <= rule.max_per_window as i64,
            Err(e) => {
                if !self.degraded_logged.swap(true, Ordering::Relaxed) {
                    tracing::warn!(error = %e, "rate limiter KVS unavailable — failing open to local buckets");
                }
                self.try_acquire_local(bucket, rule)
            }
        }
    }

    fn try_acquire_local(&self, bucket: &str, rule: RateLimitRule) -> bool {
        let mut local = match self.local.lock() {
            Ok(g) => g,
            Err(_) => return true, // poisoned: fail open entirely
        };
        let window = Duration::from_millis(rule.window_ms);
        let entry = local
            .entry(bucket.to_string())
            .or_insert_with(|| LocalWindow { started: Instant::now(), count: 0 });
        if entry.started.elapsed() >= window {
            entry.started = Instant::now();
            entry.count = 0;
        }
        if entry.count < rule.max_per_window {
            entry.count += 1;
            true
        } else {
            false
        }
    }

    /// Block until a token is available or `timeout` elapses.
    /// Returns true when a token was acquired.
    pub async fn acquire(&self, bucket: &str, timeout: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            if self.try_acquire(bucket).await {
                return true;
            }
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            let rule = self.rule_for(bucket);
            let base = (rule.window_ms / 4).clamp(10, 250);
            let jitter = rand::thread_rng().gen_range(0..=base / 2);
            tokio::time::sleep(Duration::from_millis(base + jitter)).await;
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{KvsError, KvsResult, MemoryKvs};
    use async_trait::async_trait;

    #[tokio::test]
    async fn test_window_budget() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryKvs::new()),
            RateLimitRule { max_per_window: 3, window_ms: 60_000 },
        );
        assert!(limiter.try_acquire("mangadex").await);
        assert!(limiter.try_acquire("mangadex").await);
        assert!(limiter.try_acquire("mangadex").await);
        assert!(!limiter.try_acquire("mangadex").await);
        // Separate bucket is unaffected.
        assert!(limiter.try_acquire("comick").await);
    }

    #[tokio::test]
    async fn test_window_reset() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryKvs::new()),
            RateLimitRule { max_per_window: 1, window_ms: 30 },
        );
        assert!(limiter.try_acquire("s").await);
        assert!(!limiter.try_acquire("s").await);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(limiter.try_acquire("s").await);
    }

    #[tokio::test]
    async fn test_acquire_waits_for_token() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryKvs::new()),
            RateLimitRule { max_per_window: 1, window_ms: 40 },
        );
        assert!(limiter.try_acquire("s").await);
        // Next token only appears after the window rolls.
        assert!(limiter.acquire("s", Duration::from_millis(500)).await);
    }

    #[tokio::test]
    async fn test_acquire_timeout() {
        let limiter = RateLimiter::new(
            Arc::new(MemoryKvs::new()),
            RateLimitRule { max_per_window: 1, window_ms: 60_000 },
        );
        assert!(limiter.try_acquire("s").await);
        assert!(!limiter.acquire("s", Duration::from_millis(60)).await);
    }

    /// KVS stub whose every call fails, to exercise the fail-open path.
    struct BrokenKvs;

    #[async_trait]
    impl Kvs for BrokenKvs {
        async fn get(&self, _: &str) -> KvsResult<Option<String>> { Err(down()) }
        async fn set(&self, _: &str, _: &str) -> KvsResult<()> { Err(down()) }
        async fn set_px(&self, _: &str, _: &str, _: u64) -> KvsResult<()> { Err(down()) }
        async fn set_nx_px(&self, _: &str, _: &str, _: u64) -> KvsResult<bool> { Err(down()) }
        async fn del(&self, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn del_if_equals(&self, _: &str, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn pexpire_if_equals(&self, _: &str, _: &str, _: u64) -> KvsResult<bool> { Err(down()) }
        async fn incr(&self, _: &str) -> KvsResult<i64> { Err(down()) }
        async fn incr_px(&self, _: &str, _: u64) -> KvsResult<i64> { Err(down()) }
        async fn pexpire(&self, _: &str, _: u64) -> KvsResult<bool> { Err(down()) }
        async fn pttl(&self, _: &str) -> KvsResult<Option<i64>> { Err(down()) }
        async fn hset(&self, _: &str, _: &str, _: &str) -> KvsResult<()> { Err(down()) }
        async fn hget(&self, _: &str, _: &str) -> KvsResult<Option<String>> { Err(down()) }
        async fn hdel(&self, _: &str, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn hlen(&self, _: &str) -> KvsResult<u64> { Err(down()) }
        async fn zadd(&self, _: &str, _: f64, _: &str) -> KvsResult<()> { Err(down()) }
        async fn zrem(&self, _: &str, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn zcard(&self, _: &str) -> KvsResult<u64> { Err(down()) }
        async fn zpop_min(&self, _: &str) -> KvsResult<Option<(String, f64)>> { Err(down()) }
        async fn zrangebyscore_below(&self, _: &str, _: f64, _: usize) -> KvsResult<Vec<String>> { Err(down()) }
        async fn sadd(&self, _: &str, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn srem(&self, _: &str, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn sismember(&self, _: &str, _: &str) -> KvsResult<bool> { Err(down()) }
        async fn scard(&self, _: &str) -> KvsResult<u64> { Err(down()) }
        async fn keys_with_prefix(&self, _: &str) -> KvsResult<Vec<String>> { Err(down()) }
    }

    fn down() -> KvsError {
        KvsError::Connection("down".to_string())
    }

    #[tokio::test]
    async fn test_fail_open_to_local_buckets() {
        let limiter = RateLimiter::new(
            Arc::new(BrokenKvs),
            RateLimitRule { max_per_window: 2, window_ms: 60_000 },
        );
        // Local bucket still enforces the budget.
        assert!(limiter.try_acquire("s").await);
        assert!(limiter.try_acquire("s").await);
        assert!(!limiter.try_acquire("s").await);
    }
}
