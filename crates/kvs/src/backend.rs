//! The KVS capability trait.
//!
//! Keys passed to these methods are logical keys; implementations prepend
//! the configured environment namespace (`<env>:`) before touching the
//! store, and strip it again from scan results.

use async_trait::async_trait;

use crate::KvsResult;

/// Capability interface over the key-value backplane.
///
/// Only the operations the platform actually needs are exposed. Sorted-set
/// pops are split into the atomic [`zpop_min`] (ready queues) and the
/// two-step [`zrangebyscore_below`] + [`zrem`] (delayed-job promotion,
/// where the `zrem` return value decides the winner under contention).
#[async_trait]
pub trait Kvs: Send + Sync {
    // ── Strings ──────────────────────────────────────────────────────

    async fn get(&self, key: &str) -> KvsResult<Option<String>>;

    async fn set(&self, key: &str, value: &str) -> KvsResult<()>;

    /// SET with a millisecond TTL.
    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<()>;

    /// SET NX PX — returns true when the key was created.
    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<bool>;

    async fn del(&self, key: &str) -> KvsResult<bool>;

    /// Compare-and-delete: delete only if the current value equals `value`.
    /// Backed by a Lua script on Redis; atomic in memory.
    async fn del_if_equals(&self, key: &str, value: &str) -> KvsResult<bool>;

    /// Compare-and-extend: refresh the TTL only if the current value equals
    /// `value`. Used by lock renewal.
    async fn pexpire_if_equals(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<bool>;

    async fn incr(&self, key: &str) -> KvsResult<i64>;

    /// INCR that applies `ttl_ms` when the counter is first created.
    async fn incr_px(&self, key: &str, ttl_ms: u64) -> KvsResult<i64>;

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> KvsResult<bool>;

    /// Remaining TTL in ms; `None` when the key is missing or has no TTL.
    async fn pttl(&self, key: &str) -> KvsResult<Option<i64>>;

    // ── Hashes ───────────────────────────────────────────────────────

    async fn hset(&self, key: &str, field: &str, value: &str) -> KvsResult<()>;

    async fn hget(&self, key: &str, field: &str) -> KvsResult<Option<String>>;

    async fn hdel(&self, key: &str, field: &str) -> KvsResult<bool>;

    async fn hlen(&self, key: &str) -> KvsResult<u64>;

    // ── Sorted sets ──────────────────────────────────────────────────

    async fn zadd(&self, key: &str, score: f64, member: &str) -> KvsResult<()>;

    async fn zrem(&self, key: &str, member: &str) -> KvsResult<bool>;

    async fn zcard(&self, key: &str) -> KvsResult<u64>;

    /// Atomically pop the lowest-scored member.
    async fn zpop_min(&self, key: &str) -> KvsResult<Option<(String, f64)>>;

    /// Members with score ≤ `max_score`, lowest first, up to `limit`.
    async fn zrangebyscore_below(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> KvsResult<Vec<String>>;

    // ── Sets ─────────────────────────────────────────────────────────

    async fn sadd(&self, key: &str, member: &str) -> KvsResult<bool>;

    async fn srem(&self, key: &str, member: &str) -> KvsResult<bool>;

    async fn sismember(&self, key: &str, member: &str) -> KvsResult<bool>;

    async fn scard(&self, key: &str) -> KvsResult<u64>;

    // ── Scans ────────────────────────────────────────────────────────

    /// All logical keys starting with `prefix`. Cleanup paths only.
    async fn keys_with_prefix(&self, prefix: &str) -> KvsResult<Vec<String>>;
}
