//! In-memory [`Kvs`] implementation.
//!
//! Single-process, mutex-guarded maps with lazy TTL expiry. Used by tests
//! and as the local fallback store when Redis is unreachable. Semantics
//! mirror the Redis implementation closely enough that the queue manager,
//! rate limiter, and locks behave identically under test.

use std::collections::{HashMap, HashSet};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use async_trait::async_trait;

use crate::backend::Kvs;
use crate::{KvsError, KvsResult};

#[derive(Default)]
struct Inner {
    strings: HashMap<String, StringEntry>,
    hashes: HashMap<String, HashMap<String, String>>,
    zsets: HashMap<String, HashMap<String, f64>>,
    sets: HashMap<String, HashSet<String>>,
}

struct StringEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl StringEntry {
    fn live(&self) -> bool {
        self.expires_at.map(|t| t > Instant::now()).unwrap_or(true)
    }
}

#[derive(Default)]
pub struct MemoryKvs {
    inner: Mutex<Inner>,
}

impl MemoryKvs {
    pub fn new() -> Self {
        Self::default()
    }

    fn with<T>(&self, f: impl FnOnce(&mut Inner) -> T) -> KvsResult<T> {
        let mut inner = self
            .inner
            .lock()
            .map_err(|_| KvsError::Command("memory kvs poisoned".to_string()))?;
        Ok(f(&mut inner))
    }
}

fn live_string<'a>(inner: &'a mut Inner, key: &str) -> Option<&'a mut StringEntry> {
    // Lazy expiry: purge on access.
    if let Some(entry) = inner.strings.get(key) {
        if !entry.live() {
            inner.strings.remove(key);
            return None;
        }
    }
    inner.strings.get_mut(key)
}

#[async_trait]
impl Kvs for MemoryKvs {
    async fn get(&self, key: &str) -> KvsResult<Option<String>> {
        self.with(|inner| live_string(inner, key).map(|e| e.value.clone()))
    }

    async fn set(&self, key: &str, value: &str) -> KvsResult<()> {
        self.with(|inner| {
            inner.strings.insert(
                key.to_string(),
                StringEntry { value: value.to_string(), expires_at: None },
            );
        })
    }

    async fn set_px(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<()> {
        self.with(|inner| {
            inner.strings.insert(
                key.to_string(),
                StringEntry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
                },
            );
        })
    }

    async fn set_nx_px(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<bool> {
        self.with(|inner| {
            if live_string(inner, key).is_some() {
                return false;
            }
            inner.strings.insert(
                key.to_string(),
                StringEntry {
                    value: value.to_string(),
                    expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
                },
            );
            true
        })
    }

    async fn del(&self, key: &str) -> KvsResult<bool> {
        self.with(|inner| {
            let had_string = inner.strings.remove(key).map(|e| e.live()).unwrap_or(false);
            let had_hash = inner.hashes.remove(key).is_some();
            let had_zset = inner.zsets.remove(key).is_some();
            let had_set = inner.sets.remove(key).is_some();
            had_string || had_hash || had_zset || had_set
        })
    }

    async fn del_if_equals(&self, key: &str, value: &str) -> KvsResult<bool> {
        self.with(|inner| {
            let matches = live_string(inner, key).map(|e| e.value == value).unwrap_or(false);
            if matches {
                inner.strings.remove(key);
            }
            matches
        })
    }

    async fn pexpire_if_equals(&self, key: &str, value: &str, ttl_ms: u64) -> KvsResult<bool> {
        self.with(|inner| match live_string(inner, key) {
            Some(entry) if entry.value == value => {
                entry.expires_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
                true
            }
            _ => false,
        })
    }

    async fn incr(&self, key: &str) -> KvsResult<i64> {
        self.with(|inner| {
            let current = live_string(inner, key)
                .and_then(|e| e.value.parse::<i64>().ok())
                .unwrap_or(0);
            let next = current + 1;
            let expires_at = live_string(inner, key).and_then(|e| e.expires_at);
            inner.strings.insert(
                key.to_string(),
                StringEntry { value: next.to_string(), expires_at },
            );
            next
        })
    }

    async fn incr_px(&self, key: &str, ttl_ms: u64) -> KvsResult<i64> {
        self.with(|inner| {
            let existing = live_string(inner, key).map(|e| (e.value.clone(), e.expires_at));
            match existing {
                Some((value, expires_at)) => {
                    let next = value.parse::<i64>().unwrap_or(0) + 1;
                    inner.strings.insert(
                        key.to_string(),
                        StringEntry { value: next.to_string(), expires_at },
                    );
                    next
                }
                None => {
                    inner.strings.insert(
                        key.to_string(),
                        StringEntry {
                            value: "1".to_string(),
                            expires_at: Some(Instant::now() + Duration::from_millis(ttl_ms)),
                        },
                    );
                    1
                }
            }
        })
    }

    async fn pexpire(&self, key: &str, ttl_ms: u64) -> KvsResult<bool> {
        self.with(|inner| match live_string(inner, key) {
            Some(entry) => {
                entry.expires_at = Some(Instant::now() + Duration::from_millis(ttl_ms));
                true
            }
            None => false,
        })
    }

    async fn pttl(&self, key: &str) -> KvsResult<Option<i64>> {
        self.with(|inner| {
            live_string(inner, key).and_then(|e| e.expires_at).map(|t| {
                let now = Instant::now();
                if t > now { t.duration_since(now).as_millis() as i64 } else { 0 }
            })
        })
    }

    async fn hset(&self, key: &str, field: &str, value: &str) -> KvsResult<()> {
        self.with(|inner| {
            inner
                .hashes
                .entry(key.to_string())
                .or_default()
                .insert(field.to_string(), value.to_string());
        })
    }

    async fn hget(&self, key: &str, field: &str) -> KvsResult<Option<String>> {
        self.with(|inner| inner.hashes.get(key).and_then(|h| h.get(field).cloned()))
    }

    async fn hdel(&self, key: &str, field: &str) -> KvsResult<bool> {
        self.with(|inner| {
            inner
                .hashes
                .get_mut(key)
                .map(|h| h.remove(field).is_some())
                .unwrap_or(false)
        })
    }

    async fn hlen(&self, key: &str) -> KvsResult<u64> {
        self.with(|inner| inner.hashes.get(key).map(|h| h.len() as u64).unwrap_or(0))
    }

    async fn zadd(&self, key: &str, score: f64, member: &str) -> KvsResult<()> {
        self.with(|inner| {
            inner
                .zsets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string(), score);
        })
    }

    async fn zrem(&self, key: &str, member: &str) -> KvsResult<bool> {
        self.with(|inner| {
            inner
                .zsets
                .get_mut(key)
                .map(|z| z.remove(member).is_some())
                .unwrap_or(false)
        })
    }

    async fn zcard(&self, key: &str) -> KvsResult<u64> {
        self.with(|inner| inner.zsets.get(key).map(|z| z.len() as u64).unwrap_or(0))
    }

    async fn zpop_min(&self, key: &str) -> KvsResult<Option<(String, f64)>> {
        self.with(|inner| {
            let zset = inner.zsets.get_mut(key)?;
            let min = zset
                .iter()
                .min_by(|a, b| {
                    a.1.partial_cmp(b.1)
                        .unwrap_or(std::cmp::Ordering::Equal)
                        .then_with(|| a.0.cmp(b.0))
                })
                .map(|(m, s)| (m.clone(), *s));
            if let Some((member, _)) = &min {
                zset.remove(member);
            }
            min
        })
    }

    async fn zrangebyscore_below(
        &self,
        key: &str,
        max_score: f64,
        limit: usize,
    ) -> KvsResult<Vec<String>> {
        self.with(|inner| {
            let Some(zset) = inner.zsets.get(key) else {
                return Vec::new();
            };
            let mut members: Vec<(&String, &f64)> =
                zset.iter().filter(|(_, s)| **s <= max_score).collect();
            members.sort_by(|a, b| {
                a.1.partial_cmp(b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then_with(|| a.0.cmp(b.0))
            });
            members.into_iter().take(limit).map(|(m, _)| m.clone()).collect()
        })
    }

    async fn sadd(&self, key: &str, member: &str) -> KvsResult<bool> {
        self.with(|inner| {
            inner
                .sets
                .entry(key.to_string())
                .or_default()
                .insert(member.to_string())
        })
    }

    async fn srem(&self, key: &str, member: &str) -> KvsResult<bool> {
        self.with(|inner| inner.sets.get_mut(key).map(|s| s.remove(member)).unwrap_or(false))
    }

    async fn sismember(&self, key: &str, member: &str) -> KvsResult<bool> {
        self.with(|inner| inner.sets.get(key).map(|s| s.contains(member)).unwrap_or(false))
    }

    async fn scard(&self, key: &str) -> KvsResult<u64> {
        self.with(|inner| inner.sets.get(key).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn keys_with_prefix(&self, prefix: &str) -> KvsResult<Vec<String>> {
        self.with(|inner| {
            let mut out: Vec<String> = Vec::new();
            out.extend(
                inner
                    .strings
                    .iter()
                    .filter(|(k, e)| k.starts_with(prefix) && e.live())
                    .map(|(k, _)| k.clone()),
            );
            for map_keys in [
                inner.hashes.keys().collect::<Vec<_>>(),
                inner.zsets.keys().collect::<Vec<_>>(),
                inner.sets.keys().collect::<Vec<_>>(),
            ] {
                out.extend(map_keys.into_iter().filter(|k| k.starts_with(prefix)).cloned());
            }
            out.sort();
            out.dedup();
            out
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_set_nx_respects_existing() {
        let kvs = MemoryKvs::new();
        assert!(kvs.set_nx_px("lock", "a", 10_000).await.unwrap());
        assert!(!kvs.set_nx_px("lock", "b", 10_000).await.unwrap());
        assert_eq!(kvs.get("lock").await.unwrap().as_deref(), Some("a"));
    }

    #[tokio::test]
    async fn test_ttl_expiry() {
        let kvs = MemoryKvs::new();
        kvs.set_px("k", "v", 20).await.unwrap();
        assert!(kvs.get("k").await.unwrap().is_some());
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(kvs.get("k").await.unwrap().is_none());
        // Expired key no longer blocks NX.
        assert!(kvs.set_nx_px("k", "v2", 1000).await.unwrap());
    }

    #[tokio::test]
    async fn test_del_if_equals() {
        let kvs = MemoryKvs::new();
        kvs.set("k", "token-1").await.unwrap();
        assert!(!kvs.del_if_equals("k", "token-2").await.unwrap());
        assert!(kvs.del_if_equals("k", "token-1").await.unwrap());
        assert!(kvs.get("k").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_incr_px_sets_ttl_once() {
        let kvs = MemoryKvs::new();
        assert_eq!(kvs.incr_px("c", 10_000).await.unwrap(), 1);
        assert_eq!(kvs.incr_px("c", 10_000).await.unwrap(), 2);
        assert!(kvs.pttl("c").await.unwrap().unwrap() > 0);
    }

    #[tokio::test]
    async fn test_zpop_min_orders_by_score() {
        let kvs = MemoryKvs::new();
        kvs.zadd("z", 30.0, "late").await.unwrap();
        kvs.zadd("z", 10.0, "early").await.unwrap();
        kvs.zadd("z", 20.0, "mid").await.unwrap();
        assert_eq!(kvs.zpop_min("z").await.unwrap().unwrap().0, "early");
        assert_eq!(kvs.zpop_min("z").await.unwrap().unwrap().0, "mid");
        assert_eq!(kvs.zpop_min("z").await.unwrap().unwrap().0, "late");
        assert!(kvs.zpop_min("z").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_zrangebyscore_below() {
        let kvs = MemoryKvs::new();
        kvs.zadd("z", 100.0, "a").await.unwrap();
        kvs.zadd("z", 200.0, "b").await.unwrap();
        kvs.zadd("z", 300.0, "c").await.unwrap();
        let due = kvs.zrangebyscore_below("z", 250.0, 10).await.unwrap();
        assert_eq!(due, vec!["a".to_string(), "b".to_string()]);
    }

    #[tokio::test]
    async fn test_sadd_dedup() {
        let kvs = MemoryKvs::new();
        assert!(kvs.sadd("s", "m").await.unwrap());
        assert!(!kvs.sadd("s", "m").await.unwrap());
        assert!(kvs.sismember("s", "m").await.unwrap());
        assert_eq!(kvs.scard("s").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_keys_with_prefix() {
        let kvs = MemoryKvs::new();
        kvs.set("feed:v:1", "3").await.unwrap();
        kvs.set("feed:v:2", "1").await.unwrap();
        kvs.set("other", "x").await.unwrap();
        let keys = kvs.keys_with_prefix("feed:v:").await.unwrap();
        assert_eq!(keys.len(), 2);
    }
}
