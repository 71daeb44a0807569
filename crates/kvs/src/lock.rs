//! Distributed locks over the KVS.
//!
//! `SET key token PX ttl NX` to acquire; release and renewal are
//! compare-and-swap on the token so a lock that expired and was re-acquired
//! elsewhere can never be released or extended by the old owner.

use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use uuid::Uuid;

use crate::backend::Kvs;
use crate::KvsResult;

pub struct DistLock {
    kvs: Arc<dyn Kvs>,
    key: String,
    token: String,
    ttl_ms: u64,
}

impl DistLock {
    /// Try to acquire the lock once. Returns `None` when it is held elsewhere.
    pub async fn acquire(kvs: Arc<dyn Kvs>, key: &str, ttl: Duration) -> KvsResult<Option<Self>> {
        let token = Uuid::new_v4().to_string();
        let ttl_ms = ttl.as_millis() as u64;
        if kvs.set_nx_px(key, &token, ttl_ms).await? {
            Ok(Some(Self { kvs, key: key.to_string(), token, ttl_ms }))
        } else {
            Ok(None)
        }
    }

    /// Acquire with a bounded wait, polling with jittered sleeps.
    ///
    /// Used by the ingest worker for its per-(series, chapter) lock, where
    /// contention is short-lived and losing means another worker is already
    /// applying the same chapter.
    pub async fn acquire_wait(
        kvs: Arc<dyn Kvs>,
        key: &str,
        ttl: Duration,
        wait: Duration,
    ) -> KvsResult<Option<Self>> {
        let deadline = tokio::time::Instant::now() + wait;
        loop {
            if let Some(lock) = Self::acquire(kvs.clone(), key, ttl).await? {
                return Ok(Some(lock));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            let jitter_ms = rand::thread_rng().gen_range(20..80);
            tokio::time::sleep(Duration::from_millis(jitter_ms)).await;
        }
    }

    /// Extend the TTL. Returns false when the lock is no longer ours.
    pub async fn renew(&self) -> KvsResult<bool> {
        self.kvs.pexpire_if_equals(&self.key, &self.token, self.ttl_ms).await
    }

    /// Release the lock. Returns false when the lock had already moved on.
    pub async fn release(self) -> KvsResult<bool> {
        self.kvs.del_if_equals(&self.key, &self.token).await
    }

    pub fn key(&self) -> &str {
        &self.key
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKvs;

    fn kvs() -> Arc<dyn Kvs> {
        Arc::new(MemoryKvs::new())
    }

    #[tokio::test]
    async fn test_acquire_is_exclusive() {
        let kvs = kvs();
        let lock = DistLock::acquire(kvs.clone(), "workers:global", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(lock.is_some());
        let second = DistLock::acquire(kvs.clone(), "workers:global", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn test_release_frees_lock() {
        let kvs = kvs();
        let lock = DistLock::acquire(kvs.clone(), "l", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        assert!(lock.release().await.unwrap());
        assert!(DistLock::acquire(kvs, "l", Duration::from_secs(60))
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_renew_fails_after_takeover() {
        let kvs = kvs();
        let lock = DistLock::acquire(kvs.clone(), "l", Duration::from_millis(30))
            .await
            .unwrap()
            .unwrap();
        tokio::time::sleep(Duration::from_millis(60)).await;
        // Lock expired; someone else takes it.
        let taken = DistLock::acquire(kvs.clone(), "l", Duration::from_secs(60))
            .await
            .unwrap();
        assert!(taken.is_some());
        assert!(!lock.renew().await.unwrap());
        assert!(!lock.release().await.unwrap());
    }

    #[tokio::test]
    async fn test_acquire_wait_times_out() {
        let kvs = kvs();
        let _held = DistLock::acquire(kvs.clone(), "l", Duration::from_secs(60))
            .await
            .unwrap()
            .unwrap();
        let attempt = DistLock::acquire_wait(
            kvs,
            "l",
            Duration::from_secs(60),
            Duration::from_millis(120),
        )
        .await
        .unwrap();
        assert!(attempt.is_none());
    }
}
