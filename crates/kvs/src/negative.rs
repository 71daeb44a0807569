//! Negative-result cache.
//!
//! Sources that keep coming back empty get skipped by the scheduler until
//! the rolling window lapses or the source produces chapters again.

use std::sync::Arc;
use uuid::Uuid;

use crate::backend::Kvs;
use crate::KvsResult;

pub struct NegativeCache {
    kvs: Arc<dyn Kvs>,
    threshold: u32,
    window_ms: u64,
}

impl NegativeCache {
    pub fn new(kvs: Arc<dyn Kvs>, threshold: u32, window_ms: u64) -> Self {
        Self { kvs, threshold, window_ms }
    }

    fn key(series_source_id: Uuid) -> String {
        format!("neg:{}", series_source_id)
    }

    /// Record a poll result. Empty polls bump the counter with a rolling
    /// TTL; a non-empty poll clears it.
    pub async fn record_result(&self, series_source_id: Uuid, empty: bool) -> KvsResult<()> {
        let key = Self::key(series_source_id);
        if empty {
            self.kvs.incr_px(&key, self.window_ms).await?;
            // Rolling window: every empty result pushes expiry out again.
            self.kvs.pexpire(&key, self.window_ms).await?;
        } else {
            self.kvs.del(&key).await?;
        }
        Ok(())
    }

    /// Whether the scheduler should skip this source for now.
    pub async fn should_skip(&self, series_source_id: Uuid) -> KvsResult<bool> {
        let count = self
            .kvs
            .get(&Self::key(series_source_id))
            .await?
            .and_then(|v| v.parse::<u32>().ok())
            .unwrap_or(0);
        Ok(count >= self.threshold)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemoryKvs;

    #[tokio::test]
    async fn test_skip_after_threshold() {
        let cache = NegativeCache::new(Arc::new(MemoryKvs::new()), 3, 60_000);
        let id = Uuid::new_v4();
        assert!(!cache.should_skip(id).await.unwrap());
        cache.record_result(id, true).await.unwrap();
        cache.record_result(id, true).await.unwrap();
        assert!(!cache.should_skip(id).await.unwrap());
        cache.record_result(id, true).await.unwrap();
        assert!(cache.should_skip(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_non_empty_clears() {
        let cache = NegativeCache::new(Arc::new(MemoryKvs::new()), 2, 60_000);
        let id = Uuid::new_v4();
        cache.record_result(id, true).await.unwrap();
        cache.record_result(id, true).await.unwrap();
        assert!(cache.should_skip(id).await.unwrap());
        cache.record_result(id, false).await.unwrap();
        assert!(!cache.should_skip(id).await.unwrap());
    }

    #[tokio::test]
    async fn test_window_expiry() {
        let cache = NegativeCache::new(Arc::new(MemoryKvs::new()), 1, 30);
        let id = Uuid::new_v4();
        cache.record_result(id, true).await.unwrap();
        assert!(cache.should_skip(id).await.unwrap());
        tokio::time::sleep(std::time::Duration::from_millis(60)).await;
        assert!(!cache.should_skip(id).await.unwrap());
    }
}
