//! Per-user rate windows over the KVS.
//!
//! Thin wrapper used by the progress engine for its three budgets:
//! progress writes (10/min, burst 3/5s), status changes (5/min), and XP
//! grants (5/min, a soft block — progress still saves).

use std::sync::Arc;

use uuid::Uuid;

use mangatrack_kvs::{Kvs, KvsResult};

pub struct RateWindows {
    kvs: Arc<dyn Kvs>,
}

impl RateWindows {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs }
    }

    /// Count one hit on `key`; true while the window budget holds.
    pub async fn allow(&self, key: &str, max: u32, window_ms: u64) -> KvsResult<bool> {
        let count = self.kvs.incr_px(key, window_ms).await?;
        Ok(count <= max as i64)
    }

    pub async fn allow_progress(&self, user_id: Uuid) -> KvsResult<bool> {
        let burst = self
            .allow(&format!("prog:burst:{}", user_id), 3, 5_000)
            .await?;
        let minute = self
            .allow(&format!("prog:min:{}", user_id), 10, 60_000)
            .await?;
        Ok(burst && minute)
    }

    pub async fn allow_status(&self, user_id: Uuid) -> KvsResult<bool> {
        self.allow(&format!("status:min:{}", user_id), 5, 60_000).await
    }

    pub async fn allow_xp_grant(&self, user_id: Uuid) -> KvsResult<bool> {
        self.allow(&format!("xp:min:{}", user_id), 5, 60_000).await
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mangatrack_kvs::MemoryKvs;

    #[tokio::test]
    async fn test_progress_burst_window() {
        let windows = RateWindows::new(Arc::new(MemoryKvs::new()));
        let user = Uuid::new_v4();
        assert!(windows.allow_progress(user).await.unwrap());
        assert!(windows.allow_progress(user).await.unwrap());
        assert!(windows.allow_progress(user).await.unwrap());
        // Fourth hit inside 5s trips the burst budget.
        assert!(!windows.allow_progress(user).await.unwrap());
    }

    #[tokio::test]
    async fn test_xp_budget_is_independent() {
        let windows = RateWindows::new(Arc::new(MemoryKvs::new()));
        let user = Uuid::new_v4();
        for _ in 0..5 {
            assert!(windows.allow_xp_grant(user).await.unwrap());
        }
        assert!(!windows.allow_xp_grant(user).await.unwrap());
        // Status budget unaffected.
        assert!(windows.allow_status(user).await.unwrap());
    }

    #[tokio::test]
    async fn test_users_are_isolated() {
        let windows = RateWindows::new(Arc::new(MemoryKvs::new()));
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        for _ in 0..5 {
            windows.allow_xp_grant(a).await.unwrap();
        }
        assert!(!windows.allow_xp_grant(a).await.unwrap());
        assert!(windows.allow_xp_grant(b).await.unwrap());
    }
}
