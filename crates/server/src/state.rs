//! Shared application state, constructed once at process init and passed
//! explicitly to every surface (no global singletons).

use std::sync::Arc;
use std::time::Instant;

use sqlx::PgPool;

use mangatrack_core::Config;
use mangatrack_kvs::{Kvs, NegativeCache, RateLimiter};
use mangatrack_progress::ProgressEngine;
use mangatrack_queue::QueueManager;
use mangatrack_scheduler::SearchStormController;
use mangatrack_sources::SourceRegistry;

pub struct AppState {
    pub config: Config,
    pub pool: PgPool,
    pub kvs: Arc<dyn Kvs>,
    pub queues: Arc<QueueManager>,
    pub registry: Arc<SourceRegistry>,
    pub rate: Arc<RateLimiter>,
    pub negative: Arc<NegativeCache>,
    pub progress: ProgressEngine,
    pub storm: SearchStormController,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}
