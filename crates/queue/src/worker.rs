//! Worker runner: per-queue concurrency, optional queue-wide rate limit,
//! per-job timeout, and cooperative shutdown.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::{watch, Semaphore};

use mangatrack_kvs::{RateLimitRule, RateLimiter};

use crate::error::JobError;
use crate::job::Job;
use crate::manager::QueueManager;

/// A queue job processor.
#[async_trait]
pub trait JobHandler: Send + Sync {
    async fn handle(&self, job: &Job) -> Result<(), JobError>;
}

#[derive(Debug, Clone)]
pub struct WorkerOptions {
    pub concurrency: usize,
    /// Optional queue-wide limit `(max jobs, per window)`.
    pub rate_limit: Option<(u32, Duration)>,
    pub job_timeout: Duration,
    pub poll_interval: Duration,
}

impl Default for WorkerOptions {
    fn default() -> Self {
        Self {
            concurrency: 1,
            rate_limit: None,
            job_timeout: Duration::from_secs(120),
            poll_interval: Duration::from_millis(500),
        }
    }
}

impl WorkerOptions {
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    pub fn with_rate_limit(mut self, max: u32, per: Duration) -> Self {
        self.rate_limit = Some((max, per));
        self
    }

    pub fn with_job_timeout(mut self, timeout: Duration) -> Self {
        self.job_timeout = timeout;
        self
    }
}

/// Consume `queue` until `shutdown` flips to true, then drain in-flight jobs.
pub async fn run_worker(
    manager: Arc<QueueManager>,
    kvs: Arc<dyn mangatrack_kvs::Kvs>,
    queue: &str,
    handler: Arc<dyn JobHandler>,
    opts: WorkerOptions,
    mut shutdown: watch::Receiver<bool>,
) {
    let semaphore = Arc::new(Semaphore::new(opts.concurrency));
    let queue_limiter = opts.rate_limit.map(|(max, per)| {
        Arc::new(RateLimiter::new(
            kvs,
            RateLimitRule { max_per_window: max, window_ms: per.as_millis() as u64 },
        ))
    });
    let limiter_bucket = format!("queue:{}", queue);

    tracing::info!(
        queue = queue,
        concurrency = opts.concurrency,
        "worker started"
    );

    loop {
        if *shutdown.borrow() {
            break;
        }

        let permit = match semaphore.clone().acquire_owned().await {
            Ok(p) => p,
            Err(_) => break,
        };

        // Queue-wide throughput cap, shared across worker processes.
        if let Some(limiter) = &queue_limiter {
            if !limiter.acquire(&limiter_bucket, opts.job_timeout).await {
                drop(permit);
                continue;
            }
        }

        let job = match manager.take_next(queue).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                drop(permit);
                tokio::select! {
                    _ = tokio::time::sleep(opts.poll_interval) => {}
                    _ = shutdown.changed() => {}
                }
                continue;
            }
            Err(e) => {
                drop(permit);
                tracing::warn!(queue = queue, error = %e, "take_next failed");
                tokio::time::sleep(opts.poll_interval).await;
                continue;
            }
        };

        let manager = manager.clone();
        let handler = handler.clone();
        let job_timeout = opts.job_timeout;
        tokio::spawn(async move {
            let _permit = permit;
            let started = std::time::Instant::now();
            let result = match tokio::time::timeout(job_timeout, handler.handle(&job)).await {
                Ok(r) => r,
                Err(_) => Err(JobError::transient(format!(
                    "job timed out after {}ms",
                    job_timeout.as_millis()
                ))),
            };
            match result {
                Ok(()) => {
                    tracing::debug!(
                        queue = %job.queue,
                        job_id = %job.id,
                        elapsed_ms = started.elapsed().as_millis() as u64,
                        "job completed"
                    );
                    if let Err(e) = manager.complete(&job).await {
                        tracing::warn!(job_id = %job.id, error = %e, "failed to complete job");
                    }
                }
                Err(job_err) => {
                    if let Err(e) = manager.retry_or_fail(&job, &job_err).await {
                        tracing::warn!(job_id = %job.id, error = %e, "failed to reschedule job");
                    }
                }
            }
        });
    }

    // Drain: wait for every in-flight job to hand its permit back.
    let _drained = semaphore.acquire_many(opts.concurrency as u32).await;
    tracing::info!(queue = queue, "worker drained");
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobOptions;
    use mangatrack_kvs::MemoryKvs;
    use std::sync::Mutex;

    struct Recorder {
        seen: Mutex<Vec<String>>,
        fail_ids: Vec<String>,
    }

    #[async_trait]
    impl JobHandler for Recorder {
        async fn handle(&self, job: &Job) -> Result<(), JobError> {
            self.seen.lock().unwrap().push(job.id.clone());
            if self.fail_ids.contains(&job.id) {
                return Err(JobError::permanent("boom"));
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_worker_processes_and_drains() {
        let kvs: Arc<dyn mangatrack_kvs::Kvs> = Arc::new(MemoryKvs::new());
        let manager = Arc::new(QueueManager::new(kvs.clone()));
        for i in 0..5 {
            manager
                .add(
                    "q",
                    "job",
                    serde_json::json!({"i": i}),
                    JobOptions::default().with_job_id(format!("job-{}", i)),
                )
                .await
                .unwrap();
        }

        let recorder = Arc::new(Recorder { seen: Mutex::new(Vec::new()), fail_ids: vec![] });
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(
            manager.clone(),
            kvs,
            "q",
            recorder.clone(),
            WorkerOptions::default()
                .with_concurrency(2)
                .with_job_timeout(Duration::from_secs(5)),
            rx,
        ));

        // Give the worker time to chew through the queue, then stop it.
        tokio::time::sleep(Duration::from_millis(300)).await;
        tx.send(true).unwrap();
        worker.await.unwrap();

        let mut seen = recorder.seen.lock().unwrap().clone();
        seen.sort();
        assert_eq!(seen.len(), 5);
        let counts = manager.counts("q").await.unwrap();
        assert_eq!(counts.backlog(), 0);
    }

    #[tokio::test]
    async fn test_worker_dead_letters_permanent_failures() {
        let kvs: Arc<dyn mangatrack_kvs::Kvs> = Arc::new(MemoryKvs::new());
        let manager = Arc::new(QueueManager::new(kvs.clone()));
        manager
            .add("q", "bad", serde_json::json!({}), JobOptions::default().with_job_id("bad-1"))
            .await
            .unwrap();

        let recorder = Arc::new(Recorder {
            seen: Mutex::new(Vec::new()),
            fail_ids: vec!["bad-1".to_string()],
        });
        let (tx, rx) = watch::channel(false);
        let worker = tokio::spawn(run_worker(
            manager.clone(),
            kvs,
            "q",
            recorder.clone(),
            WorkerOptions::default(),
            rx,
        ));

        tokio::time::sleep(Duration::from_millis(200)).await;
        tx.send(true).unwrap();
        worker.await.unwrap();

        assert_eq!(recorder.seen.lock().unwrap().len(), 1);
        // Permanent failure removed the job rather than retrying it.
        assert!(!manager.is_pending("q", "bad-1").await.unwrap());
    }
}
