//! Queue manager: enqueue, dedup, promotion, completion, dead-lettering.
//!
//! Storage layout per queue `<q>`:
//!   `q:<q>:jobs`    hash  job id → serialized [`Job`]
//!   `q:<q>:ready`   zset  score = priority band + enqueue ms (FIFO within priority)
//!   `q:<q>:delayed` zset  score = ready-at ms
//!   `q:<q>:active`  set   job ids currently held by a worker
//!   `q:<q>:ids`     set   all live job ids — the dedup set
//!
//! Ready pops use the atomic `ZPOPMIN`; delayed promotion races are settled
//! by the `ZREM` return value, so a job is promoted exactly once.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use mangatrack_kvs::Kvs;

use crate::backoff::backoff_delay;
use crate::error::{JobError, QueueError};
use crate::job::{Job, JobCounts, JobOptions};
use crate::QueueResult;

/// Keeps priority bands far above any epoch-ms enqueue stamp while staying
/// inside f64 integer precision.
const PRIORITY_BAND: f64 = 1e13;

/// A job that exhausted its retries (or failed permanently).
#[derive(Debug, Clone, Serialize)]
pub struct FailedJob {
    pub queue: String,
    pub job_id: String,
    pub name: String,
    pub payload: serde_json::Value,
    pub error: String,
    pub attempts: u32,
}

/// Sink for final job failures. The store crate persists these as
/// `worker_failures` rows.
#[async_trait]
pub trait DeadLetterSink: Send + Sync {
    async fn record(&self, failure: &FailedJob);
}

/// Outcome of [`QueueManager::retry_or_fail`].
#[derive(Debug)]
pub enum FailureOutcome {
    /// Rescheduled with this delay.
    Retried(std::time::Duration),
    /// Sent to the dead-letter sink and removed.
    DeadLettered,
}

pub struct QueueManager {
    kvs: Arc<dyn Kvs>,
    sink: Option<Arc<dyn DeadLetterSink>>,
}

fn jobs_key(queue: &str) -> String {
    format!("q:{}:jobs", queue)
}
fn ready_key(queue: &str) -> String {
    format!("q:{}:ready", queue)
}
fn delayed_key(queue: &str) -> String {
    format!("q:{}:delayed", queue)
}
fn active_key(queue: &str) -> String {
    format!("q:{}:active", queue)
}
fn ids_key(queue: &str) -> String {
    format!("q:{}:ids", queue)
}

fn now_ms() -> u64 {
    Utc::now().timestamp_millis() as u64
}

pub(crate) fn ready_score(priority_value: u8, enqueue_ms: u64) -> f64 {
    priority_value as f64 * PRIORITY_BAND + enqueue_ms as f64
}

impl QueueManager {
    pub fn new(kvs: Arc<dyn Kvs>) -> Self {
        Self { kvs, sink: None }
    }

    pub fn with_dead_letter_sink(mut self, sink: Arc<dyn DeadLetterSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Enqueue a job. Returns `None` when a job with the same id is already
    /// waiting or active (aggressive dedup).
    pub async fn add(
        &self,
        queue: &str,
        name: &str,
        payload: serde_json::Value,
        opts: JobOptions,
    ) -> QueueResult<Option<String>> {
        let job_id = opts
            .job_id
            .clone()
            .unwrap_or_else(|| Uuid::new_v4().to_string());

        if !self.kvs.sadd(&ids_key(queue), &job_id).await? {
            tracing::debug!(queue = queue, job_id = %job_id, "enqueue deduped");
            return Ok(None);
        }

        let job = Job {
            id: job_id.clone(),
            queue: queue.to_string(),
            name: name.to_string(),
            payload,
            priority: opts.priority,
            max_attempts: opts.attempts.max(1),
            attempts_made: 0,
            backoff_base_ms: opts.backoff_base_ms,
            created_at: Utc::now(),
            last_error: None,
        };
        self.put_job(&job).await?;

        match opts.delay_ms {
            Some(delay) if delay > 0 => {
                self.kvs
                    .zadd(&delayed_key(queue), (now_ms() + delay) as f64, &job_id)
                    .await?;
            }
            _ => {
                self.kvs
                    .zadd(&ready_key(queue), ready_score(job.priority.value(), now_ms()), &job_id)
                    .await?;
            }
        }
        Ok(Some(job_id))
    }

    /// Enqueue a batch. Individual dedup hits are skipped, not errors.
    pub async fn add_bulk(
        &self,
        queue: &str,
        jobs: Vec<(String, serde_json::Value, JobOptions)>,
    ) -> QueueResult<Vec<String>> {
        let mut enqueued = Vec::with_capacity(jobs.len());
        for (name, payload, opts) in jobs {
            if let Some(id) = self.add(queue, &name, payload, opts).await? {
                enqueued.push(id);
            }
        }
        Ok(enqueued)
    }

    /// Whether a job id is currently waiting, delayed, or active.
    pub async fn is_pending(&self, queue: &str, job_id: &str) -> QueueResult<bool> {
        Ok(self.kvs.sismember(&ids_key(queue), job_id).await?)
    }

    pub async fn get_job(&self, queue: &str, job_id: &str) -> QueueResult<Option<Job>> {
        match self.kvs.hget(&jobs_key(queue), job_id).await? {
            Some(raw) => Ok(Some(decode_job(&raw)?)),
            None => Ok(None),
        }
    }

    pub async fn counts(&self, queue: &str) -> QueueResult<JobCounts> {
        Ok(JobCounts {
            waiting: self.kvs.zcard(&ready_key(queue)).await?,
            delayed: self.kvs.zcard(&delayed_key(queue)).await?,
            active: self.kvs.scard(&active_key(queue)).await?,
        })
    }

    /// Move due delayed jobs onto the ready zset.
    pub async fn promote_due(&self, queue: &str) -> QueueResult<usize> {
        let due = self
            .kvs
            .zrangebyscore_below(&delayed_key(queue), now_ms() as f64, 64)
            .await?;
        let mut promoted = 0;
        for job_id in due {
            // Only the worker whose ZREM succeeds promotes the job.
            if !self.kvs.zrem(&delayed_key(queue), &job_id).await? {
                continue;
            }
            let priority = match self.get_job(queue, &job_id).await? {
                Some(job) => job.priority.value(),
                None => {
                    // Orphaned id: payload vanished, clear the dedup slot.
                    self.kvs.srem(&ids_key(queue), &job_id).await?;
                    continue;
                }
            };
            self.kvs
                .zadd(&ready_key(queue), ready_score(priority, now_ms()), &job_id)
                .await?;
            promoted += 1;
        }
        Ok(promoted)
    }

    /// Pop the next ready job, marking it active.
    pub async fn take_next(&self, queue: &str) -> QueueResult<Option<Job>> {
        self.promote_due(queue).await?;
        let Some((job_id, _score)) = self.kvs.zpop_min(&ready_key(queue)).await? else {
            return Ok(None);
        };
        match self.get_job(queue, &job_id).await? {
            Some(job) => {
                self.kvs.sadd(&active_key(queue), &job_id).await?;
                Ok(Some(job))
            }
            None => {
                self.kvs.srem(&ids_key(queue), &job_id).await?;
                Ok(None)
            }
        }
    }

    /// Job finished successfully: drop all traces (removeOnComplete).
    pub async fn complete(&self, job: &Job) -> QueueResult<()> {
        self.kvs.hdel(&jobs_key(&job.queue), &job.id).await?;
        self.kvs.srem(&active_key(&job.queue), &job.id).await?;
        self.kvs.srem(&ids_key(&job.queue), &job.id).await?;
        Ok(())
    }

    /// Job failed: retry transient failures with backoff while attempts
    /// remain; otherwise dead-letter. The final failure of any job reaches
    /// the sink.
    pub async fn retry_or_fail(&self, job: &Job, error: &JobError) -> QueueResult<FailureOutcome> {
        let mut job = job.clone();
        job.attempts_made += 1;
        job.last_error = Some(error.to_string());

        let retry = error.is_transient() && job.attempts_made < job.max_attempts;
        self.kvs.srem(&active_key(&job.queue), &job.id).await?;

        if retry {
            self.put_job(&job).await?;
            let delay = backoff_delay(job.backoff_base_ms, job.attempts_made);
            self.kvs
                .zadd(
                    &delayed_key(&job.queue),
                    (now_ms() + delay.as_millis() as u64) as f64,
                    &job.id,
                )
                .await?;
            tracing::warn!(
                queue = %job.queue,
                job_id = %job.id,
                attempt = job.attempts_made,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "job failed — retrying"
            );
            return Ok(FailureOutcome::Retried(delay));
        }

        if let Some(sink) = &self.sink {
            sink.record(&FailedJob {
                queue: job.queue.clone(),
                job_id: job.id.clone(),
                name: job.name.clone(),
                payload: job.payload.clone(),
                error: error.to_string(),
                attempts: job.attempts_made,
            })
            .await;
        }
        self.kvs.hdel(&jobs_key(&job.queue), &job.id).await?;
        self.kvs.srem(&ids_key(&job.queue), &job.id).await?;
        tracing::error!(
            queue = %job.queue,
            job_id = %job.id,
            attempts = job.attempts_made,
            error = %error,
            "job dead-lettered"
        );
        Ok(FailureOutcome::DeadLettered)
    }

    async fn put_job(&self, job: &Job) -> QueueResult<()> {
        let raw = serde_json::to_string(job).map_err(|e| QueueError::Encode(e.to_string()))?;
        self.kvs.hset(&jobs_key(&job.queue), &job.id, &raw).await?;
        Ok(())
    }
}

fn decode_job(raw: &str) -> QueueResult<Job> {
    serde_json::from_str(raw).map_err(|e| QueueError::Decode(e.to_string()))
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobPriority;
    use mangatrack_kvs::MemoryKvs;
    use std::sync::Mutex;

    fn manager() -> QueueManager {
        QueueManager::new(Arc::new(MemoryKvs::new()))
    }

    #[tokio::test]
    async fn test_add_and_take() {
        let m = manager();
        let id = m
            .add("sync-source", "sync", serde_json::json!({"k": 1}), JobOptions::default())
            .await
            .unwrap();
        assert!(id.is_some());
        let job = m.take_next("sync-source").await.unwrap().unwrap();
        assert_eq!(job.name, "sync");
        let counts = m.counts("sync-source").await.unwrap();
        assert_eq!(counts.active, 1);
        assert_eq!(counts.waiting, 0);
    }

    #[tokio::test]
    async fn test_job_id_dedup() {
        let m = manager();
        let opts = JobOptions::default().with_job_id("sync-abc");
        let first = m.add("q", "sync", serde_json::json!({}), opts.clone()).await.unwrap();
        let second = m.add("q", "sync", serde_json::json!({}), opts.clone()).await.unwrap();
        assert!(first.is_some());
        assert!(second.is_none(), "duplicate jobId must be dropped");

        // Still deduped while active.
        let job = m.take_next("q").await.unwrap().unwrap();
        let third = m.add("q", "sync", serde_json::json!({}), opts.clone()).await.unwrap();
        assert!(third.is_none(), "jobId stays reserved while active");

        // Free after completion.
        m.complete(&job).await.unwrap();
        let fourth = m.add("q", "sync", serde_json::json!({}), opts).await.unwrap();
        assert!(fourth.is_some());
    }

    #[tokio::test]
    async fn test_priority_ordering() {
        let m = manager();
        m.add("q", "low", serde_json::json!({}), JobOptions::default().with_priority(JobPriority::Low))
            .await
            .unwrap();
        m.add("q", "critical", serde_json::json!({}), JobOptions::default().with_priority(JobPriority::Critical))
            .await
            .unwrap();
        m.add("q", "standard", serde_json::json!({}), JobOptions::default())
            .await
            .unwrap();

        let order: Vec<String> = {
            let mut v = Vec::new();
            while let Some(job) = m.take_next("q").await.unwrap() {
                v.push(job.name.clone());
                m.complete(&job).await.unwrap();
            }
            v
        };
        assert_eq!(order, vec!["critical", "standard", "low"]);
    }

    #[tokio::test]
    async fn test_delayed_promotion() {
        let m = manager();
        m.add(
            "q",
            "later",
            serde_json::json!({}),
            JobOptions::default().with_delay_ms(40),
        )
        .await
        .unwrap();
        assert!(m.take_next("q").await.unwrap().is_none());
        tokio::time::sleep(std::time::Duration::from_millis(70)).await;
        let job = m.take_next("q").await.unwrap();
        assert!(job.is_some(), "delayed job should promote after its delay");
    }

    struct RecordingSink {
        failures: Mutex<Vec<FailedJob>>,
    }

    #[async_trait]
    impl DeadLetterSink for RecordingSink {
        async fn record(&self, failure: &FailedJob) {
            self.failures.lock().unwrap().push(failure.clone());
        }
    }

    #[tokio::test]
    async fn test_transient_retries_then_dead_letters() {
        let sink = Arc::new(RecordingSink { failures: Mutex::new(Vec::new()) });
        let m = QueueManager::new(Arc::new(MemoryKvs::new()))
            .with_dead_letter_sink(sink.clone());

        m.add(
            "q",
            "flaky",
            serde_json::json!({}),
            JobOptions::default().with_attempts(2).with_job_id("flaky-1"),
        )
        .await
        .unwrap();

        let job = m.take_next("q").await.unwrap().unwrap();
        let outcome = m
            .retry_or_fail(&job, &JobError::transient("http 503"))
            .await
            .unwrap();
        assert!(matches!(outcome, FailureOutcome::Retried(_)));
        assert!(sink.failures.lock().unwrap().is_empty());

        // Second (final) attempt fails → DLQ.
        let job = m.get_job("q", "flaky-1").await.unwrap().unwrap();
        let outcome = m
            .retry_or_fail(&job, &JobError::transient("http 503"))
            .await
            .unwrap();
        assert!(matches!(outcome, FailureOutcome::DeadLettered));
        let failures = sink.failures.lock().unwrap();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].attempts, 2);
        assert_eq!(failures[0].job_id, "flaky-1");
    }

    #[tokio::test]
    async fn test_permanent_dead_letters_immediately() {
        let sink = Arc::new(RecordingSink { failures: Mutex::new(Vec::new()) });
        let m = QueueManager::new(Arc::new(MemoryKvs::new()))
            .with_dead_letter_sink(sink.clone());

        m.add("q", "bad", serde_json::json!({}), JobOptions::default().with_attempts(5))
            .await
            .unwrap();
        let job = m.take_next("q").await.unwrap().unwrap();
        let outcome = m
            .retry_or_fail(&job, &JobError::permanent("malformed payload"))
            .await
            .unwrap();
        assert!(matches!(outcome, FailureOutcome::DeadLettered));
        assert_eq!(sink.failures.lock().unwrap().len(), 1);
        // Dedup slot released.
        assert!(!m.is_pending("q", &job.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_add_bulk_skips_dupes() {
        let m = manager();
        let jobs = vec![
            ("a".to_string(), serde_json::json!({}), JobOptions::default().with_job_id("j1")),
            ("b".to_string(), serde_json::json!({}), JobOptions::default().with_job_id("j1")),
            ("c".to_string(), serde_json::json!({}), JobOptions::default().with_job_id("j2")),
        ];
        let enqueued = m.add_bulk("q", jobs).await.unwrap();
        assert_eq!(enqueued, vec!["j1".to_string(), "j2".to_string()]);
    }
}
