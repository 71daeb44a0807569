//! Named durable work queues over the KVS backplane.
//!
//! Each queue is a hash of job payloads plus two sorted sets (ready,
//! delayed), an active set, and a dedup set of live job ids. Enqueueing
//! with an explicit `job_id` is idempotent while that id is waiting or
//! active — the property the crawl gatekeeper and search storm controller
//! lean on. Workers signal transient vs permanent failure through
//! [`JobError`]; a job's final failure is always handed to the configured
//! [`DeadLetterSink`].

pub mod backoff;
pub mod error;
pub mod job;
pub mod manager;
pub mod worker;

pub use backoff::backoff_delay;
pub use error::{JobError, QueueError};
pub use job::{Job, JobCounts, JobOptions, JobPriority};
pub use manager::{DeadLetterSink, FailedJob, QueueManager};
pub use worker::{run_worker, JobHandler, WorkerOptions};

pub type QueueResult<T> = Result<T, QueueError>;
