//! Queue error types.

use thiserror::Error;

/// Infrastructure errors from the queue manager itself.
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("kvs error: {0}")]
    Kvs(#[from] mangatrack_kvs::KvsError),

    #[error("job encode error: {0}")]
    Encode(String),

    #[error("job decode error: {0}")]
    Decode(String),
}

/// How a job handler failed.
///
/// Transient errors are retried with exponential backoff until the job's
/// attempt budget runs out; permanent errors dead-letter on first failure.
#[derive(Debug, Error)]
pub enum JobError {
    #[error("transient: {0}")]
    Transient(String),

    #[error("permanent: {0}")]
    Permanent(String),
}

impl JobError {
    pub fn transient(msg: impl Into<String>) -> Self {
        JobError::Transient(msg.into())
    }

    pub fn permanent(msg: impl Into<String>) -> Self {
        JobError::Permanent(msg.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, JobError::Transient(_))
    }
}
