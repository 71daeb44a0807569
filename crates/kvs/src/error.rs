//! KVS error types.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum KvsError {
    #[error("connection error: {0}")]
    Connection(String),

    #[error("command error: {0}")]
    Command(String),

    #[error("value parse error: {0}")]
    Parse(String),

    #[error("timeout after {0}ms")]
    Timeout(u64),
}

impl From<redis::RedisError> for KvsError {
    fn from(e: redis::RedisError) -> Self {
        if e.is_connection_refusal() || e.is_connection_dropped() || e.is_io_error() {
            KvsError::Connection(e.to_string())
        } else {
            KvsError::Command(e.to_string())
        }
    }
}
