//! Retry wrapper for source HTTP calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tracing::warn;

use crate::error::SourceError;
use crate::SourceResult;

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(500) }
    }
}

impl RetryPolicy {
    /// Delay before retry `attempt` (1-based): exponential with ±25% jitter.
    /// A server-provided `Retry-After` wins over the computed delay.
    fn delay_for(&self, attempt: u32, retry_after: Option<u64>) -> Duration {
        if let Some(secs) = retry_after {
            return Duration::from_secs(secs.min(120));
        }
        let exp = attempt.saturating_sub(1).min(10);
        let base_ms = self.base_delay.as_millis() as u64 * (1u64 << exp);
        let jitter = rand::thread_rng().gen_range(0..=base_ms / 4);
        Duration::from_millis(base_ms + jitter)
    }
}

/// Run `op`, retrying on retryable errors (429, 5xx, timeouts) up to the
/// policy's attempt budget. Non-retryable errors return immediately.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> SourceResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = SourceResult<T>>,
{
    let mut attempt = 1;
    loop {
        match op().await {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let retry_after = match &err {
                    SourceError::RateLimited { retry_after_secs, .. } => *retry_after_secs,
                    _ => None,
                };
                let delay = policy.delay_for(attempt, retry_after);
                warn!(
                    op = label,
                    attempt = attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %err,
                    "source call failed — retrying"
                );
                tokio::time::sleep(delay).await;
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use mangatrack_core::SourceName;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn fast_policy() -> RetryPolicy {
        RetryPolicy { max_attempts: 3, base_delay: Duration::from_millis(1) }
    }

    #[tokio::test]
    async fn test_retries_transient_then_succeeds() {
        let calls = AtomicU32::new(0);
        let result = with_retries(fast_policy(), "test", || {
            let n = calls.fetch_add(1, Ordering::SeqCst);
            async move {
                if n < 2 {
                    Err(SourceError::Upstream { source: SourceName::MangaDex, status: 502 })
                } else {
                    Ok(42u32)
                }
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_budget() {
        let calls = AtomicU32::new(0);
        let result: SourceResult<()> = with_retries(fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(SourceError::Upstream { source: SourceName::MangaDex, status: 503 })
            }
        })
        .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_permanent_error_short_circuits() {
        let calls = AtomicU32::new(0);
        let result: SourceResult<()> = with_retries(fast_policy(), "test", || {
            calls.fetch_add(1, Ordering::SeqCst);
            async {
                Err(SourceError::NotFound { source: SourceName::Comick, id: "gone".into() })
            }
        })
        .await;
        assert!(matches!(result, Err(SourceError::NotFound { .. })));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }
}
