//! Fan a notification out to every configured channel.

use std::sync::Arc;
use std::time::Instant;

use tracing::warn;

use crate::traits::{DispatchResult, Notification, Notifier};

pub struct Dispatcher {
    channels: Vec<Arc<dyn Notifier>>,
}

impl Dispatcher {
    pub fn new(channels: Vec<Arc<dyn Notifier>>) -> Self {
        Self { channels }
    }

    /// Deliver through every channel; one channel's failure never blocks
    /// the others.
    pub async fn dispatch(&self, notification: &Notification) -> Vec<DispatchResult> {
        let mut results = Vec::with_capacity(self.channels.len());
        for channel in &self.channels {
            let started = Instant::now();
            let outcome = channel.send(notification).await;
            let duration_ms = started.elapsed().as_millis() as u64;
            match outcome {
                Ok(()) => results.push(DispatchResult {
                    channel: channel.channel_name().to_string(),
                    success: true,
                    error: None,
                    duration_ms,
                }),
                Err(e) => {
                    warn!(
                        channel = channel.channel_name(),
                        error = %e,
                        "notification delivery failed"
                    );
                    results.push(DispatchResult {
                        channel: channel.channel_name().to_string(),
                        success: false,
                        error: Some(e.to_string()),
                        duration_ms,
                    });
                }
            }
        }
        results
    }

    pub fn channel_count(&self) -> usize {
        self.channels.len()
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::traits::NotifyError;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingNotifier {
        sent: AtomicUsize,
        fail: bool,
    }

    #[async_trait::async_trait]
    impl Notifier for CountingNotifier {
        async fn send(&self, _n: &Notification) -> Result<(), NotifyError> {
            self.sent.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(NotifyError::Config("broken channel".into()))
            } else {
                Ok(())
            }
        }

        fn channel_name(&self) -> &str {
            "counting"
        }
    }

    fn notification() -> Notification {
        Notification {
            subject: "New chapter".into(),
            body: "Chapter 12 is out".into(),
            metadata: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn test_failure_does_not_block_other_channels() {
        let failing = Arc::new(CountingNotifier { sent: AtomicUsize::new(0), fail: true });
        let healthy = Arc::new(CountingNotifier { sent: AtomicUsize::new(0), fail: false });
        let dispatcher =
            Dispatcher::new(vec![failing.clone() as Arc<dyn Notifier>, healthy.clone()]);

        let results = dispatcher.dispatch(&notification()).await;
        assert_eq!(results.len(), 2);
        assert!(!results[0].success);
        assert!(results[1].success);
        assert_eq!(failing.sent.load(Ordering::SeqCst), 1);
        assert_eq!(healthy.sent.load(Ordering::SeqCst), 1);
    }
}
