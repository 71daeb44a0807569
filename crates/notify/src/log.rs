//! Log-only notifier: the default channel when no webhook is configured.

use crate::traits::{Notification, Notifier, NotifyError};

#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        tracing::info!(
            subject = %notification.subject,
            body = %notification.body,
            "notification (log channel)"
        );
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "log"
    }
}
