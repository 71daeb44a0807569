//! Generic HTTP webhook notifier.
//!
//! Delivers notifications as JSON payloads to a configured webhook URL
//! with optional custom headers. Environment variable references
//! (`${VAR_NAME}`) in the URL and header values are resolved at
//! construction time.

use std::collections::HashMap;

use crate::traits::{Notification, Notifier, NotifyError};

#[derive(Debug)]
pub struct WebhookNotifier {
    /// Target URL (env vars already resolved).
    url: String,
    /// Custom headers to include on every request.
    headers: HashMap<String, String>,
    /// Shared HTTP client (connection pooling).
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(
        url: String,
        headers: HashMap<String, String>,
        client: reqwest::Client,
    ) -> Result<Self, NotifyError> {
        let url = resolve_env_refs(&url)?;
        let headers = headers
            .into_iter()
            .map(|(k, v)| resolve_env_refs(&v).map(|v| (k, v)))
            .collect::<Result<HashMap<_, _>, _>>()?;
        Ok(Self { url, headers, client })
    }
}

/// Resolve `${VAR_NAME}` references against the process environment.
fn resolve_env_refs(raw: &str) -> Result<String, NotifyError> {
    let mut out = String::with_capacity(raw.len());
    let mut rest = raw;
    while let Some(start) = rest.find("${") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let Some(end) = after.find('}') else {
            return Err(NotifyError::Config(format!("unterminated env reference in '{}'", raw)));
        };
        let name = &after[..end];
        let value = std::env::var(name)
            .map_err(|_| NotifyError::Config(format!("env var '{}' not set", name)))?;
        out.push_str(&value);
        rest = &after[end + 1..];
    }
    out.push_str(rest);
    Ok(out)
}

#[async_trait::async_trait]
impl Notifier for WebhookNotifier {
    async fn send(&self, notification: &Notification) -> Result<(), NotifyError> {
        let mut request = self.client.post(&self.url).json(notification);
        for (name, value) in &self.headers {
            request = request.header(name, value);
        }
        let response = request.send().await?;

        if response.status().as_u16() == 429 {
            let retry_after_secs = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse().ok())
                .unwrap_or(60);
            return Err(NotifyError::RateLimited { retry_after_secs });
        }
        response.error_for_status()?;
        Ok(())
    }

    fn channel_name(&self) -> &str {
        "webhook"
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_env_refs_passthrough() {
        assert_eq!(resolve_env_refs("https://hooks.example.com/x").unwrap(),
                   "https://hooks.example.com/x");
    }

    #[test]
    fn test_resolve_env_refs_substitutes() {
        std::env::set_var("MT_TEST_HOOK_TOKEN", "tok123");
        let resolved = resolve_env_refs("Bearer ${MT_TEST_HOOK_TOKEN}").unwrap();
        assert_eq!(resolved, "Bearer tok123");
    }

    #[test]
    fn test_resolve_env_refs_missing_var() {
        let result = resolve_env_refs("${MT_TEST_DEFINITELY_NOT_SET}");
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }

    #[test]
    fn test_resolve_env_refs_unterminated() {
        let result = resolve_env_refs("prefix ${OOPS");
        assert!(matches!(result, Err(NotifyError::Config(_))));
    }
}
