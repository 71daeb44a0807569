//! Typed source errors.
//!
//! The poll worker maps each variant to a scheduling decision (retry,
//! defer, mark broken/inactive), so classification happens here, at the
//! protocol boundary.

use mangatrack_core::SourceName;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited by {source}{}", retry_after_secs.map(|s| format!(" (retry after {}s)", s)).unwrap_or_default())]
    RateLimited { source: SourceName, retry_after_secs: Option<u64> },

    #[error("proxy blocked by {source}")]
    ProxyBlocked { source: SourceName },

    #[error("forbidden by {source}: {detail}")]
    Forbidden { source: SourceName, detail: String },

    #[error("not found on {source}: {id}")]
    NotFound { source: SourceName, id: String },

    #[error("circuit open for {source}")]
    CircuitOpen { source: SourceName },

    #[error("no client implemented for {0}")]
    NotImplemented(SourceName),

    #[error("invalid source url: {0}")]
    InvalidUrl(String),

    #[error("upstream error from {source}: status {status}")]
    Upstream { source: SourceName, status: u16 },

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("decode error from {source}: {detail}")]
    Decode { source: SourceName, detail: String },
}

impl SourceError {
    /// Whether a retry wrapper should try again.
    pub fn is_retryable(&self) -> bool {
        match self {
            SourceError::RateLimited { .. } => true,
            SourceError::Upstream { status, .. } => *status >= 500,
            SourceError::Http(e) => e.is_timeout() || e.is_connect(),
            _ => false,
        }
    }
}

/// Classify a non-success HTTP status into a typed error.
pub(crate) fn classify_status(
    source: SourceName,
    status: u16,
    retry_after_secs: Option<u64>,
    id: &str,
) -> SourceError {
    match status {
        429 => SourceError::RateLimited { source, retry_after_secs },
        403 => SourceError::Forbidden { source, detail: "403 (possible challenge page)".into() },
        404 => SourceError::NotFound { source, id: id.to_string() },
        407 => SourceError::ProxyBlocked { source },
        s => SourceError::Upstream { source, status: s },
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        let rl = SourceError::RateLimited {
            source: SourceName::MangaDex,
            retry_after_secs: Some(10),
        };
        assert!(rl.is_retryable());
        assert!(SourceError::Upstream { source: SourceName::Comick, status: 503 }.is_retryable());
        assert!(!SourceError::Upstream { source: SourceName::Comick, status: 400 }.is_retryable());
        assert!(!SourceError::NotFound {
            source: SourceName::MangaDex,
            id: "x".into()
        }
        .is_retryable());
        assert!(!SourceError::NotImplemented(SourceName::MangaPlus).is_retryable());
    }

    #[test]
    fn test_rate_limited_message_includes_retry_after() {
        let err = SourceError::RateLimited {
            source: SourceName::MangaDex,
            retry_after_secs: Some(30),
        };
        assert!(err.to_string().contains("retry after 30s"));
    }
}
