//! The source client contract and the URL allow-list.

use async_trait::async_trait;
use url::Url;

use mangatrack_core::SourceName;

use crate::types::{ScrapedLatestUpdate, ScrapedSeries};
use crate::SourceResult;

/// Hosts we will fetch from, per source. Attach and poll paths both
/// validate against this list before any request leaves the process.
const ALLOWED_HOSTS: &[(&str, SourceName)] = &[
    ("mangadex.org", SourceName::MangaDex),
    ("api.mangadex.org", SourceName::MangaDex),
    ("comick.io", SourceName::Comick),
    ("api.comick.io", SourceName::Comick),
    ("weebcentral.com", SourceName::WeebCentral),
    ("mangaplus.shueisha.co.jp", SourceName::MangaPlus),
];

/// Validate a source URL: https, a known host, and the host must belong to
/// the claimed source.
pub fn is_allowed_source_url(raw: &str, source: SourceName) -> bool {
    let Ok(url) = Url::parse(raw) else {
        return false;
    };
    if url.scheme() != "https" {
        return false;
    }
    let Some(host) = url.host_str() else {
        return false;
    };
    ALLOWED_HOSTS
        .iter()
        .any(|(allowed, name)| *name == source && (host == *allowed || host.ends_with(&format!(".{}", allowed))))
}

/// Protocol adapter for one external source.
#[async_trait]
pub trait SourceClient: Send + Sync {
    fn name(&self) -> SourceName;

    /// Fetch the chapter list for a series. `target_chapters` narrows a
    /// gap-recovery poll to specific chapter labels when the source
    /// supports it; adapters may ignore it and return the full list.
    async fn scrape_series(
        &self,
        source_id: &str,
        target_chapters: Option<&[String]>,
    ) -> SourceResult<ScrapedSeries>;

    /// Recent cross-series updates, newest first. Finite per invocation;
    /// callers materialize what they need.
    async fn scrape_latest(&self) -> SourceResult<Vec<ScrapedLatestUpdate>>;

    /// Discovery search on the source's catalog. Default: not supported.
    async fn search_series(&self, _query: &str) -> SourceResult<Vec<SearchHit>> {
        Err(crate::error::SourceError::NotImplemented(self.name()))
    }
}

/// One catalog search result from a source.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct SearchHit {
    pub source_id: String,
    pub title: String,
    pub url: String,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allow_list_accepts_known_hosts() {
        assert!(is_allowed_source_url(
            "https://mangadex.org/title/abc",
            SourceName::MangaDex
        ));
        assert!(is_allowed_source_url(
            "https://comick.io/comic/one-piece",
            SourceName::Comick
        ));
    }

    #[test]
    fn test_allow_list_rejects_wrong_source() {
        // Right host, wrong claimed source.
        assert!(!is_allowed_source_url(
            "https://mangadex.org/title/abc",
            SourceName::Comick
        ));
    }

    #[test]
    fn test_allow_list_rejects_http_and_unknown() {
        assert!(!is_allowed_source_url(
            "http://mangadex.org/title/abc",
            SourceName::MangaDex
        ));
        assert!(!is_allowed_source_url(
            "https://evil.example.com/title/abc",
            SourceName::MangaDex
        ));
        assert!(!is_allowed_source_url("not a url", SourceName::MangaDex));
    }

    #[test]
    fn test_allow_list_rejects_lookalike_host() {
        assert!(!is_allowed_source_url(
            "https://mangadex.org.evil.com/title/abc",
            SourceName::MangaDex
        ));
        // But real subdomains pass.
        assert!(is_allowed_source_url(
            "https://api.mangadex.org/manga/x",
            SourceName::MangaDex
        ));
    }
}
