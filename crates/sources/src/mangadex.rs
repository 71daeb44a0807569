//! MangaDex adapter (`api.mangadex.org`).
//!
//! Series ids are MangaDex UUIDs; anything else is treated as a title slug
//! and resolved through the search endpoint first. Chapter lists come from
//! the per-manga feed, English only, ordered by chapter ascending.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use mangatrack_core::SourceName;

use crate::client::SourceClient;
use crate::error::{classify_status, SourceError};
use crate::retry::{with_retries, RetryPolicy};
use crate::types::{ScrapedChapter, ScrapedLatestUpdate, ScrapedSeries};
use crate::SourceResult;

const BASE_URL: &str = "https://api.mangadex.org";
const FEED_PAGE_LIMIT: u32 = 500;
const LATEST_LIMIT: u32 = 50;

pub struct MangaDexClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

// ── Wire DTOs ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct FeedResponse {
    data: Vec<ChapterData>,
}

#[derive(Debug, Deserialize)]
struct ChapterData {
    id: String,
    attributes: ChapterAttributes,
    #[serde(default)]
    relationships: Vec<Relationship>,
}

#[derive(Debug, Deserialize)]
struct ChapterAttributes {
    chapter: Option<String>,
    title: Option<String>,
    #[serde(rename = "publishAt")]
    publish_at: Option<String>,
    #[serde(rename = "translatedLanguage")]
    translated_language: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Relationship {
    id: String,
    #[serde(rename = "type")]
    kind: String,
}

#[derive(Debug, Deserialize)]
struct MangaListResponse {
    data: Vec<MangaData>,
}

#[derive(Debug, Deserialize)]
struct MangaData {
    id: String,
    attributes: MangaAttributes,
}

#[derive(Debug, Deserialize)]
struct MangaAttributes {
    title: Option<std::collections::HashMap<String, String>>,
}

impl MangaDexClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, BASE_URL)
    }

    /// Point the adapter at a different base URL (tests).
    pub fn with_base_url(http: reqwest::Client, base_url: &str) -> Self {
        Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        }
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str, id: &str) -> SourceResult<T> {
        let response = self.http.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            let retry_after = response
                .headers()
                .get("retry-after")
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok());
            return Err(classify_status(SourceName::MangaDex, status.as_u16(), retry_after, id));
        }
        response.json::<T>().await.map_err(|e| SourceError::Decode {
            source: SourceName::MangaDex,
            detail: e.to_string(),
        })
    }

    /// Resolve a slug to the canonical manga UUID. UUIDs pass through.
    async fn resolve_manga_id(&self, source_id: &str) -> SourceResult<String> {
        if uuid::Uuid::parse_str(source_id).is_ok() {
            return Ok(source_id.to_string());
        }
        let url = format!(
            "{}/manga?title={}&limit=1",
            self.base_url,
            urlencode(source_id)
        );
        let list: MangaListResponse = self.get_json(&url, source_id).await?;
        list.data
            .into_iter()
            .next()
            .map(|m| m.id)
            .ok_or_else(|| SourceError::NotFound {
                source: SourceName::MangaDex,
                id: source_id.to_string(),
            })
    }

    fn map_chapter(&self, data: ChapterData) -> Option<ScrapedChapter> {
        let label = data.attributes.chapter.clone()?;
        Some(ScrapedChapter {
            number_label: label,
            title: data.attributes.title.clone().filter(|t| !t.is_empty()),
            url: format!("https://mangadex.org/chapter/{}", data.id),
            source_chapter_id: Some(data.id),
            published_at: data
                .attributes
                .publish_at
                .as_deref()
                .and_then(parse_rfc3339),
        })
    }
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

fn urlencode(raw: &str) -> String {
    raw.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                c.to_string()
                    .bytes()
                    .map(|b| format!("%{:02X}", b))
                    .collect()
            }
        })
        .collect()
}

#[async_trait::async_trait]
impl SourceClient for MangaDexClient {
    fn name(&self) -> SourceName {
        SourceName::MangaDex
    }

    async fn scrape_series(
        &self,
        source_id: &str,
        _target_chapters: Option<&[String]>,
    ) -> SourceResult<ScrapedSeries> {
        let manga_id = self.resolve_manga_id(source_id).await?;
        let url = format!(
            "{}/manga/{}/feed?limit={}&translatedLanguage[]=en&order[chapter]=asc",
            self.base_url, manga_id, FEED_PAGE_LIMIT
        );

        let feed: FeedResponse =
            with_retries(self.retry, "mangadex.feed", || self.get_json(&url, &manga_id)).await?;

        let chapters = feed
            .data
            .into_iter()
            .filter(|c| {
                c.attributes
                    .translated_language
                    .as_deref()
                    .map(|l| l == "en")
                    .unwrap_or(true)
            })
            .filter_map(|c| self.map_chapter(c))
            .collect();

        Ok(ScrapedSeries { source_id: manga_id, title: None, chapters })
    }

    async fn search_series(
        &self,
        query: &str,
    ) -> SourceResult<Vec<crate::client::SearchHit>> {
        let url = format!(
            "{}/manga?title={}&limit=10&order[relevance]=desc",
            self.base_url,
            urlencode(query)
        );
        let list: MangaListResponse =
            with_retries(self.retry, "mangadex.search", || self.get_json(&url, query)).await?;
        Ok(list
            .data
            .into_iter()
            .map(|m| crate::client::SearchHit {
                url: format!("https://mangadex.org/title/{}", m.id),
                title: m
                    .attributes
                    .title
                    .as_ref()
                    .and_then(|t| t.get("en").or_else(|| t.values().next()))
                    .cloned()
                    .unwrap_or_default(),
                source_id: m.id,
            })
            .collect())
    }

    async fn scrape_latest(&self) -> SourceResult<Vec<ScrapedLatestUpdate>> {
        let url = format!(
            "{}/chapter?limit={}&translatedLanguage[]=en&order[publishAt]=desc&includes[]=manga",
            self.base_url, LATEST_LIMIT
        );
        let feed: FeedResponse =
            with_retries(self.retry, "mangadex.latest", || self.get_json(&url, "latest")).await?;

        let updates = feed
            .data
            .into_iter()
            .filter_map(|data| {
                let manga_id = data
                    .relationships
                    .iter()
                    .find(|r| r.kind == "manga")
                    .map(|r| r.id.clone())?;
                let chapter = self.map_chapter(data)?;
                Some(ScrapedLatestUpdate { source_series_id: manga_id, chapter })
            })
            .collect();
        Ok(updates)
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feed_response_decodes() {
        let json = r#"{
            "result": "ok",
            "data": [
                {
                    "id": "11111111-2222-3333-4444-555555555555",
                    "type": "chapter",
                    "attributes": {
                        "chapter": "10.5",
                        "title": "Extra story",
                        "publishAt": "2025-03-01T12:00:00+00:00",
                        "translatedLanguage": "en"
                    },
                    "relationships": [
                        {"id": "aaaa", "type": "manga"}
                    ]
                }
            ]
        }"#;
        let feed: FeedResponse = serde_json::from_str(json).unwrap();
        assert_eq!(feed.data.len(), 1);
        assert_eq!(feed.data[0].attributes.chapter.as_deref(), Some("10.5"));
        assert_eq!(feed.data[0].relationships[0].kind, "manga");
    }

    #[test]
    fn test_map_chapter_skips_unlabelled() {
        let client = MangaDexClient::new(reqwest::Client::new());
        let data = ChapterData {
            id: "x".into(),
            attributes: ChapterAttributes {
                chapter: None,
                title: Some("oneshot".into()),
                publish_at: None,
                translated_language: Some("en".into()),
            },
            relationships: vec![],
        };
        assert!(client.map_chapter(data).is_none());
    }

    #[test]
    fn test_map_chapter_builds_reader_url() {
        let client = MangaDexClient::new(reqwest::Client::new());
        let data = ChapterData {
            id: "chap-1".into(),
            attributes: ChapterAttributes {
                chapter: Some("3".into()),
                title: Some("".into()),
                publish_at: Some("2025-01-05T00:00:00+00:00".into()),
                translated_language: Some("en".into()),
            },
            relationships: vec![],
        };
        let mapped = client.map_chapter(data).unwrap();
        assert_eq!(mapped.url, "https://mangadex.org/chapter/chap-1");
        assert_eq!(mapped.number_label, "3");
        assert!(mapped.title.is_none(), "empty title is dropped");
        assert!(mapped.published_at.is_some());
    }

    #[test]
    fn test_urlencode_spaces() {
        assert_eq!(urlencode("one piece"), "one%20piece");
        assert_eq!(urlencode("abc-123"), "abc-123");
    }
}
