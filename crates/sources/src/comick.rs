//! Comick adapter (`api.comick.io`).
//!
//! Series are addressed by slug. The chapter listing endpoint paginates;
//! we take the first page ordered newest-first, which covers the polling
//! window for active series.

use chrono::{DateTime, Utc};
use serde::Deserialize;

use mangatrack_core::SourceName;

use crate::client::SourceClient;
use crate::error::{classify_status, SourceError};
use crate::retry::{with_retries, RetryPolicy};
use crate::types::{ScrapedChapter, ScrapedLatestUpdate, ScrapedSeries};
use crate::SourceResult;

const BASE_URL: &str = "https://api.comick.io";
const CHAPTER_PAGE_LIMIT: u32 = 300;

pub struct ComickClient {
    http: reqwest::Client,
    base_url: String,
    retry: RetryPolicy,
}

// ── Wire DTOs ────────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct ChapterListResponse {
    chapters: Vec<ComickChapter>,
}

#[derive(Debug, Deserialize)]
struct ComickChapter {
    /// Chapter label, e.g. "12" or "12.5"; may be null for extras.
    chap: Option<String>,
    title: Option<String>,
    /// Hash id used in reader URLs.
    hid: String,
    lang: Option<String>,
    created_at: Option<String>,
    /// Present in the cross-series latest listing.
    #[serde(default)]
    md_comics: Option<ComickComicRef>,
}

#[derive(Debug, Deserialize)]
struct ComickComicRef {
    slug: String,
}

#[derive(Debug, Deserialize)]
struct ComickSearchHit {
    slug: String,
    title: Option<String>,
}

impl ComickClient {
    pub fn new(http: reqwest::Client) -> Self {
        Self::with_base_url(http, BASE_URL)
    }

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
            return Err(classify_status(SourceName::Comick, status.as_u16(), retry_after, id));
        }
        response.json::<T>().await.map_err(|e| SourceError::Decode {
            source: SourceName::Comick,
            detail: e.to_string(),
        })
    }

    fn map_chapter(&self, slug: &str, chapter: &ComickChapter) -> Option<ScrapedChapter> {
        let label = chapter.chap.clone()?;
        Some(ScrapedChapter {
            number_label: label,
            title: chapter.title.clone().filter(|t| !t.is_empty()),
            url: format!("https://comick.io/comic/{}/{}", slug, chapter.hid),
            source_chapter_id: Some(chapter.hid.clone()),
            published_at: chapter.created_at.as_deref().and_then(parse_rfc3339),
        })
    }
}

fn parse_rfc3339(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(raw).ok().map(|dt| dt.with_timezone(&Utc))
}

#[async_trait::async_trait]
impl SourceClient for ComickClient {
    fn name(&self) -> SourceName {
        SourceName::Comick
    }

    async fn scrape_series(
        &self,
        source_id: &str,
        _target_chapters: Option<&[String]>,
    ) -> SourceResult<ScrapedSeries> {
        let url = format!(
            "{}/comic/{}/chapters?lang=en&limit={}",
            self.base_url, source_id, CHAPTER_PAGE_LIMIT
        );
        let list: ChapterListResponse =
            with_retries(self.retry, "comick.chapters", || self.get_json(&url, source_id)).await?;

        let chapters = list
            .chapters
            .iter()
            .filter(|c| c.lang.as_deref().map(|l| l == "en").unwrap_or(true))
            .filter_map(|c| self.map_chapter(source_id, c))
            .collect();

        Ok(ScrapedSeries {
            source_id: source_id.to_string(),
            title: None,
            chapters,
        })
    }

    async fn search_series(
        &self,
        query: &str,
    ) -> SourceResult<Vec<crate::client::SearchHit>> {
        let encoded: String = query
            .chars()
            .map(|c| if c == ' ' { '+' } else { c })
            .collect();
        let url = format!("{}/v1.0/search?q={}&limit=10", self.base_url, encoded);
        let hits: Vec<ComickSearchHit> =
            with_retries(self.retry, "comick.search", || self.get_json(&url, query)).await?;
        Ok(hits
            .into_iter()
            .map(|h| crate::client::SearchHit {
                url: format!("https://comick.io/comic/{}", h.slug),
                title: h.title.unwrap_or_default(),
                source_id: h.slug,
            })
            .collect())
    }

    async fn scrape_latest(&self) -> SourceResult<Vec<ScrapedLatestUpdate>> {
        let url = format!("{}/chapter?lang=en&order=new&page=1", self.base_url);
        let list: Vec<ComickChapter> =
            with_retries(self.retry, "comick.latest", || self.get_json(&url, "latest")).await?;

        let updates = list
            .iter()
            .filter_map(|c| {
                let slug = c.md_comics.as_ref().map(|m| m.slug.clone())?;
                let chapter = self.map_chapter(&slug, c)?;
                Some(ScrapedLatestUpdate { source_series_id: slug, chapter })
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
    fn test_chapter_list_decodes() {
        let json = r#"{
            "chapters": [
                {"chap": "1", "title": null, "hid": "h1", "lang": "en",
                 "created_at": "2025-02-01T00:00:00Z"},
                {"chap": null, "title": "omake", "hid": "h2", "lang": "en",
                 "created_at": null}
            ]
        }"#;
        let list: ChapterListResponse = serde_json::from_str(json).unwrap();
        assert_eq!(list.chapters.len(), 2);

        let client = ComickClient::new(reqwest::Client::new());
        let mapped: Vec<_> = list
            .chapters
            .iter()
            .filter_map(|c| client.map_chapter("one-piece", c))
            .collect();
        // The unlabelled extra is dropped at this layer.
        assert_eq!(mapped.len(), 1);
        assert_eq!(mapped[0].url, "https://comick.io/comic/one-piece/h1");
    }

    #[test]
    fn test_latest_carries_comic_slug() {
        let json = r#"[
            {"chap": "99", "title": null, "hid": "h9", "lang": "en",
             "created_at": "2025-02-01T00:00:00Z",
             "md_comics": {"slug": "berserk"}}
        ]"#;
        let list: Vec<ComickChapter> = serde_json::from_str(json).unwrap();
        assert_eq!(list[0].md_comics.as_ref().unwrap().slug, "berserk");
    }
}
