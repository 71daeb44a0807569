//! Wire-agnostic scrape results.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One chapter as reported by a source, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedChapter {
    /// Raw chapter label from the source ("1", "10.5", "Extra 2", ...).
    pub number_label: String,
    pub title: Option<String>,
    pub url: String,
    pub source_chapter_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// A series' chapter list from one source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedSeries {
    /// Canonical id on the source (slugs are resolved before this point).
    pub source_id: String,
    pub title: Option<String>,
    pub chapters: Vec<ScrapedChapter>,
}

/// One entry of a source's cross-series latest-updates listing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScrapedLatestUpdate {
    pub source_series_id: String,
    pub chapter: ScrapedChapter,
}
