//! Shared domain enums used across the crawl, ingest, and progress layers.
//!
//! All enums serialize to the lowercase strings stored in PostgreSQL text
//! columns and used in KVS keys, so `as_str`/`parse` round-trip with the
//! database representation.

use serde::{Deserialize, Serialize};

/// External chapter sources we can attach to a series.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceName {
    MangaDex,
    Comick,
    WeebCentral,
    MangaPlus,
}

impl SourceName {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceName::MangaDex => "mangadex",
            SourceName::Comick => "comick",
            SourceName::WeebCentral => "weebcentral",
            SourceName::MangaPlus => "mangaplus",
        }
    }

    pub fn all() -> &'static [SourceName] {
        &[
            SourceName::MangaDex,
            SourceName::Comick,
            SourceName::WeebCentral,
            SourceName::MangaPlus,
        ]
    }
}

impl std::fmt::Display for SourceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for SourceName {}

impl std::str::FromStr for SourceName {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mangadex" => Ok(SourceName::MangaDex),
            "comick" => Ok(SourceName::Comick),
            "weebcentral" => Ok(SourceName::WeebCentral),
            "mangaplus" => Ok(SourceName::MangaPlus),
            other => Err(format!("unknown source name '{}'", other)),
        }
    }
}

/// Popularity/activity classification driving polling frequency.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CatalogTier {
    A,
    B,
    C,
}

impl CatalogTier {
    pub fn as_str(&self) -> &'static str {
        match self {
            CatalogTier::A => "A",
            CatalogTier::B => "B",
            CatalogTier::C => "C",
        }
    }
}

impl std::str::FromStr for CatalogTier {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "A" => Ok(CatalogTier::A),
            "B" => Ok(CatalogTier::B),
            "C" => Ok(CatalogTier::C),
            other => Err(format!("unknown catalog tier '{}'", other)),
        }
    }
}

/// Within-tier polling priority, adjusted by freshness and engagement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SyncPriority {
    Hot,
    Warm,
    Cold,
}

impl SyncPriority {
    pub fn as_str(&self) -> &'static str {
        match self {
            SyncPriority::Hot => "hot",
            SyncPriority::Warm => "warm",
            SyncPriority::Cold => "cold",
        }
    }
}

impl std::str::FromStr for SyncPriority {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "hot" => Ok(SyncPriority::Hot),
            "warm" => Ok(SyncPriority::Warm),
            "cold" => Ok(SyncPriority::Cold),
            other => Err(format!("unknown sync priority '{}'", other)),
        }
    }
}

/// Operational state of a series source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceStatus {
    Active,
    Broken,
    Inactive,
}

impl SourceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceStatus::Active => "active",
            SourceStatus::Broken => "broken",
            SourceStatus::Inactive => "inactive",
        }
    }
}

impl std::str::FromStr for SourceStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(SourceStatus::Active),
            "broken" => Ok(SourceStatus::Broken),
            "inactive" => Ok(SourceStatus::Inactive),
            other => Err(format!("unknown source status '{}'", other)),
        }
    }
}

/// Library entry reading status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LibraryStatus {
    Reading,
    Completed,
    Planning,
    Dropped,
    Paused,
}

impl LibraryStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            LibraryStatus::Reading => "reading",
            LibraryStatus::Completed => "completed",
            LibraryStatus::Planning => "planning",
            LibraryStatus::Dropped => "dropped",
            LibraryStatus::Paused => "paused",
        }
    }
}

impl std::str::FromStr for LibraryStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "reading" => Ok(LibraryStatus::Reading),
            "completed" => Ok(LibraryStatus::Completed),
            "planning" => Ok(LibraryStatus::Planning),
            "dropped" => Ok(LibraryStatus::Dropped),
            "paused" => Ok(LibraryStatus::Paused),
            other => Err(format!("unknown library status '{}'", other)),
        }
    }
}

/// Metadata enrichment state for a library entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MetadataStatus {
    Pending,
    Enriched,
    Unavailable,
    Failed,
}

impl MetadataStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetadataStatus::Pending => "pending",
            MetadataStatus::Enriched => "enriched",
            MetadataStatus::Unavailable => "unavailable",
            MetadataStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for MetadataStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(MetadataStatus::Pending),
            "enriched" => Ok(MetadataStatus::Enriched),
            "unavailable" => Ok(MetadataStatus::Unavailable),
            "failed" => Ok(MetadataStatus::Failed),
            other => Err(format!("unknown metadata status '{}'", other)),
        }
    }
}

/// Kind of a normalized chapter label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChapterKind {
    Normal,
    Special,
    Extra,
}

impl ChapterKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChapterKind::Normal => "normal",
            ChapterKind::Special => "special",
            ChapterKind::Extra => "extra",
        }
    }
}

/// Why a crawl is being requested. Drives job priority in the gatekeeper.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CrawlReason {
    UserRequest,
    GapRecovery,
    Periodic,
    Backfill,
}

impl CrawlReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            CrawlReason::UserRequest => "user_request",
            CrawlReason::GapRecovery => "gap_recovery",
            CrawlReason::Periodic => "periodic",
            CrawlReason::Backfill => "backfill",
        }
    }
}

/// Append-only activity event kinds with their scoring weights.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityEventType {
    ChapterDetected,
    ChapterSourceAdded,
    SearchImpression,
    ChapterRead,
    SeriesFollowed,
}

impl ActivityEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ActivityEventType::ChapterDetected => "chapter_detected",
            ActivityEventType::ChapterSourceAdded => "chapter_source_added",
            ActivityEventType::SearchImpression => "search_impression",
            ActivityEventType::ChapterRead => "chapter_read",
            ActivityEventType::SeriesFollowed => "series_followed",
        }
    }

    /// Contribution of one event to a series' activity score.
    pub fn weight(&self) -> i32 {
        match self {
            ActivityEventType::ChapterDetected => 1,
            ActivityEventType::ChapterSourceAdded => 2,
            ActivityEventType::SearchImpression => 5,
            ActivityEventType::ChapterRead => 50,
            ActivityEventType::SeriesFollowed => 100,
        }
    }
}

impl std::str::FromStr for ActivityEventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chapter_detected" => Ok(ActivityEventType::ChapterDetected),
            "chapter_source_added" => Ok(ActivityEventType::ChapterSourceAdded),
            "search_impression" => Ok(ActivityEventType::SearchImpression),
            "chapter_read" => Ok(ActivityEventType::ChapterRead),
            "series_followed" => Ok(ActivityEventType::SeriesFollowed),
            other => Err(format!("unknown activity event type '{}'", other)),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn test_source_name_roundtrip() {
        for name in SourceName::all() {
            let parsed = SourceName::from_str(name.as_str()).unwrap();
            assert_eq!(*name, parsed);
        }
    }

    #[test]
    fn test_source_name_serde_lowercase() {
        let json = serde_json::to_string(&SourceName::MangaDex).unwrap();
        assert_eq!(json, "\"mangadex\"");
        let back: SourceName = serde_json::from_str("\"comick\"").unwrap();
        assert_eq!(back, SourceName::Comick);
    }

    #[test]
    fn test_activity_weights() {
        assert_eq!(ActivityEventType::ChapterDetected.weight(), 1);
        assert_eq!(ActivityEventType::ChapterSourceAdded.weight(), 2);
        assert_eq!(ActivityEventType::SearchImpression.weight(), 5);
        assert_eq!(ActivityEventType::ChapterRead.weight(), 50);
        assert_eq!(ActivityEventType::SeriesFollowed.weight(), 100);
    }

    #[test]
    fn test_sync_priority_parse_rejects_unknown() {
        assert!(SyncPriority::from_str("tepid").is_err());
    }

    #[test]
    fn test_library_status_roundtrip() {
        for s in ["reading", "completed", "planning", "dropped", "paused"] {
            assert_eq!(LibraryStatus::from_str(s).unwrap().as_str(), s);
        }
    }

    #[test]
    fn test_catalog_tier_parse() {
        assert_eq!(CatalogTier::from_str("A").unwrap(), CatalogTier::A);
        assert!(CatalogTier::from_str("D").is_err());
    }
}
