//! Queue names, job payloads, and job-id conventions.
//!
//! Job ids double as dedup keys in the queue manager, so their formats are
//! contracts: at most one `sync-<source>` job may be live at a time, ingest
//! replays collapse on `ingest-<source>-<chapter>`, and notification bursts
//! collapse on `notify-<series>`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::entity::{CrawlReason, SourceName};

// ── Queue names ──────────────────────────────────────────────────────

pub const QUEUE_SYNC: &str = "sync-source";
pub const QUEUE_CHECK: &str = "check-source";
pub const QUEUE_INGEST: &str = "chapter-ingest";
pub const QUEUE_FANOUT: &str = "feed-fanout";
pub const QUEUE_NOTIFY: &str = "notification-delivery";
pub const QUEUE_SEARCH: &str = "search-external";
pub const QUEUE_IMPORT: &str = "library-import";
pub const QUEUE_METADATA: &str = "metadata-resolve";

// ── Job ids ──────────────────────────────────────────────────────────

pub fn sync_job_id(series_source_id: Uuid) -> String {
    format!("sync-{}", series_source_id)
}

pub fn ingest_job_id(series_source_id: Uuid, identity_key: &str) -> String {
    format!("ingest-{}-{}", series_source_id, identity_key)
}

pub fn gap_recovery_job_id(series_id: Uuid) -> String {
    format!("gap-recovery-{}", series_id)
}

pub fn fanout_job_id(series_source_id: Uuid, chapter_id: Uuid) -> String {
    format!("fanout-{}-{}", series_source_id, chapter_id)
}

pub fn notify_job_id(series_id: Uuid) -> String {
    format!("notify-{}", series_id)
}

// ── Payloads ─────────────────────────────────────────────────────────

/// `sync-source` / `check-source`: poll one series source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncJob {
    pub series_source_id: Uuid,
    pub reason: CrawlReason,
    /// Gap recovery narrows the poll to specific chapter labels.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_chapters: Option<Vec<String>>,
}

/// One chapter as carried from the poll worker to ingest.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChapterPayload {
    pub number_label: String,
    pub title: Option<String>,
    pub url: String,
    pub source_chapter_id: Option<String>,
    pub published_at: Option<DateTime<Utc>>,
}

/// `chapter-ingest`: fold one scraped chapter into the logical graph.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestJob {
    pub series_id: Uuid,
    pub series_source_id: Uuid,
    pub source_name: SourceName,
    pub chapter: ChapterPayload,
    /// Set on gap-recovery re-ingestion; changes `detected_at` ordering.
    #[serde(default)]
    pub recovery: bool,
}

/// `feed-fanout`: invalidate follower feed caches for a feed mutation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FanoutJob {
    pub series_id: Uuid,
    pub series_source_id: Uuid,
    pub chapter_id: Uuid,
    pub chapter_number: String,
}

/// `notification-delivery`: one collapsed per-series chapter notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotifyJob {
    pub series_id: Uuid,
    pub chapter_id: Uuid,
    pub chapter_number: String,
}

/// `search-external`: external discovery search for a normalized query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchJob {
    pub normalized_query: String,
}

/// One entry of a `library-import` job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportEntry {
    pub url: String,
    pub title: Option<String>,
    pub external_id: Option<String>,
}

/// `library-import`: create library entries from an uploaded list.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ImportJobPayload {
    pub import_id: Uuid,
    pub user_id: Uuid,
    pub source: String,
    pub entries: Vec<ImportEntry>,
}

/// `metadata-resolve`: (re)try metadata enrichment for a library entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetadataJob {
    pub entry_id: Uuid,
    pub user_id: Uuid,
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_job_id_formats() {
        let source = Uuid::nil();
        assert_eq!(
            sync_job_id(source),
            "sync-00000000-0000-0000-0000-000000000000"
        );
        assert_eq!(
            ingest_job_id(source, "10.5"),
            "ingest-00000000-0000-0000-0000-000000000000-10.5"
        );
        assert!(gap_recovery_job_id(source).starts_with("gap-recovery-"));
        assert!(notify_job_id(source).starts_with("notify-"));
    }

    #[test]
    fn test_sync_job_roundtrip() {
        let job = SyncJob {
            series_source_id: Uuid::new_v4(),
            reason: CrawlReason::GapRecovery,
            target_chapters: Some(vec!["2".to_string()]),
        };
        let json = serde_json::to_string(&job).unwrap();
        let back: SyncJob = serde_json::from_str(&json).unwrap();
        assert_eq!(back.series_source_id, job.series_source_id);
        assert_eq!(back.reason, CrawlReason::GapRecovery);
        assert_eq!(back.target_chapters.as_deref(), Some(&["2".to_string()][..]));
    }

    #[test]
    fn test_ingest_job_defaults_recovery_false() {
        let json = r#"{
            "series_id": "00000000-0000-0000-0000-000000000000",
            "series_source_id": "00000000-0000-0000-0000-000000000000",
            "source_name": "mangadex",
            "chapter": {"number_label": "1", "title": null, "url": "u",
                        "source_chapter_id": null, "published_at": null}
        }"#;
        let job: IngestJob = serde_json::from_str(json).unwrap();
        assert!(!job.recovery);
    }
}
