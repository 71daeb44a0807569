pub mod config;
pub mod entity;
pub mod error;
pub mod jobs;

pub use config::Config;
pub use entity::{
    ActivityEventType, CatalogTier, ChapterKind, CrawlReason, LibraryStatus, MetadataStatus,
    SourceName, SourceStatus, SyncPriority,
};
pub use error::MangaTrackError;
