//! Protocol adapters for external chapter sources.
//!
//! One [`SourceClient`] implementation per source, dispatched through a
//! [`SourceRegistry`]. Adapters classify HTTP failures into the typed
//! [`SourceError`] taxonomy that the source-poll worker uses to drive
//! backoffs, circuit-breaker state, and source status transitions.

pub mod breaker;
pub mod client;
pub mod comick;
pub mod error;
pub mod mangadex;
pub mod registry;
pub mod retry;
pub mod types;

pub use breaker::CircuitBreaker;
pub use client::{is_allowed_source_url, SearchHit, SourceClient};
pub use comick::ComickClient;
pub use error::SourceError;
pub use mangadex::MangaDexClient;
pub use registry::SourceRegistry;
pub use retry::RetryPolicy;
pub use types::{ScrapedChapter, ScrapedLatestUpdate, ScrapedSeries};

pub type SourceResult<T> = Result<T, SourceError>;
