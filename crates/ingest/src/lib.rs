//! Chapter ingestion: normalization, deduplication into the logical
//! chapter graph, feed writes, and fan-out.

pub mod fanout;
pub mod normalize;
pub mod worker;

pub use fanout::FanoutWorker;
pub use normalize::{
    canonical_number, identity_key, missing_previous_integer, normalize_label, title_hash20,
    NormalizedChapter,
};
pub use worker::ChapterIngestor;
