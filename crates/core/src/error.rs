use thiserror::Error;

/// Top-level error for cross-crate plumbing. Crate-local layers define their
/// own richer enums and convert into this at binary seams.
#[derive(Error, Debug)]
pub enum MangaTrackError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialize(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("kvs error: {0}")]
    Kvs(String),

    #[error("database error: {0}")]
    Database(String),

    #[error("queue error: {0}")]
    Queue(String),

    #[error("source error: {0}")]
    Source(String),

    #[error("{0}")]
    Other(String),
}
