//! Domain-focused API endpoint modules.
//!
//! Each sub-module owns a single responsibility area; shared helpers live
//! here in mod.rs.

mod feed;
mod health;
mod library;
mod series;
mod users;

pub use feed::{feed_activity, feed_seen};
pub use health::health;
pub use library::{
    library_add, library_bulk_patch, library_delete, library_import, library_list, library_patch,
    library_progress, library_retry_metadata,
};
pub use series::{
    series_attach_source, series_chapters, series_discover, series_search, series_trending,
};
pub use users::{users_me, users_me_delete, users_me_patch};

use crate::error::ApiError;

/// Clamp-and-validate a limit query parameter.
pub(crate) fn validate_limit(limit: Option<i64>, default: i64, max: i64) -> Result<i64, ApiError> {
    match limit {
        None => Ok(default),
        Some(l) if (1..=max).contains(&l) => Ok(l),
        Some(l) => Err(ApiError::Validation(format!("limit {} out of range 1..={}", l, max))),
    }
}

pub(crate) fn validate_offset(offset: Option<i64>) -> Result<i64, ApiError> {
    match offset {
        None => Ok(0),
        Some(o) if o >= 0 => Ok(o),
        Some(o) => Err(ApiError::Validation(format!("offset {} is negative", o))),
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_limit() {
        assert_eq!(validate_limit(None, 30, 100).unwrap(), 30);
        assert_eq!(validate_limit(Some(100), 30, 100).unwrap(), 100);
        assert!(validate_limit(Some(0), 30, 100).is_err());
        assert!(validate_limit(Some(101), 30, 100).is_err());
    }

    #[test]
    fn test_validate_offset() {
        assert_eq!(validate_offset(None).unwrap(), 0);
        assert_eq!(validate_offset(Some(40)).unwrap(), 40);
        assert!(validate_offset(Some(-1)).is_err());
    }
}
