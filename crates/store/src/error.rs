//! Store error type shared by all repositories.

use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("not found: {0}")]
    NotFound(Uuid),

    #[error("duplicate: {0}")]
    Duplicate(String),

    #[error("invalid value for {field}: {message}")]
    Invalid { field: &'static str, message: String },

    #[error("database error: {0}")]
    Database(sqlx::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        StoreError::Database(e)
    }
}

impl StoreError {
    /// Map to an HTTP status code for API responses.
    pub fn status_code(&self) -> u16 {
        match self {
            StoreError::NotFound(_) => 404,
            StoreError::Duplicate(_) => 409,
            StoreError::Invalid { .. } => 400,
            StoreError::Database(_) => 500,
        }
    }
}

/// Map a PostgreSQL unique violation (23505) to a friendly `Duplicate` error.
pub fn map_unique_violation(e: sqlx::Error, what: &str) -> StoreError {
    if let sqlx::Error::Database(ref db_err) = e {
        if db_err.code().as_deref() == Some("23505") {
            return StoreError::Duplicate(what.to_string());
        }
    }
    tracing::error!("store database error: {}", e);
    StoreError::Database(e)
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_codes() {
        assert_eq!(StoreError::NotFound(Uuid::new_v4()).status_code(), 404);
        assert_eq!(StoreError::Duplicate("x".into()).status_code(), 409);
        assert_eq!(
            StoreError::Invalid { field: "rating", message: "out of range".into() }.status_code(),
            400
        );
    }

    #[test]
    fn test_non_unique_errors_pass_through() {
        let err = map_unique_violation(sqlx::Error::RowNotFound, "library entry");
        assert!(matches!(err, StoreError::Database(_)));
    }
}
