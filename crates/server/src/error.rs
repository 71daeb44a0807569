//! The single HTTP error responder.
//!
//! Every handler funnels failures through [`ApiError`]; the response body
//! is always `{error, code, requestId}`. The request id comes from a task
//! local installed by the request-id middleware.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Serialize;
use thiserror::Error;

use mangatrack_progress::ProgressError;
use mangatrack_store::StoreError;

tokio::task_local! {
    /// Request id for the in-flight request (set by middleware).
    pub static REQUEST_ID: String;
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),

    #[error("authentication required")]
    Unauthorized,

    #[error("{0}")]
    Forbidden(&'static str),

    #[error("not found")]
    NotFound,

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("payload too large")]
    PayloadTooLarge,

    #[error("unsupported media type")]
    UnsupportedMediaType,

    #[error("rate limited")]
    RateLimited { retry_after_secs: u64 },

    #[error("internal error")]
    Internal(String),
}

impl ApiError {
    fn status(&self) -> StatusCode {
        match self {
            ApiError::Validation(_) => StatusCode::BAD_REQUEST,
            ApiError::Unauthorized => StatusCode::UNAUTHORIZED,
            ApiError::Forbidden(_) => StatusCode::FORBIDDEN,
            ApiError::NotFound => StatusCode::NOT_FOUND,
            ApiError::Conflict(_) => StatusCode::CONFLICT,
            ApiError::PayloadTooLarge => StatusCode::PAYLOAD_TOO_LARGE,
            ApiError::UnsupportedMediaType => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ApiError::RateLimited { .. } => StatusCode::TOO_MANY_REQUESTS,
            ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn code(&self) -> &'static str {
        match self {
            ApiError::Validation(_) => "validation_error",
            ApiError::Unauthorized => "unauthorized",
            ApiError::Forbidden(_) => "forbidden",
            ApiError::NotFound => "not_found",
            ApiError::Conflict(_) => "conflict",
            ApiError::PayloadTooLarge => "payload_too_large",
            ApiError::UnsupportedMediaType => "unsupported_media_type",
            ApiError::RateLimited { .. } => "rate_limited",
            ApiError::Internal(_) => "internal_error",
        }
    }
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
    code: &'static str,
    #[serde(rename = "requestId")]
    request_id: String,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        if let ApiError::Internal(detail) = &self {
            // Details are logged, never returned.
            tracing::error!(error = %detail, "internal error");
        }
        let request_id = REQUEST_ID.try_with(|id| id.clone()).unwrap_or_default();
        let body = ErrorBody {
            error: self.to_string(),
            code: self.code(),
            request_id,
        };
        let mut response = (self.status(), Json(body)).into_response();
        if let ApiError::RateLimited { retry_after_secs } = self {
            if let Ok(value) = retry_after_secs.to_string().parse() {
                response.headers_mut().insert("Retry-After", value);
            }
        }
        response
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound(_) => ApiError::NotFound,
            StoreError::Duplicate(what) => ApiError::Conflict(what),
            StoreError::Invalid { field, message } => {
                ApiError::Validation(format!("{}: {}", field, message))
            }
            StoreError::Database(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<ProgressError> for ApiError {
    fn from(e: ProgressError) -> Self {
        match e {
            ProgressError::EntryNotFound => ApiError::NotFound,
            ProgressError::RateLimited => ApiError::RateLimited { retry_after_secs: 60 },
            ProgressError::Invalid(msg) => ApiError::Validation(msg),
            ProgressError::Store(e) => e.into(),
            ProgressError::Kvs(e) => ApiError::Internal(e.to_string()),
        }
    }
}

impl From<mangatrack_kvs::KvsError> for ApiError {
    fn from(e: mangatrack_kvs::KvsError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

impl From<mangatrack_queue::QueueError> for ApiError {
    fn from(e: mangatrack_queue::QueueError) -> Self {
        ApiError::Internal(e.to_string())
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_mapping() {
        assert_eq!(ApiError::Validation("x".into()).status(), StatusCode::BAD_REQUEST);
        assert_eq!(ApiError::Unauthorized.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(ApiError::NotFound.status(), StatusCode::NOT_FOUND);
        assert_eq!(ApiError::Conflict("x".into()).status(), StatusCode::CONFLICT);
        assert_eq!(
            ApiError::RateLimited { retry_after_secs: 1 }.status(),
            StatusCode::TOO_MANY_REQUESTS
        );
    }

    #[test]
    fn test_store_error_conversion() {
        let err: ApiError = StoreError::Duplicate("library entry".into()).into();
        assert!(matches!(err, ApiError::Conflict(_)));
        let err: ApiError = StoreError::NotFound(uuid::Uuid::new_v4()).into();
        assert!(matches!(err, ApiError::NotFound));
    }

    #[tokio::test]
    async fn test_rate_limited_sets_retry_after() {
        let response = ApiError::RateLimited { retry_after_secs: 30 }.into_response();
        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers().get("Retry-After").unwrap(), "30");
    }
}
