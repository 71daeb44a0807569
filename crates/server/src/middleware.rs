//! Request middleware: request ids, CSRF origin check, per-route rate
//! limits.

use std::sync::Arc;

use axum::body::Body;
use axum::extract::Request;
use axum::http::{HeaderValue, Method};
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use uuid::Uuid;

use crate::error::{ApiError, REQUEST_ID};
use crate::state::AppState;

/// Generate a request id, scope it for error bodies, echo it as a header.
pub async fn request_id(request: Request<Body>, next: Next) -> Response {
    let id = Uuid::new_v4().to_string();
    let mut response = REQUEST_ID.scope(id.clone(), next.run(request)).await;
    if let Ok(value) = HeaderValue::from_str(&id) {
        response.headers_mut().insert("X-Request-ID", value);
    }
    response
}

/// CSRF: on mutating requests, a present Origin header must match the
/// Host header. Requests without an Origin (non-browser clients) pass.
pub async fn csrf_origin_check(request: Request<Body>, next: Next) -> Response {
    let mutating = matches!(
        *request.method(),
        Method::POST | Method::PATCH | Method::PUT | Method::DELETE
    );
    if mutating {
        let origin_host = request
            .headers()
            .get("origin")
            .and_then(|v| v.to_str().ok())
            .and_then(|o| url::Url::parse(o).ok())
            .and_then(|u| u.host_str().map(|h| h.to_string()));
        if let Some(origin_host) = origin_host {
            let host = request
                .headers()
                .get("host")
                .and_then(|v| v.to_str().ok())
                .map(|h| h.split(':').next().unwrap_or(h).to_string());
            if host.as_deref() != Some(origin_host.as_str()) {
                return ApiError::Forbidden("origin does not match host").into_response();
            }
        }
    }
    next.run(request).await
}

/// A rate-limit family from the endpoint table.
#[derive(Debug, Clone, Copy)]
pub struct RateFamily {
    pub name: &'static str,
    pub max_per_min: u32,
    /// Key on the session token instead of the client IP.
    pub per_user: bool,
}

pub const FAMILY_DEFAULT: RateFamily =
    RateFamily { name: "default", max_per_min: 120, per_user: true };
pub const FAMILY_PUBLIC: RateFamily =
    RateFamily { name: "public", max_per_min: 30, per_user: false };
pub const FAMILY_LIBRARY_ADD: RateFamily =
    RateFamily { name: "lib_add", max_per_min: 30, per_user: true };
pub const FAMILY_LIBRARY_BULK: RateFamily =
    RateFamily { name: "lib_bulk", max_per_min: 10, per_user: true };
pub const FAMILY_LIBRARY_DELETE: RateFamily =
    RateFamily { name: "lib_del", max_per_min: 30, per_user: true };
pub const FAMILY_IMPORT: RateFamily =
    RateFamily { name: "import", max_per_min: 5, per_user: true };
pub const FAMILY_SEARCH: RateFamily =
    RateFamily { name: "search", max_per_min: 30, per_user: false };
pub const FAMILY_DISCOVER: RateFamily =
    RateFamily { name: "discover", max_per_min: 60, per_user: false };

/// Identify the caller for rate limiting: session token when available
/// (per-user families), client IP otherwise.
fn caller_key(request: &Request<Body>, family: &RateFamily) -> String {
    if family.per_user {
        if let Some(token) = request
            .headers()
            .get("authorization")
            .and_then(|v| v.to_str().ok())
            .and_then(|v| v.strip_prefix("Bearer "))
        {
            return format!("tok:{}", token);
        }
    }
    let ip = request
        .headers()
        .get("x-forwarded-for")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.split(',').next())
        .map(|v| v.trim().to_string())
        .unwrap_or_else(|| "local".to_string());
    format!("ip:{}", ip)
}

/// Enforce one family's budget against the KVS. Degrades open when the
/// KVS is unreachable (the gateway limiter is best-effort).
pub async fn rate_limit(
    state: Arc<AppState>,
    family: RateFamily,
    request: Request<Body>,
    next: Next,
) -> Response {
    let key = format!("api:{}:{}", family.name, caller_key(&request, &family));
    match state.kvs.incr_px(&key, 60_000).await {
        Ok(count) if count > family.max_per_min as i64 => {
            let retry_after_secs = state
                .kvs
                .pttl(&key)
                .await
                .ok()
                .flatten()
                .map(|ms| (ms as u64).div_ceil(1000).max(1))
                .unwrap_or(60);
            ApiError::RateLimited { retry_after_secs }.into_response()
        }
        _ => next.run(request).await,
    }
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn request_with(headers: &[(&str, &str)], method: Method) -> Request<Body> {
        let mut builder = Request::builder().method(method).uri("/api/library");
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        builder.body(Body::empty()).unwrap()
    }

    #[test]
    fn test_caller_key_prefers_token_for_user_families() {
        let req = request_with(
            &[("authorization", "Bearer tok-1"), ("x-forwarded-for", "1.2.3.4")],
            Method::GET,
        );
        assert_eq!(caller_key(&req, &FAMILY_LIBRARY_ADD), "tok:tok-1");
        // IP families ignore the token.
        assert_eq!(caller_key(&req, &FAMILY_SEARCH), "ip:1.2.3.4");
    }

    #[test]
    fn test_caller_key_falls_back_to_ip() {
        let req = request_with(&[("x-forwarded-for", "9.9.9.9, 10.0.0.1")], Method::GET);
        assert_eq!(caller_key(&req, &FAMILY_DEFAULT), "ip:9.9.9.9");
        let req = request_with(&[], Method::GET);
        assert_eq!(caller_key(&req, &FAMILY_DEFAULT), "ip:local");
    }

    #[test]
    fn test_family_budgets_match_endpoint_table() {
        assert_eq!(FAMILY_DEFAULT.max_per_min, 120);
        assert_eq!(FAMILY_PUBLIC.max_per_min, 30);
        assert_eq!(FAMILY_LIBRARY_ADD.max_per_min, 30);
        assert_eq!(FAMILY_LIBRARY_BULK.max_per_min, 10);
        assert_eq!(FAMILY_IMPORT.max_per_min, 5);
        assert_eq!(FAMILY_SEARCH.max_per_min, 30);
        assert_eq!(FAMILY_DISCOVER.max_per_min, 60);
    }
}
