//! Session authentication.
//!
//! Sessions are bearer tokens looked up in the KVS (`sess:<token>` → user
//! id) with a sliding TTL. The auth provider that mints sessions is an
//! external collaborator; this layer only validates them.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::error::ApiError;
use crate::state::AppState;

/// Sliding session lifetime.
const SESSION_TTL_MS: u64 = 30 * 24 * 60 * 60 * 1000;

pub fn session_key(token: &str) -> String {
    format!("sess:{}", token)
}

/// The authenticated user for a request. Extracting it rejects with 401
/// when the bearer token is missing, unknown, or expired.
#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub id: Uuid,
}

/// Optional authentication: `None` instead of 401 for public surfaces
/// that behave differently for logged-in users.
#[derive(Debug, Clone, Copy)]
pub struct MaybeAuthUser(pub Option<AuthUser>);

fn bearer_token(parts: &Parts) -> Option<&str> {
    parts
        .headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .filter(|t| !t.is_empty())
}

async fn lookup(state: &AppState, token: &str) -> Result<Option<AuthUser>, ApiError> {
    let key = session_key(token);
    let Some(raw) = state.kvs.get(&key).await? else {
        return Ok(None);
    };
    let id = Uuid::parse_str(&raw).map_err(|_| ApiError::Unauthorized)?;
    // Sliding expiry: any authenticated request refreshes the session.
    state.kvs.pexpire(&key, SESSION_TTL_MS).await.ok();
    Ok(Some(AuthUser { id }))
}

impl FromRequestParts<Arc<AppState>> for AuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        let token = bearer_token(parts).ok_or(ApiError::Unauthorized)?;
        lookup(state, token).await?.ok_or(ApiError::Unauthorized)
    }
}

impl FromRequestParts<Arc<AppState>> for MaybeAuthUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, Self::Rejection> {
        match bearer_token(parts) {
            None => Ok(MaybeAuthUser(None)),
            Some(token) => Ok(MaybeAuthUser(lookup(state, token).await?)),
        }
    }
}
