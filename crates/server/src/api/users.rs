//! Current-user endpoints.

use std::sync::Arc;

use axum::extract::State;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::Deserialize;

use mangatrack_progress::trust::effective_xp;
use mangatrack_store::users::UserStore;

use crate::auth::AuthUser;
use crate::error::ApiError;
use crate::state::AppState;

fn valid_username(name: &str) -> bool {
    (3..=30).contains(&name.len())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

pub async fn users_me(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    let row = UserStore::get(&state.pool, user.id)
        .await?
        .ok_or(ApiError::NotFound)?;
    Ok(Json(serde_json::json!({
        "id": row.id,
        "username": row.username,
        "email": row.email,
        "xp": row.xp,
        "effective_xp": effective_xp(row.xp, row.trust_score),
        "level": row.level,
        "streak_days": row.streak_days,
        "longest_streak": row.longest_streak,
        "chapters_read": row.chapters_read,
        "season_xp": row.season_xp,
        "current_season": row.current_season,
        "is_premium": row.is_premium,
        "feed_last_seen_at": row.feed_last_seen_at,
        "created_at": row.created_at,
    }))
    .into_response())
}

#[derive(Deserialize)]
pub struct MePatchBody {
    username: Option<String>,
    email: Option<String>,
}

pub async fn users_me_patch(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
    Json(body): Json<MePatchBody>,
) -> Result<Response, ApiError> {
    if let Some(username) = &body.username {
        if !valid_username(username) {
            return Err(ApiError::Validation(
                "username must be 3..=30 characters of [a-zA-Z0-9_]".to_string(),
            ));
        }
    }
    if let Some(email) = &body.email {
        if !email.contains('@') || email.len() > 254 {
            return Err(ApiError::Validation("email is invalid".to_string()));
        }
    }

    let row = UserStore::update_profile(
        &state.pool,
        user.id,
        body.username.as_deref(),
        body.email.as_deref(),
    )
    .await?;
    Ok(Json(row).into_response())
}

pub async fn users_me_delete(
    State(state): State<Arc<AppState>>,
    user: AuthUser,
) -> Result<Response, ApiError> {
    UserStore::soft_delete(&state.pool, user.id).await?;
    Ok(Json(serde_json::json!({"deleted": true})).into_response())
}

// ── Tests ────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_username_validation() {
        assert!(valid_username("reader_01"));
        assert!(valid_username("abc"));
        assert!(!valid_username("ab"));
        assert!(!valid_username("has space"));
        assert!(!valid_username("emoji🙂"));
        assert!(!valid_username(&"x".repeat(31)));
    }
}
