//! Service health: database and KVS probes.

use std::sync::Arc;

use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use chrono::Utc;
use serde::Serialize;

use crate::state::AppState;

#[derive(Serialize)]
struct ServiceStatuses {
    database: &'static str,
    redis: &'static str,
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    services: ServiceStatuses,
    uptime: u64,
    timestamp: String,
}

pub async fn health(State(state): State<Arc<AppState>>) -> Response {
    let database_up = sqlx::query("SELECT 1").execute(&state.pool).await.is_ok();
    let redis_up = state.kvs.get("health:probe").await.is_ok();

    let all_up = database_up && redis_up;
    let body = HealthResponse {
        status: if all_up { "ok" } else { "degraded" },
        services: ServiceStatuses {
            database: if database_up { "up" } else { "down" },
            redis: if redis_up { "up" } else { "down" },
        },
        uptime: state.uptime_secs(),
        timestamp: Utc::now().to_rfc3339(),
    };
    let code = if all_up { StatusCode::OK } else { StatusCode::SERVICE_UNAVAILABLE };
    (code, Json(body)).into_response()
}
