//! Liveness and readiness endpoints.

use axum::{Json, Router, extract::State, routing::get};
use serde::Serialize;

use super::ApiResult;
use crate::AppState;

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/health", get(health_check))
        .route("/ready", get(readiness_check))
}

#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
}

async fn health_check() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}

#[derive(Debug, Serialize)]
struct ReadinessResponse {
    status: &'static str,
    active_schedules: usize,
    live_timers: usize,
    trigger_consumers: usize,
}

/// Ready once storage answers; reports `stopping` after shutdown began.
async fn readiness_check(State(state): State<AppState>) -> ApiResult<Json<ReadinessResponse>> {
    let active_schedules = state.scheduler.active_count().await?;
    let status = if state.scheduler.coordinator().is_shut_down() {
        "stopping"
    } else {
        "ready"
    };
    Ok(Json(ReadinessResponse {
        status,
        active_schedules,
        live_timers: state.scheduler.registry().live_timers(),
        trigger_consumers: state.scheduler.bus().consumer_count(),
    }))
}
