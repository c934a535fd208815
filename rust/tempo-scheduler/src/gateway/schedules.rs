//! Schedule management endpoints.

use axum::{
    Json, Router,
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
};
use serde::Serialize;

use super::ApiResult;
use crate::AppState;
use crate::domain::{NewSchedule, Schedule, SchedulePatch, ScheduleRunWithSchedule};
use crate::scheduler::{FireOutcome, ShutdownReport};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/schedules", get(list_schedules).post(create_schedule))
        .route("/api/v1/schedules/active", get(active_schedules))
        .route(
            "/api/v1/schedules/{id}",
            get(get_schedule)
                .patch(update_schedule)
                .delete(delete_schedule),
        )
        .route("/api/v1/schedules/{id}/run", post(run_schedule))
        .route("/api/v1/schedules/{id}/runs", get(list_schedule_runs))
}

/// Response to a manual run request.
#[derive(Debug, Serialize)]
pub struct RunNowResponse {
    pub success: bool,
    /// False when the schedule is disabled.
    pub triggered: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub run_id: Option<String>,
}

/// `GET /api/v1/schedules`
pub async fn list_schedules(State(state): State<AppState>) -> ApiResult<Json<Vec<Schedule>>> {
    Ok(Json(state.scheduler.list_schedules().await?))
}

/// `POST /api/v1/schedules`
///
/// Invalid cron expressions are stored; the schedule comes back with
/// `last_status: "error"` and no `next_run_at`.
pub async fn create_schedule(
    State(state): State<AppState>,
    Json(req): Json<NewSchedule>,
) -> ApiResult<impl IntoResponse> {
    let schedule = state.scheduler.create_schedule(req).await?;
    Ok((StatusCode::CREATED, Json(schedule)))
}

/// `GET /api/v1/schedules/{id}`
pub async fn get_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.scheduler.get_schedule(&id).await?))
}

/// `PATCH /api/v1/schedules/{id}`
pub async fn update_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<SchedulePatch>,
) -> ApiResult<Json<Schedule>> {
    Ok(Json(state.scheduler.update_schedule(&id, patch).await?))
}

/// `DELETE /api/v1/schedules/{id}`
pub async fn delete_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<StatusCode> {
    state.scheduler.delete_schedule(&id).await?;
    Ok(StatusCode::NO_CONTENT)
}

/// `POST /api/v1/schedules/{id}/run`
pub async fn run_schedule(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<RunNowResponse>> {
    let outcome = state.scheduler.run_now(&id).await?;
    let run_id = match outcome {
        FireOutcome::Triggered { run, .. } => Some(run.id),
        FireOutcome::Skipped => None,
    };
    Ok(Json(RunNowResponse {
        success: true,
        triggered: run_id.is_some(),
        run_id,
    }))
}

/// `GET /api/v1/schedules/{id}/runs`
pub async fn list_schedule_runs(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<Vec<ScheduleRunWithSchedule>>> {
    Ok(Json(state.scheduler.list_runs(Some(&id)).await?))
}

/// `GET /api/v1/schedules/active`
///
/// What the shell shows before quitting.
pub async fn active_schedules(State(state): State<AppState>) -> ApiResult<Json<ShutdownReport>> {
    Ok(Json(state.scheduler.shutdown_report().await?))
}
