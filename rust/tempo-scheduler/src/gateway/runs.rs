//! Schedule run endpoints, used by the execution consumer to report back.

use axum::{
    Json, Router,
    extract::{Path, Query, State},
    routing::{get, patch, post},
};
use serde::Deserialize;

use super::ApiResult;
use crate::AppState;
use crate::domain::{RunCompletion, RunPatch, ScheduleRun, ScheduleRunWithSchedule};

pub fn router() -> Router<AppState> {
    Router::new()
        .route("/api/v1/schedule-runs", get(list_runs))
        .route("/api/v1/schedule-runs/{id}", patch(update_run))
        .route("/api/v1/schedule-runs/{id}/complete", post(complete_run))
        .route(
            "/api/v1/schedule-runs/{id}/conversation",
            post(attach_conversation),
        )
}

#[derive(Debug, Deserialize)]
pub struct ListRunsQuery {
    pub schedule_id: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct AttachConversationRequest {
    pub conversation_id: String,
}

/// `GET /api/v1/schedule-runs?schedule_id=...`
pub async fn list_runs(
    State(state): State<AppState>,
    Query(query): Query<ListRunsQuery>,
) -> ApiResult<Json<Vec<ScheduleRunWithSchedule>>> {
    let runs = state
        .scheduler
        .list_runs(query.schedule_id.as_deref())
        .await?;
    Ok(Json(runs))
}

/// `PATCH /api/v1/schedule-runs/{id}`
pub async fn update_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(patch): Json<RunPatch>,
) -> ApiResult<Json<ScheduleRun>> {
    Ok(Json(state.scheduler.update_run(&id, patch).await?))
}

/// `POST /api/v1/schedule-runs/{id}/complete`
pub async fn complete_run(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(completion): Json<RunCompletion>,
) -> ApiResult<Json<ScheduleRun>> {
    Ok(Json(state.scheduler.complete_run(&id, completion).await?))
}

/// `POST /api/v1/schedule-runs/{id}/conversation`
pub async fn attach_conversation(
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<AttachConversationRequest>,
) -> ApiResult<Json<ScheduleRun>> {
    let run = state
        .scheduler
        .attach_conversation(&id, &req.conversation_id)
        .await?;
    Ok(Json(run))
}
