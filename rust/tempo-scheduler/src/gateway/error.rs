//! HTTP error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Serialize;

use crate::error::SchedulerError;

/// JSON error body: `{"error": "...", "message": "..."}`.
#[derive(Debug, Serialize)]
pub struct ApiError {
    #[serde(skip)]
    pub status: StatusCode,
    pub error: &'static str,
    pub message: String,
}

impl ApiError {
    pub fn new(status: StatusCode, error: &'static str, message: impl Into<String>) -> Self {
        Self {
            status,
            error,
            message: message.into(),
        }
    }
}

impl From<SchedulerError> for ApiError {
    fn from(err: SchedulerError) -> Self {
        let (status, code) = match &err {
            SchedulerError::ScheduleNotFound(_) => (StatusCode::NOT_FOUND, "schedule_not_found"),
            SchedulerError::RunNotFound(_) => (StatusCode::NOT_FOUND, "run_not_found"),
            SchedulerError::InvalidCron { .. }
            | SchedulerError::InvalidTimezone(_)
            | SchedulerError::NoUpcomingRun(_) => (StatusCode::BAD_REQUEST, "invalid_schedule"),
            SchedulerError::InvalidRunStatus(_) => (StatusCode::BAD_REQUEST, "invalid_status"),
            SchedulerError::InvalidTransition { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_transition")
            }
            SchedulerError::InvalidRunUpdate { .. } => {
                (StatusCode::BAD_REQUEST, "invalid_run_update")
            }
            SchedulerError::Storage(e) => {
                tracing::error!(error = %e, "Storage failure while handling request");
                (StatusCode::INTERNAL_SERVER_ERROR, "storage_error")
            }
        };
        Self::new(status, code, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self)).into_response()
    }
}

/// Result type for handlers.
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::RunStatus;

    #[test]
    fn test_status_mapping() {
        let cases = [
            (
                SchedulerError::ScheduleNotFound("s".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                SchedulerError::RunNotFound("r".to_string()),
                StatusCode::NOT_FOUND,
            ),
            (
                SchedulerError::InvalidRunStatus(RunStatus::Running),
                StatusCode::BAD_REQUEST,
            ),
            (
                SchedulerError::Storage(anyhow::anyhow!("disk I/O error")),
                StatusCode::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (err, expected) in cases {
            assert_eq!(ApiError::from(err).status, expected);
        }
    }
}
