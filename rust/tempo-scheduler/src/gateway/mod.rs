//! HTTP management surface.
//!
//! - `/health`, `/ready`: liveness and readiness
//! - `/api/v1/schedules`: schedule CRUD, manual runs, quit report
//! - `/api/v1/schedule-runs`: run history and completion reports
//! - `/api/v1/schedules/events`: SSE stream of trigger events

pub mod error;
pub mod events;
pub mod health;
pub mod runs;
pub mod schedules;

pub use error::{ApiError, ApiResult};

use axum::Router;

use crate::AppState;

/// Router with every management route.
pub fn create_router() -> Router<AppState> {
    Router::new()
        .merge(health::router())
        .merge(schedules::router())
        .merge(runs::router())
        .merge(events::router())
}
