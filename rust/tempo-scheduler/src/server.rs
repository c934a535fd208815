//! Application assembly.

use std::sync::Arc;

use axum::Router;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};

use crate::config::AppConfig;
use crate::database::open_store;
use crate::gateway;
use crate::log_init_step;
use crate::logging::OpTimer;
use crate::scheduler::{CronEngine, Scheduler, TokioCronEngine};
use crate::AppState;

const INIT_STEPS: u32 = 3;

/// Open the store, start the scheduler and build the router.
pub async fn create_app(config: AppConfig) -> anyhow::Result<(Router, AppState)> {
    let overall_timer = OpTimer::new("server", "initialization");

    // [1/3] Schedule store
    let step_timer = OpTimer::new("database", "open");
    let store = open_store(&config.database).await;
    step_timer.finish_with_result(store.as_ref());
    let store = store?;
    log_init_step!(1, INIT_STEPS, "Schedule store", config.database.path);

    // [2/3] Scheduler
    let step_timer = OpTimer::new("scheduler", "start");
    let engine: Arc<dyn CronEngine> = Arc::new(TokioCronEngine::new());
    let scheduler = Scheduler::start(store, engine, &config.scheduler).await;
    step_timer.finish_with_result(scheduler.as_ref());
    let scheduler = Arc::new(scheduler?);
    log_init_step!(
        2,
        INIT_STEPS,
        "Scheduler",
        format!("{} timers live", scheduler.registry().live_timers())
    );

    // [3/3] Router
    let state = AppState {
        config: Arc::new(config),
        scheduler,
    };
    let app = create_router(state.clone());
    log_init_step!(3, INIT_STEPS, "Router", "routes + middleware configured");

    overall_timer.finish();
    Ok((app, state))
}

/// Build the HTTP router for an existing state.
pub fn create_router(state: AppState) -> Router {
    gateway::create_router()
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
