//! SSE stream of trigger events.
//!
//! Each connection is one consumer on the trigger bus. Events published
//! while no client is connected are not replayed.

use std::convert::Infallible;

use axum::{
    Router,
    extract::State,
    response::sse::{Event, KeepAlive, Sse},
    routing::get,
};
use futures::Stream;

use crate::AppState;

/// SSE event name for trigger events.
pub const TRIGGER_EVENT_NAME: &str = "schedule-trigger";

pub fn router() -> Router<AppState> {
    Router::new().route("/api/v1/schedules/events", get(stream_trigger_events))
}

/// `GET /api/v1/schedules/events`
pub async fn stream_trigger_events(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut subscription = state.scheduler.subscribe();
    tracing::info!(consumer = ?subscription.id(), "Trigger event stream opened");

    let stream = async_stream::stream! {
        while let Some(event) = subscription.recv().await {
            match Event::default().event(TRIGGER_EVENT_NAME).json_data(&event) {
                Ok(sse) => yield Ok(sse),
                Err(e) => tracing::error!(
                    run_id = %event.run_id,
                    error = %e,
                    "Failed to encode trigger event"
                ),
            }
        }
    };

    Sse::new(stream).keep_alive(KeepAlive::default())
}
