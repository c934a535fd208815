//! Tempo Scheduler - recurring task scheduling for a desktop assistant.
//!
//! Turns persisted cron definitions into live timers, publishes a trigger
//! event each time one fires, and tracks every execution attempt from
//! `running` to `success` or `error`.
//!
//! - [`scheduler`]: cron engine, job registry, dispatcher, run tracker
//! - [`events`]: trigger event bus
//! - [`database`]: schedule store backends
//! - [`gateway`]: HTTP management surface
//!
//! # Example
//!
//! ```rust,ignore
//! use tempo_scheduler::{config::AppConfig, server::create_app};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let config = AppConfig::load(None)?;
//!     let (app, _state) = create_app(config).await?;
//!
//!     let listener = tokio::net::TcpListener::bind("127.0.0.1:8765").await?;
//!     axum::serve(listener, app).await?;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod database;
pub mod domain;
pub mod error;
pub mod events;
pub mod gateway;
pub mod logging;
pub mod scheduler;
pub mod server;

use std::sync::Arc;

use config::AppConfig;
use scheduler::Scheduler;

pub use error::{SchedulerError, SchedulerResult};

/// Shared handler state.
#[derive(Debug, Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub scheduler: Arc<Scheduler>,
}
