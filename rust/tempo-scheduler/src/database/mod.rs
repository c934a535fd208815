//! Schedule store backends.
//!
//! - [`InMemoryScheduleStore`]: process-local, used by tests and `":memory:"`
//! - [`SqliteScheduleStore`]: embedded `SQLite` file for desktop deployments

pub mod repository;
pub mod sqlite;

use std::sync::Arc;

pub use repository::{InMemoryScheduleStore, ScheduleRepository};
pub use sqlite::SqliteScheduleStore;

use crate::config::DatabaseConfig;

/// Open the store selected by configuration.
pub async fn open_store(config: &DatabaseConfig) -> anyhow::Result<Arc<dyn ScheduleRepository>> {
    if config.path == ":memory:" {
        tracing::warn!("Using in-memory schedule store; schedules will not survive a restart");
        return Ok(Arc::new(InMemoryScheduleStore::new()));
    }
    Ok(Arc::new(SqliteScheduleStore::open(&config.path).await?))
}
