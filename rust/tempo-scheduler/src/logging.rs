//! Logging setup and startup helpers.

use std::time::Instant;

use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::{LogFormat, LoggingConfig};

/// Install the global subscriber.
///
/// `RUST_LOG` wins over the configured level. Returns an error if a
/// subscriber is already installed.
pub fn init_tracing(config: &LoggingConfig) -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().or_else(|_| EnvFilter::try_new(&config.level))?;
    let registry = tracing_subscriber::registry().with(filter);

    match config.format {
        LogFormat::Pretty => registry
            .with(tracing_subscriber::fmt::layer().with_target(false))
            .try_init()?,
        LogFormat::Json => registry
            .with(
                tracing_subscriber::fmt::layer()
                    .json()
                    .with_current_span(false),
            )
            .try_init()?,
    }
    Ok(())
}

/// Measures a named operation and logs its duration.
///
/// ```rust,ignore
/// let timer = OpTimer::new("database", "open");
/// let store = open_store(&config.database).await;
/// timer.finish_with_result(store.as_ref());
/// ```
#[derive(Debug)]
pub struct OpTimer {
    component: &'static str,
    operation: &'static str,
    start: Instant,
}

impl OpTimer {
    #[must_use]
    pub fn new(component: &'static str, operation: &'static str) -> Self {
        tracing::debug!(component, operation, "Operation started");
        Self {
            component,
            operation,
            start: Instant::now(),
        }
    }

    pub fn elapsed_ms(&self) -> u128 {
        self.start.elapsed().as_millis()
    }

    pub fn finish(self) {
        tracing::info!(
            component = self.component,
            operation = self.operation,
            duration_ms = self.elapsed_ms(),
            "Operation completed"
        );
    }

    /// Log success or the error, with the duration either way.
    pub fn finish_with_result<T, E: std::fmt::Display>(self, result: Result<&T, &E>) {
        let duration_ms = self.elapsed_ms();
        match result {
            Ok(_) => tracing::info!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                "Operation completed"
            ),
            Err(e) => tracing::error!(
                component = self.component,
                operation = self.operation,
                duration_ms,
                error = %e,
                "Operation failed"
            ),
        }
    }
}

/// Log a numbered startup step.
///
/// ```rust,ignore
/// log_init_step!(2, 4, "Schedule store", "data/tempo.db");
/// ```
#[macro_export]
macro_rules! log_init_step {
    ($step:expr, $total:expr, $name:expr, $detail:expr) => {
        tracing::info!(
            step = $step,
            total = $total,
            "[{}/{}] {} - {}",
            $step,
            $total,
            $name,
            $detail
        );
    };
    ($step:expr, $total:expr, $name:expr) => {
        tracing::info!(step = $step, total = $total, "[{}/{}] {}", $step, $total, $name);
    };
}
