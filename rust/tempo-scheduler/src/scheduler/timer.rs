//! Cron timer capability and its tokio implementation.
//!
//! [`CronEngine`] is the seam between the job registry and whatever drives
//! wall-clock timers. [`TokioCronEngine`] runs one task per timer.

use std::fmt;
use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;

use super::cron::{CronSchedule, next_occurrence};
use crate::error::{SchedulerError, SchedulerResult};

/// Longest single sleep, so clock jumps and system sleep are noticed.
const MAX_SLEEP_SLICE: StdDuration = StdDuration::from_secs(60);

/// Callback invoked each time a timer fires.
pub type FireCallback = Arc<dyn Fn() + Send + Sync>;

/// Capability to evaluate cron expressions and install timers.
pub trait CronEngine: Send + Sync + fmt::Debug {
    /// Next instant strictly after `from` at which `cron` fires in `timezone`.
    fn compute_next(
        &self,
        cron: &str,
        timezone: Option<&str>,
        from: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>>;

    /// Install a timer calling `on_fire` at every occurrence of `cron`.
    fn schedule(
        &self,
        cron: &str,
        timezone: Option<&str>,
        on_fire: FireCallback,
    ) -> SchedulerResult<TimerHandle>;
}

/// Handle to a live timer.
///
/// Clones share state. Cancellation is idempotent.
#[derive(Clone)]
pub struct TimerHandle {
    token: CancellationToken,
    next: Arc<Mutex<Option<DateTime<Utc>>>>,
}

impl TimerHandle {
    /// Create a handle whose first invocation is `next`.
    #[must_use]
    pub fn new(next: Option<DateTime<Utc>>) -> Self {
        Self {
            token: CancellationToken::new(),
            next: Arc::new(Mutex::new(next)),
        }
    }

    /// The instant this timer fires next, or `None` once cancelled or exhausted.
    pub fn next_invocation(&self) -> Option<DateTime<Utc>> {
        if self.token.is_cancelled() {
            return None;
        }
        *self.next.lock()
    }

    /// Record the following invocation. Engines call this before firing.
    pub fn set_next_invocation(&self, next: Option<DateTime<Utc>>) {
        *self.next.lock() = next;
    }

    /// Stop the timer.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }
}

impl fmt::Debug for TimerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimerHandle")
            .field("next", &*self.next.lock())
            .field("cancelled", &self.token.is_cancelled())
            .finish()
    }
}

/// Timer engine backed by tokio tasks.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioCronEngine;

impl TokioCronEngine {
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl CronEngine for TokioCronEngine {
    fn compute_next(
        &self,
        cron: &str,
        timezone: Option<&str>,
        from: DateTime<Utc>,
    ) -> SchedulerResult<DateTime<Utc>> {
        next_occurrence(cron, timezone, from)
    }

    fn schedule(
        &self,
        cron: &str,
        timezone: Option<&str>,
        on_fire: FireCallback,
    ) -> SchedulerResult<TimerHandle> {
        let expr = CronSchedule::parse(cron, timezone)?;
        let first = expr
            .next_after(&Utc::now())
            .ok_or_else(|| SchedulerError::NoUpcomingRun(cron.to_string()))?;

        let handle = TimerHandle::new(Some(first));
        let task_handle = handle.clone();
        tokio::spawn(async move {
            loop {
                let Some(target) = task_handle.next_invocation() else {
                    break;
                };
                if !sleep_until(target, &task_handle.token).await {
                    break;
                }

                // Missed occurrences (system sleep) collapse into this fire.
                let base = Utc::now().max(target);
                let following = expr.next_after(&base);
                task_handle.set_next_invocation(following);
                on_fire();
                if following.is_none() {
                    tracing::warn!(cron = %expr, "Cron timer has no further occurrences");
                    break;
                }
            }
        });

        Ok(handle)
    }
}

/// Sleep until `target` in bounded slices. Returns `false` if cancelled.
async fn sleep_until(target: DateTime<Utc>, token: &CancellationToken) -> bool {
    loop {
        let now = Utc::now();
        if now >= target {
            return !token.is_cancelled();
        }
        let remaining = (target - now)
            .to_std()
            .unwrap_or(StdDuration::ZERO)
            .min(MAX_SLEEP_SLICE);
        tokio::select! {
            () = token.cancelled() => return false,
            () = tokio::time::sleep(remaining) => {}
        }
    }
}
