//! Live timer registry.
//!
//! Maps schedule ids to live [`TimerHandle`]s and keeps each schedule's
//! persisted `next_run_at` in line with its timer. Every mutation cancels
//! before installing, so at most one timer exists per schedule.
//!
//! The registry also fences deletions. A schedule is retired while its
//! deletion runs and released afterwards; publishing a trigger holds the
//! publish gate and checks both the retired set and the stored run, so no
//! trigger for a schedule goes out once its deletion has begun.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::{RwLock as AsyncRwLock, mpsc};

use super::timer::{CronEngine, FireCallback, TimerHandle};
use crate::database::ScheduleRepository;
use crate::domain::{RunStatus, SchedulePatch};
use crate::error::SchedulerResult;

/// Result of [`JobRegistry::upsert`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UpsertOutcome {
    /// A timer is live; `next_run_at` was persisted.
    Installed { next_run_at: Option<DateTime<Utc>> },
    /// The schedule is missing, disabled or being deleted; no timer.
    Removed,
    /// The definition is invalid; the schedule is marked `error`.
    Failed { reason: String },
}

/// Summary of a [`JobRegistry::reschedule_all`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RescheduleSummary {
    pub installed: usize,
    pub failed: usize,
}

/// Owner of every live schedule timer.
pub struct JobRegistry {
    store: Arc<dyn ScheduleRepository>,
    engine: Arc<dyn CronEngine>,
    timers: Mutex<HashMap<String, TimerHandle>>,
    /// Schedules whose deletion is in progress.
    retired: Mutex<HashSet<String>>,
    /// Held shared while publishing, exclusively while retiring.
    publish_gate: AsyncRwLock<()>,
    fire_tx: mpsc::UnboundedSender<String>,
}

impl std::fmt::Debug for JobRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobRegistry")
            .field("engine", &self.engine)
            .field("timers", &self.timers.lock().len())
            .field("retired", &self.retired.lock().len())
            .finish_non_exhaustive()
    }
}

impl JobRegistry {
    /// Create a registry. Timers post their schedule id on `fire_tx`.
    pub fn new(
        store: Arc<dyn ScheduleRepository>,
        engine: Arc<dyn CronEngine>,
        fire_tx: mpsc::UnboundedSender<String>,
    ) -> Self {
        Self {
            store,
            engine,
            timers: Mutex::new(HashMap::new()),
            retired: Mutex::new(HashSet::new()),
            publish_gate: AsyncRwLock::new(()),
            fire_tx,
        }
    }

    /// Bring the timer for `schedule_id` in line with storage.
    ///
    /// Definition errors mark the schedule `error` and return
    /// [`UpsertOutcome::Failed`]; only storage failures are returned as `Err`.
    pub async fn upsert(&self, schedule_id: &str) -> SchedulerResult<UpsertOutcome> {
        let schedule = match self.store.get_schedule(schedule_id).await? {
            Some(schedule) if schedule.enabled && !self.is_retired(schedule_id) => schedule,
            _ => {
                self.remove(schedule_id).await?;
                return Ok(UpsertOutcome::Removed);
            }
        };

        self.cancel(schedule_id);

        let fire_tx = self.fire_tx.clone();
        let id = schedule_id.to_string();
        let on_fire: FireCallback = Arc::new(move || {
            if fire_tx.send(id.clone()).is_err() {
                tracing::debug!(schedule_id = %id, "Fire queue closed; dropping timer signal");
            }
        });

        match self
            .engine
            .schedule(&schedule.cron, schedule.timezone.as_deref(), on_fire)
        {
            Ok(handle) => {
                if let Some(previous) = self.timers.lock().insert(schedule_id.to_string(), handle)
                {
                    previous.cancel();
                }
                let next_run_at = self.next_invocation(schedule_id);
                self.store
                    .update_schedule(schedule_id, &SchedulePatch::next_run(next_run_at))
                    .await?;
                tracing::info!(
                    schedule_id = %schedule_id,
                    cron = %schedule.cron,
                    next_run_at = ?next_run_at,
                    "Schedule timer installed"
                );
                Ok(UpsertOutcome::Installed { next_run_at })
            }
            Err(err) => {
                tracing::warn!(
                    schedule_id = %schedule_id,
                    cron = %schedule.cron,
                    timezone = ?schedule.timezone,
                    error = %err,
                    "Failed to schedule job"
                );
                let patch = SchedulePatch {
                    next_run_at: Some(None),
                    last_status: Some(Some(RunStatus::Error)),
                    ..SchedulePatch::default()
                };
                self.store.update_schedule(schedule_id, &patch).await?;
                Ok(UpsertOutcome::Failed {
                    reason: err.to_string(),
                })
            }
        }
    }

    /// Cancel and forget the timer, then clear `next_run_at`.
    ///
    /// Returns whether a timer was live. A missing schedule is tolerated.
    pub async fn remove(&self, schedule_id: &str) -> SchedulerResult<bool> {
        let had_timer = self.cancel(schedule_id);
        self.store
            .update_schedule(schedule_id, &SchedulePatch::next_run(None))
            .await?;
        if had_timer {
            tracing::info!(schedule_id = %schedule_id, "Schedule timer removed");
        }
        Ok(had_timer)
    }

    /// Install timers for every enabled schedule. Failures are isolated.
    pub async fn reschedule_all(&self) -> SchedulerResult<RescheduleSummary> {
        let schedules = self.store.list_enabled_schedules().await?;
        let mut summary = RescheduleSummary::default();

        for schedule in schedules {
            match self.upsert(&schedule.id).await {
                Ok(UpsertOutcome::Installed { .. }) => summary.installed += 1,
                Ok(UpsertOutcome::Removed) => {}
                Ok(UpsertOutcome::Failed { .. }) => summary.failed += 1,
                Err(err) => {
                    summary.failed += 1;
                    tracing::error!(
                        schedule_id = %schedule.id,
                        error = %err,
                        "Failed to reschedule"
                    );
                }
            }
        }

        tracing::info!(
            installed = summary.installed,
            failed = summary.failed,
            "Rescheduled enabled schedules"
        );
        Ok(summary)
    }

    /// Number of enabled schedules in storage.
    pub async fn active_count(&self) -> SchedulerResult<usize> {
        Ok(self.store.count_enabled_schedules().await?)
    }

    /// Next invocation of the live timer, if any.
    pub fn next_invocation(&self, schedule_id: &str) -> Option<DateTime<Utc>> {
        self.timers
            .lock()
            .get(schedule_id)
            .and_then(TimerHandle::next_invocation)
    }

    pub fn has_timer(&self, schedule_id: &str) -> bool {
        self.timers.lock().contains_key(schedule_id)
    }

    /// Number of live timers.
    pub fn live_timers(&self) -> usize {
        self.timers.lock().len()
    }

    /// Mark a schedule as being deleted.
    ///
    /// Waits for publishes already past the gate, so no trigger is published
    /// for the schedule once this returns.
    pub async fn retire(&self, schedule_id: &str) {
        let _gate = self.publish_gate.write().await;
        self.retired.lock().insert(schedule_id.to_string());
    }

    /// Drop the fence set by [`retire`](Self::retire) once the deletion has
    /// finished or failed.
    pub fn release(&self, schedule_id: &str) {
        self.retired.lock().remove(schedule_id);
    }

    pub fn is_retired(&self, schedule_id: &str) -> bool {
        self.retired.lock().contains(schedule_id)
    }

    /// Number of deletions currently in progress.
    pub fn retired_count(&self) -> usize {
        self.retired.lock().len()
    }

    /// Run `publish` for `run_id` unless its schedule is being deleted or the
    /// run is gone from storage.
    ///
    /// A deleted schedule takes its runs with it, so the run lookup covers
    /// deletions that finished and were released before the gate was taken.
    pub async fn publish_if_live<R>(
        &self,
        schedule_id: &str,
        run_id: &str,
        publish: impl FnOnce() -> R,
    ) -> SchedulerResult<Option<R>> {
        let _gate = self.publish_gate.read().await;
        if self.is_retired(schedule_id) || self.store.get_run(run_id).await?.is_none() {
            return Ok(None);
        }
        Ok(Some(publish()))
    }

    /// Cancel every live timer. Returns how many were cancelled.
    pub fn clear(&self) -> usize {
        let timers: Vec<TimerHandle> = self.timers.lock().drain().map(|(_, h)| h).collect();
        for handle in &timers {
            handle.cancel();
        }
        timers.len()
    }

    fn cancel(&self, schedule_id: &str) -> bool {
        match self.timers.lock().remove(schedule_id) {
            Some(handle) => {
                handle.cancel();
                true
            }
            None => false,
        }
    }
}
