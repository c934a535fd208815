//! Recurring schedule management.
//!
//! [`Scheduler`] wires the pieces together:
//!
//! ```text
//! ScheduleRepository ──► JobRegistry ──(timer fires)──► fire queue
//!                              ▲                           │
//!                              │                           ▼
//!                       management ops            TriggerDispatcher ──► TriggerBus ──► consumers
//!                                                          │
//!                                                          ▼
//!                                                     RunTracker ◄── completion reports
//! ```

pub mod cron;
pub mod dispatcher;
pub mod lifecycle;
pub mod registry;
pub mod shutdown;
pub mod timer;

#[cfg(test)]
pub(crate) mod testing;

pub use cron::{CronSchedule, ScheduleZone};
pub use dispatcher::{FireOutcome, INTERRUPTED_RUN_ERROR, TriggerDispatcher};
pub use lifecycle::{ABANDONED_RUN_ERROR, RunTracker};
pub use registry::{JobRegistry, RescheduleSummary, UpsertOutcome};
pub use shutdown::{ShutdownCoordinator, ShutdownReport};
pub use timer::{CronEngine, FireCallback, TimerHandle, TokioCronEngine};

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::config::SchedulerConfig;
use crate::database::ScheduleRepository;
use crate::domain::{
    NewSchedule, RunCompletion, RunPatch, Schedule, SchedulePatch, ScheduleRun,
    ScheduleRunWithSchedule,
};
use crate::error::{SchedulerError, SchedulerResult};
use crate::events::{TriggerBus, TriggerSubscription};

/// The schedule management surface.
#[derive(Debug)]
pub struct Scheduler {
    store: Arc<dyn ScheduleRepository>,
    registry: Arc<JobRegistry>,
    dispatcher: Arc<TriggerDispatcher>,
    tracker: Arc<RunTracker>,
    bus: Arc<TriggerBus>,
    coordinator: ShutdownCoordinator,
}

impl Scheduler {
    /// Build the scheduler, start the dispatcher loop and install timers for
    /// every enabled schedule.
    pub async fn start(
        store: Arc<dyn ScheduleRepository>,
        engine: Arc<dyn CronEngine>,
        config: &SchedulerConfig,
    ) -> SchedulerResult<Self> {
        let (fire_tx, fire_rx) = mpsc::unbounded_channel();
        let registry = Arc::new(JobRegistry::new(Arc::clone(&store), engine, fire_tx));
        let bus = Arc::new(TriggerBus::new(config.consumer_buffer));
        let dispatcher = Arc::new(TriggerDispatcher::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            Arc::clone(&bus),
        ));
        let tracker = Arc::new(RunTracker::new(Arc::clone(&store)));

        let token = CancellationToken::new();
        tokio::spawn(Arc::clone(&dispatcher).run(fire_rx, token.clone()));

        if let Some(timeout) = config.stale_run_timeout_secs {
            tracing::info!(
                timeout_secs = timeout,
                interval_secs = config.reaper_interval_secs,
                "Stale run reaper enabled"
            );
            lifecycle::spawn_reaper(
                Arc::clone(&tracker),
                Duration::from_secs(timeout),
                Duration::from_secs(config.reaper_interval_secs),
                token.child_token(),
            );
        }

        let summary = registry.reschedule_all().await?;
        if summary.failed > 0 {
            tracing::warn!(
                failed = summary.failed,
                "Some schedules could not be installed; they are marked as errored"
            );
        }

        Ok(Self {
            store,
            coordinator: ShutdownCoordinator::new(Arc::clone(&registry), token),
            registry,
            dispatcher,
            tracker,
            bus,
        })
    }

    pub async fn list_schedules(&self) -> SchedulerResult<Vec<Schedule>> {
        Ok(self.store.list_schedules().await?)
    }

    pub async fn get_schedule(&self, id: &str) -> SchedulerResult<Schedule> {
        self.store
            .get_schedule(id)
            .await?
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))
    }

    /// Persist a new schedule and install its timer.
    ///
    /// An invalid cron or timezone is accepted; the returned schedule carries
    /// `last_status = error` and no `next_run_at`.
    pub async fn create_schedule(&self, input: NewSchedule) -> SchedulerResult<Schedule> {
        let schedule = Schedule::new(input);
        self.store.create_schedule(&schedule).await?;
        tracing::info!(
            schedule_id = %schedule.id,
            cron = %schedule.cron,
            enabled = schedule.enabled,
            "Schedule created"
        );
        self.registry.upsert(&schedule.id).await?;
        self.get_schedule(&schedule.id).await
    }

    /// Apply a partial update and reconcile the timer.
    pub async fn update_schedule(&self, id: &str, patch: SchedulePatch) -> SchedulerResult<Schedule> {
        if self.registry.is_retired(id) {
            return Err(SchedulerError::ScheduleNotFound(id.to_string()));
        }
        self.store
            .update_schedule(id, &patch)
            .await?
            .ok_or_else(|| SchedulerError::ScheduleNotFound(id.to_string()))?;
        tracing::info!(schedule_id = %id, "Schedule updated");
        self.registry.upsert(id).await?;
        self.get_schedule(id).await
    }

    /// Delete a schedule, its runs and its timer.
    ///
    /// Once deletion starts no further trigger is published for the id. The
    /// fence is released when the deletion ends; afterwards the missing runs
    /// keep late fires from publishing.
    pub async fn delete_schedule(&self, id: &str) -> SchedulerResult<()> {
        if self.store.get_schedule(id).await?.is_none() {
            return Err(SchedulerError::ScheduleNotFound(id.to_string()));
        }

        self.registry.retire(id).await;
        let deleted = match self.remove_and_delete(id).await {
            Ok(deleted) => {
                self.registry.release(id);
                deleted
            }
            Err(err) => {
                tracing::error!(schedule_id = %id, error = %err, "Schedule deletion failed");
                self.registry.release(id);
                if let Err(upsert_err) = self.registry.upsert(id).await {
                    tracing::error!(
                        schedule_id = %id,
                        error = %upsert_err,
                        "Failed to reinstall timer after aborted deletion"
                    );
                }
                return Err(err);
            }
        };

        if !deleted {
            return Err(SchedulerError::ScheduleNotFound(id.to_string()));
        }
        tracing::info!(schedule_id = %id, "Schedule deleted");
        Ok(())
    }

    async fn remove_and_delete(&self, id: &str) -> SchedulerResult<bool> {
        self.registry.remove(id).await?;
        Ok(self.store.delete_schedule(id).await?)
    }

    /// Trigger a schedule immediately. Disabled schedules are skipped.
    pub async fn run_now(&self, id: &str) -> SchedulerResult<FireOutcome> {
        if self.store.get_schedule(id).await?.is_none() {
            return Err(SchedulerError::ScheduleNotFound(id.to_string()));
        }
        self.dispatcher.run_now(id).await
    }

    pub async fn list_runs(
        &self,
        schedule_id: Option<&str>,
    ) -> SchedulerResult<Vec<ScheduleRunWithSchedule>> {
        self.tracker.list_runs(schedule_id).await
    }

    pub async fn update_run(&self, run_id: &str, patch: RunPatch) -> SchedulerResult<ScheduleRun> {
        self.tracker.update_run(run_id, patch).await
    }

    pub async fn complete_run(
        &self,
        run_id: &str,
        completion: RunCompletion,
    ) -> SchedulerResult<ScheduleRun> {
        self.tracker.complete_run(run_id, completion).await
    }

    pub async fn attach_conversation(
        &self,
        run_id: &str,
        conversation_id: &str,
    ) -> SchedulerResult<ScheduleRun> {
        self.tracker.attach_conversation(run_id, conversation_id).await
    }

    /// Number of enabled schedules.
    pub async fn active_count(&self) -> SchedulerResult<usize> {
        self.registry.active_count().await
    }

    pub async fn shutdown_report(&self) -> SchedulerResult<ShutdownReport> {
        self.coordinator.report().await
    }

    /// Register an execution consumer.
    pub fn subscribe(&self) -> TriggerSubscription {
        self.bus.subscribe()
    }

    /// Cancel all timers and stop background tasks.
    pub fn shutdown(&self) -> usize {
        self.coordinator.shutdown()
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    pub fn tracker(&self) -> &Arc<RunTracker> {
        &self.tracker
    }

    pub fn bus(&self) -> &Arc<TriggerBus> {
        &self.bus
    }

    pub fn coordinator(&self) -> &ShutdownCoordinator {
        &self.coordinator
    }
}
