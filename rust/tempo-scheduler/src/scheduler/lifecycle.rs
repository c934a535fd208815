//! Run lifecycle tracking.
//!
//! Runs start `running` when a schedule fires and move to `success` or
//! `error` when the execution consumer reports back. A terminal run never
//! returns to `running`. Every status write is mirrored into the owning
//! schedule's `last_status`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::database::ScheduleRepository;
use crate::domain::{
    RunCompletion, RunPatch, RunStatus, SchedulePatch, ScheduleRun, ScheduleRunWithSchedule,
};
use crate::error::{SchedulerError, SchedulerResult};

/// Error recorded on runs closed by the stale-run reaper.
pub const ABANDONED_RUN_ERROR: &str = "run abandoned: no completion reported";

/// Records execution attempts and their outcomes.
#[derive(Debug)]
pub struct RunTracker {
    store: Arc<dyn ScheduleRepository>,
}

impl RunTracker {
    pub fn new(store: Arc<dyn ScheduleRepository>) -> Self {
        Self { store }
    }

    /// Runs joined with their schedule, newest first.
    pub async fn list_runs(
        &self,
        schedule_id: Option<&str>,
    ) -> SchedulerResult<Vec<ScheduleRunWithSchedule>> {
        Ok(self.store.list_runs(schedule_id).await?)
    }

    pub async fn get_run(&self, run_id: &str) -> SchedulerResult<ScheduleRun> {
        self.store
            .get_run(run_id)
            .await?
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.to_string()))
    }

    /// Apply a partial update to a run.
    ///
    /// The store checks the patch against the run as it writes it, so a
    /// terminal run is never moved back to `running` even when a completion
    /// lands concurrently. When the patch carries a status it is also written
    /// to the schedule's `last_status`.
    pub async fn update_run(&self, run_id: &str, patch: RunPatch) -> SchedulerResult<ScheduleRun> {
        let updated = self
            .store
            .update_run(run_id, &patch)
            .await
            .map_err(|e| SchedulerError::from_run_update(run_id, e))?
            .ok_or_else(|| SchedulerError::RunNotFound(run_id.to_string()))?;

        if let Some(status) = patch.status {
            self.store
                .update_schedule(&updated.schedule_id, &SchedulePatch::status(status))
                .await?;
        }

        tracing::debug!(
            run_id = %run_id,
            schedule_id = %updated.schedule_id,
            status = %updated.status,
            "Schedule run updated"
        );
        Ok(updated)
    }

    /// Record the terminal outcome of a run.
    ///
    /// Omitted fields keep their stored values. Without an explicit
    /// `finished_at` an existing one is kept, otherwise the time of the write
    /// is used, so repeating the same completion changes nothing.
    pub async fn complete_run(
        &self,
        run_id: &str,
        completion: RunCompletion,
    ) -> SchedulerResult<ScheduleRun> {
        if !completion.status.is_terminal() {
            return Err(SchedulerError::InvalidRunStatus(completion.status));
        }
        let status = completion.status;

        let run = self.update_run(run_id, completion.into_patch()).await?;
        tracing::info!(
            run_id = %run_id,
            schedule_id = %run.schedule_id,
            status = %status,
            "Schedule run completed"
        );
        Ok(run)
    }

    /// Link the conversation produced by a run.
    pub async fn attach_conversation(
        &self,
        run_id: &str,
        conversation_id: &str,
    ) -> SchedulerResult<ScheduleRun> {
        self.update_run(run_id, RunPatch::conversation(conversation_id))
            .await
    }

    /// Fail every `running` run started more than `older_than` ago.
    ///
    /// Returns the number of runs closed.
    pub async fn reap_stale(&self, older_than: Duration) -> SchedulerResult<usize> {
        let threshold = chrono::Duration::from_std(older_than)
            .map_or(Utc::now(), |age| Utc::now() - age);
        let stale: Vec<String> = self
            .store
            .list_runs(None)
            .await?
            .into_iter()
            .filter(|r| r.run.status == RunStatus::Running && r.run.started_at < threshold)
            .map(|r| r.run.id)
            .collect();

        let mut reaped = 0;
        for run_id in stale {
            match self
                .complete_run(&run_id, RunCompletion::failure(ABANDONED_RUN_ERROR))
                .await
            {
                Ok(_) => reaped += 1,
                // Deleted between listing and completion.
                Err(SchedulerError::RunNotFound(_)) => {}
                Err(err) => return Err(err),
            }
        }

        if reaped > 0 {
            tracing::warn!(count = reaped, "Marked abandoned runs as failed");
        }
        Ok(reaped)
    }
}

/// Spawn the periodic stale-run sweep.
pub fn spawn_reaper(
    tracker: Arc<RunTracker>,
    timeout: Duration,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_secs(1)));
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                _ = ticker.tick() => {
                    if let Err(err) = tracker.reap_stale(timeout).await {
                        tracing::error!(error = %err, "Stale run sweep failed");
                    }
                }
            }
        }
    })
}
