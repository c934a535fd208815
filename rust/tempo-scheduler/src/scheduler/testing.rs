//! Test doubles: a deterministic cron engine and a store that stalls
//! selected writes.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;

use super::cron::next_occurrence;
use super::timer::{CronEngine, FireCallback, TimerHandle};
use crate::database::{InMemoryScheduleStore, ScheduleRepository};
use crate::domain::{RunPatch, Schedule, SchedulePatch, ScheduleRun, ScheduleRunWithSchedule};
use crate::error::SchedulerResult;

struct ManualTimer {
    cron: String,
    timezone: Option<String>,
    handle: TimerHandle,
    on_fire: FireCallback,
}

/// Engine whose timers only fire when a test says so.
#[derive(Default)]
pub(crate) struct ManualCronEngine {
    timers: Mutex<Vec<ManualTimer>>,
}

impl fmt::Debug for ManualCronEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualCronEngine")
            .field("live", &self.live_count())
            .finish()
    }
}

impl ManualCronEngine {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Fire every live timer once, advancing each to its following instant.
    pub(crate) fn fire_all(&self) -> usize {
        let due: Vec<FireCallback> = {
            let timers = self.timers.lock();
            timers
                .iter()
                .filter(|t| !t.handle.is_cancelled())
                .map(|t| {
                    let from = t.handle.next_invocation().unwrap_or_else(Utc::now);
                    let following = next_occurrence(&t.cron, t.timezone.as_deref(), from).ok();
                    t.handle.set_next_invocation(following);
                    Arc::clone(&t.on_fire)
                })
                .collect()
        };
        for on_fire in &due {
            on_fire();
        }
        due.len()
    }

    pub(crate) fn live_count(&self) -> usize {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .count()
    }

    pub(crate) fn live_crons(&self) -> Vec<String> {
        self.timers
            .lock()
            .iter()
            .filter(|t| !t.handle.is_cancelled())
            .map(|t| t.cron.clone())
            .collect()
    }
}

impl CronEngine for ManualCronEngine {
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
        let first = next_occurrence(cron, timezone, Utc::now())?;
        let handle = TimerHandle::new(Some(first));
        self.timers.lock().push(ManualTimer {
            cron: cron.to_string(),
            timezone: timezone.map(str::to_string),
            handle: handle.clone(),
            on_fire,
        });
        Ok(handle)
    }
}

/// In-memory store that sleeps before the writes its predicates select,
/// to force interleavings between concurrent operations.
#[derive(Debug)]
pub(crate) struct StallingStore {
    inner: InMemoryScheduleStore,
    delay: Duration,
    stall_schedule_update: fn(&SchedulePatch) -> bool,
    stall_run_update: fn(&RunPatch) -> bool,
}

impl StallingStore {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            inner: InMemoryScheduleStore::new(),
            delay,
            stall_schedule_update: |_| false,
            stall_run_update: |_| false,
        }
    }

    pub(crate) fn stall_schedule_updates(mut self, when: fn(&SchedulePatch) -> bool) -> Self {
        self.stall_schedule_update = when;
        self
    }

    pub(crate) fn stall_run_updates(mut self, when: fn(&RunPatch) -> bool) -> Self {
        self.stall_run_update = when;
        self
    }
}

#[async_trait]
impl ScheduleRepository for StallingStore {
    async fn list_schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        self.inner.list_schedules().await
    }

    async fn list_enabled_schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        self.inner.list_enabled_schedules().await
    }

    async fn count_enabled_schedules(&self) -> anyhow::Result<usize> {
        self.inner.count_enabled_schedules().await
    }

    async fn get_schedule(&self, id: &str) -> anyhow::Result<Option<Schedule>> {
        self.inner.get_schedule(id).await
    }

    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        self.inner.create_schedule(schedule).await
    }

    async fn update_schedule(
        &self,
        id: &str,
        patch: &SchedulePatch,
    ) -> anyhow::Result<Option<Schedule>> {
        if (self.stall_schedule_update)(patch) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.update_schedule(id, patch).await
    }

    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool> {
        self.inner.delete_schedule(id).await
    }

    async fn create_run(&self, run: &ScheduleRun) -> anyhow::Result<()> {
        self.inner.create_run(run).await
    }

    async fn get_run(&self, id: &str) -> anyhow::Result<Option<ScheduleRun>> {
        self.inner.get_run(id).await
    }

    async fn update_run(&self, id: &str, patch: &RunPatch) -> anyhow::Result<Option<ScheduleRun>> {
        if (self.stall_run_update)(patch) {
            tokio::time::sleep(self.delay).await;
        }
        self.inner.update_run(id, patch).await
    }

    async fn list_runs(
        &self,
        schedule_id: Option<&str>,
    ) -> anyhow::Result<Vec<ScheduleRunWithSchedule>> {
        self.inner.list_runs(schedule_id).await
    }
}
