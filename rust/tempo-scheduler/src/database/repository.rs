//! Schedule store abstraction.
//!
//! The scheduler core only needs single-record CRUD over schedules and runs.
//! Backends implement [`ScheduleRepository`]; [`InMemoryScheduleStore`] backs
//! tests and `":memory:"` deployments.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use parking_lot::RwLock;

use crate::domain::{RunPatch, Schedule, SchedulePatch, ScheduleRun, ScheduleRunWithSchedule};

/// Repository trait for schedules and their runs.
#[async_trait]
pub trait ScheduleRepository: Send + Sync + std::fmt::Debug {
    /// List all schedules, newest first.
    async fn list_schedules(&self) -> anyhow::Result<Vec<Schedule>>;

    /// List enabled schedules.
    async fn list_enabled_schedules(&self) -> anyhow::Result<Vec<Schedule>>;

    /// Count enabled schedules.
    async fn count_enabled_schedules(&self) -> anyhow::Result<usize>;

    /// Get a schedule by ID.
    async fn get_schedule(&self, id: &str) -> anyhow::Result<Option<Schedule>>;

    /// Insert a new schedule.
    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<()>;

    /// Apply a partial update. Returns `None` if the schedule does not exist.
    async fn update_schedule(
        &self,
        id: &str,
        patch: &SchedulePatch,
    ) -> anyhow::Result<Option<Schedule>>;

    /// Delete a schedule and all of its runs.
    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool>;

    /// Insert a run. Fails if the owning schedule does not exist.
    async fn create_run(&self, run: &ScheduleRun) -> anyhow::Result<()>;

    /// Get a run by ID.
    async fn get_run(&self, id: &str) -> anyhow::Result<Option<ScheduleRun>>;

    /// Apply a partial update. Returns `None` if the run does not exist.
    ///
    /// The patch is checked against the stored run and written in the same
    /// step. A refused patch fails with a
    /// [`RunPatchRejection`](crate::domain::RunPatchRejection) error and
    /// leaves the run unchanged.
    async fn update_run(&self, id: &str, patch: &RunPatch) -> anyhow::Result<Option<ScheduleRun>>;

    /// List runs joined with their schedule, newest `started_at` first.
    async fn list_runs(
        &self,
        schedule_id: Option<&str>,
    ) -> anyhow::Result<Vec<ScheduleRunWithSchedule>>;
}

#[derive(Debug, Default)]
struct StoreState {
    schedules: HashMap<String, Schedule>,
    runs: HashMap<String, ScheduleRun>,
}

/// In-memory schedule store.
///
/// Each trait call takes the lock once, so a patch is observed atomically.
#[derive(Debug, Default)]
pub struct InMemoryScheduleStore {
    state: RwLock<StoreState>,
}

impl InMemoryScheduleStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleStore {
    async fn list_schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        let state = self.state.read();
        let mut schedules: Vec<Schedule> = state.schedules.values().cloned().collect();
        schedules.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(schedules)
    }

    async fn list_enabled_schedules(&self) -> anyhow::Result<Vec<Schedule>> {
        let state = self.state.read();
        Ok(state
            .schedules
            .values()
            .filter(|s| s.enabled)
            .cloned()
            .collect())
    }

    async fn count_enabled_schedules(&self) -> anyhow::Result<usize> {
        let state = self.state.read();
        Ok(state.schedules.values().filter(|s| s.enabled).count())
    }

    async fn get_schedule(&self, id: &str) -> anyhow::Result<Option<Schedule>> {
        Ok(self.state.read().schedules.get(id).cloned())
    }

    async fn create_schedule(&self, schedule: &Schedule) -> anyhow::Result<()> {
        let mut state = self.state.write();
        if state.schedules.contains_key(&schedule.id) {
            anyhow::bail!("Schedule {} already exists", schedule.id);
        }
        state.schedules.insert(schedule.id.clone(), schedule.clone());
        Ok(())
    }

    async fn update_schedule(
        &self,
        id: &str,
        patch: &SchedulePatch,
    ) -> anyhow::Result<Option<Schedule>> {
        let mut state = self.state.write();
        Ok(state.schedules.get_mut(id).map(|schedule| {
            patch.apply_to(schedule);
            schedule.clone()
        }))
    }

    async fn delete_schedule(&self, id: &str) -> anyhow::Result<bool> {
        let mut state = self.state.write();
        if state.schedules.remove(id).is_none() {
            return Ok(false);
        }
        state.runs.retain(|_, run| run.schedule_id != id);
        Ok(true)
    }

    async fn create_run(&self, run: &ScheduleRun) -> anyhow::Result<()> {
        let mut state = self.state.write();
        if !state.schedules.contains_key(&run.schedule_id) {
            anyhow::bail!(
                "Cannot create run {}: schedule {} does not exist",
                run.id,
                run.schedule_id
            );
        }
        state.runs.insert(run.id.clone(), run.clone());
        Ok(())
    }

    async fn get_run(&self, id: &str) -> anyhow::Result<Option<ScheduleRun>> {
        Ok(self.state.read().runs.get(id).cloned())
    }

    async fn update_run(&self, id: &str, patch: &RunPatch) -> anyhow::Result<Option<ScheduleRun>> {
        let mut state = self.state.write();
        let Some(run) = state.runs.get_mut(id) else {
            return Ok(None);
        };
        patch.apply_to(run, Utc::now())?;
        Ok(Some(run.clone()))
    }

    async fn list_runs(
        &self,
        schedule_id: Option<&str>,
    ) -> anyhow::Result<Vec<ScheduleRunWithSchedule>> {
        let state = self.state.read();
        let mut runs: Vec<ScheduleRunWithSchedule> = state
            .runs
            .values()
            .filter(|run| schedule_id.is_none_or(|id| run.schedule_id == id))
            .filter_map(|run| {
                state
                    .schedules
                    .get(&run.schedule_id)
                    .map(|schedule| ScheduleRunWithSchedule {
                        run: run.clone(),
                        schedule: schedule.clone(),
                    })
            })
            .collect();
        runs.sort_by(|a, b| b.run.started_at.cmp(&a.run.started_at));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::domain::{NewSchedule, RunPatchRejection, RunStatus};

    fn schedule(cron: &str) -> Schedule {
        Schedule::new(NewSchedule {
            prompt: "check the weather".to_string(),
            model: "gpt-4o-mini".to_string(),
            cron: cron.to_string(),
            ..NewSchedule::default()
        })
    }

    #[tokio::test]
    async fn test_create_and_get() {
        let store = InMemoryScheduleStore::new();
        let s = schedule("0 9 * * *");
        store.create_schedule(&s).await.unwrap();

        let loaded = store.get_schedule(&s.id).await.unwrap().unwrap();
        assert_eq!(loaded, s);
        assert!(store.create_schedule(&s).await.is_err());
    }

    #[tokio::test]
    async fn test_count_enabled() {
        let store = InMemoryScheduleStore::new();
        let a = schedule("0 9 * * *");
        let mut b = schedule("0 10 * * *");
        b.enabled = false;
        store.create_schedule(&a).await.unwrap();
        store.create_schedule(&b).await.unwrap();

        assert_eq!(store.count_enabled_schedules().await.unwrap(), 1);
        assert_eq!(store.list_enabled_schedules().await.unwrap().len(), 1);
        assert_eq!(store.list_schedules().await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_update_missing_returns_none() {
        let store = InMemoryScheduleStore::new();
        let patch = SchedulePatch::next_run(None);
        assert!(store.update_schedule("missing", &patch).await.unwrap().is_none());
        assert!(
            store
                .update_run("missing", &RunPatch::default())
                .await
                .unwrap()
                .is_none()
        );
    }

    #[tokio::test]
    async fn test_update_run_refuses_reopening() {
        let store = InMemoryScheduleStore::new();
        let s = schedule("0 9 * * *");
        store.create_schedule(&s).await.unwrap();
        let run = ScheduleRun::start(&s.id, Utc::now());
        store.create_run(&run).await.unwrap();

        let done = RunPatch {
            status: Some(RunStatus::Error),
            ..RunPatch::default()
        };
        let finished = store.update_run(&run.id, &done).await.unwrap().unwrap();
        assert!(finished.finished_at.is_some());

        let reopen = RunPatch {
            status: Some(RunStatus::Running),
            ..RunPatch::default()
        };
        let err = store.update_run(&run.id, &reopen).await.unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunPatchRejection>(),
            Some(RunPatchRejection::Transition { .. })
        ));
        assert_eq!(store.get_run(&run.id).await.unwrap().unwrap(), finished);
    }

    #[tokio::test]
    async fn test_run_requires_schedule() {
        let store = InMemoryScheduleStore::new();
        let run = ScheduleRun::start("ghost", Utc::now());
        assert!(store.create_run(&run).await.is_err());
    }

    #[tokio::test]
    async fn test_delete_cascades_runs() {
        let store = InMemoryScheduleStore::new();
        let s = schedule("0 9 * * *");
        store.create_schedule(&s).await.unwrap();
        store
            .create_run(&ScheduleRun::start(&s.id, Utc::now()))
            .await
            .unwrap();

        assert_eq!(store.list_runs(Some(&s.id)).await.unwrap().len(), 1);
        assert!(store.delete_schedule(&s.id).await.unwrap());
        assert!(store.list_runs(Some(&s.id)).await.unwrap().is_empty());
        assert!(store.list_runs(None).await.unwrap().is_empty());
        assert!(!store.delete_schedule(&s.id).await.unwrap());
    }

    #[tokio::test]
    async fn test_list_runs_newest_first_and_filtered() {
        let store = InMemoryScheduleStore::new();
        let a = schedule("0 9 * * *");
        let b = schedule("0 10 * * *");
        store.create_schedule(&a).await.unwrap();
        store.create_schedule(&b).await.unwrap();

        let now = Utc::now();
        let older = ScheduleRun::start(&a.id, now - Duration::minutes(5));
        let newer = ScheduleRun::start(&a.id, now);
        let other = ScheduleRun::start(&b.id, now - Duration::minutes(1));
        for run in [&older, &newer, &other] {
            store.create_run(run).await.unwrap();
        }

        let all = store.list_runs(None).await.unwrap();
        let ids: Vec<&str> = all.iter().map(|r| r.run.id.as_str()).collect();
        assert_eq!(ids, vec![newer.id.as_str(), other.id.as_str(), older.id.as_str()]);

        let only_a = store.list_runs(Some(&a.id)).await.unwrap();
        assert_eq!(only_a.len(), 2);
        assert!(only_a.iter().all(|r| r.schedule.id == a.id));
        assert_eq!(only_a[0].run.status, RunStatus::Running);
    }
}
