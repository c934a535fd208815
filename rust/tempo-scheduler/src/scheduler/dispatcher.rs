//! Trigger dispatch: turns a fire signal into a run record and a broadcast.

use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use super::registry::JobRegistry;
use crate::database::ScheduleRepository;
use crate::domain::{RunCompletion, RunStatus, SchedulePatch, ScheduleRun};
use crate::error::SchedulerResult;
use crate::events::{TriggerBus, TriggerEvent};

/// Error recorded on a run whose schedule was deleted before its trigger
/// went out.
pub const INTERRUPTED_RUN_ERROR: &str = "schedule deleted before the run was dispatched";

/// Result of a single fire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FireOutcome {
    /// A run was created and the event published.
    Triggered { run: ScheduleRun, delivered: usize },
    /// Nothing happened: the schedule is missing, disabled or being deleted.
    Skipped,
}

impl FireOutcome {
    pub fn run(&self) -> Option<&ScheduleRun> {
        match self {
            Self::Triggered { run, .. } => Some(run),
            Self::Skipped => None,
        }
    }
}

/// Handles fire signals from timers and manual "run now" requests.
#[derive(Debug)]
pub struct TriggerDispatcher {
    store: Arc<dyn ScheduleRepository>,
    registry: Arc<JobRegistry>,
    bus: Arc<TriggerBus>,
}

impl TriggerDispatcher {
    pub fn new(
        store: Arc<dyn ScheduleRepository>,
        registry: Arc<JobRegistry>,
        bus: Arc<TriggerBus>,
    ) -> Self {
        Self {
            store,
            registry,
            bus,
        }
    }

    /// Handle a timer fire for `schedule_id`.
    pub async fn fire(&self, schedule_id: &str) -> SchedulerResult<FireOutcome> {
        if self.registry.is_retired(schedule_id) {
            return Ok(FireOutcome::Skipped);
        }
        let Some(schedule) = self.store.get_schedule(schedule_id).await? else {
            tracing::debug!(schedule_id = %schedule_id, "Fire for missing schedule ignored");
            return Ok(FireOutcome::Skipped);
        };
        if !schedule.enabled {
            tracing::debug!(schedule_id = %schedule_id, "Fire for disabled schedule ignored");
            return Ok(FireOutcome::Skipped);
        }

        let now = Utc::now();
        let run = ScheduleRun::start(schedule_id, now);
        self.store.create_run(&run).await?;

        let Some(schedule) = self
            .store
            .update_schedule(schedule_id, &SchedulePatch::started(now))
            .await?
        else {
            return Ok(FireOutcome::Skipped);
        };
        self.store
            .update_schedule(
                schedule_id,
                &SchedulePatch::next_run(self.registry.next_invocation(schedule_id)),
            )
            .await?;

        let event = TriggerEvent::for_run(&run.id, &schedule);
        let Some(delivered) = self
            .registry
            .publish_if_live(schedule_id, &run.id, || self.bus.publish(&event))
            .await?
        else {
            tracing::debug!(
                schedule_id = %schedule_id,
                run_id = %run.id,
                "Schedule deleted mid-fire; trigger suppressed"
            );
            self.close_interrupted(schedule_id, &run.id).await;
            return Ok(FireOutcome::Skipped);
        };

        tracing::info!(
            schedule_id = %schedule_id,
            run_id = %run.id,
            consumers = delivered,
            "Schedule triggered"
        );
        Ok(FireOutcome::Triggered { run, delivered })
    }

    /// Fail a run whose trigger was suppressed, in case the deletion that
    /// suppressed it is rolled back.
    async fn close_interrupted(&self, schedule_id: &str, run_id: &str) {
        let patch = RunCompletion::failure(INTERRUPTED_RUN_ERROR).into_patch();
        match self.store.update_run(run_id, &patch).await {
            Ok(Some(_)) => {
                if let Err(err) = self
                    .store
                    .update_schedule(schedule_id, &SchedulePatch::status(RunStatus::Error))
                    .await
                {
                    tracing::warn!(
                        schedule_id = %schedule_id,
                        error = %err,
                        "Failed to mark schedule after interrupted run"
                    );
                }
            }
            // Already removed with its schedule.
            Ok(None) => {}
            Err(err) => {
                tracing::warn!(run_id = %run_id, error = %err, "Failed to close interrupted run");
            }
        }
    }

    /// Trigger a schedule immediately, bypassing its timer.
    pub async fn run_now(&self, schedule_id: &str) -> SchedulerResult<FireOutcome> {
        tracing::info!(schedule_id = %schedule_id, "Manual run requested");
        self.fire(schedule_id).await
    }

    /// Consume the fire queue until it closes or `shutdown` is cancelled.
    ///
    /// Each signal is handled on its own task; errors are logged.
    pub async fn run(
        self: Arc<Self>,
        mut fire_rx: mpsc::UnboundedReceiver<String>,
        shutdown: CancellationToken,
    ) {
        tracing::debug!("Trigger dispatcher started");
        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                signal = fire_rx.recv() => {
                    let Some(schedule_id) = signal else { break };
                    let dispatcher = Arc::clone(&self);
                    tokio::spawn(async move {
                        if let Err(err) = dispatcher.fire(&schedule_id).await {
                            tracing::error!(
                                schedule_id = %schedule_id,
                                error = %err,
                                "Scheduled fire failed"
                            );
                        }
                    });
                }
            }
        }
        tracing::debug!("Trigger dispatcher stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::database::InMemoryScheduleStore;
    use crate::domain::{NewSchedule, Schedule};
    use crate::scheduler::CronEngine;
    use crate::scheduler::testing::{ManualCronEngine, StallingStore};

    struct Fixture {
        store: Arc<InMemoryScheduleStore>,
        engine: Arc<ManualCronEngine>,
        registry: Arc<JobRegistry>,
        bus: Arc<TriggerBus>,
        dispatcher: Arc<TriggerDispatcher>,
        fire_rx: Option<mpsc::UnboundedReceiver<String>>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(InMemoryScheduleStore::new());
        let engine = Arc::new(ManualCronEngine::new());
        let (tx, rx) = mpsc::unbounded_channel();
        let repo = Arc::clone(&store) as Arc<dyn ScheduleRepository>;
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&repo),
            Arc::clone(&engine) as Arc<dyn CronEngine>,
            tx,
        ));
        let bus = Arc::new(TriggerBus::default());
        let dispatcher = Arc::new(TriggerDispatcher::new(
            repo,
            Arc::clone(&registry),
            Arc::clone(&bus),
        ));
        Fixture {
            store,
            engine,
            registry,
            bus,
            dispatcher,
            fire_rx: Some(rx),
        }
    }

    async fn insert(store: &InMemoryScheduleStore, enabled: bool) -> Schedule {
        let schedule = Schedule::new(NewSchedule {
            title: Some("Morning brief".to_string()),
            prompt: "summarize the news".to_string(),
            model: "gpt-4o".to_string(),
            frequency_text: "every day at 9".to_string(),
            cron: "0 9 * * *".to_string(),
            enabled: Some(enabled),
            ..NewSchedule::default()
        });
        store.create_schedule(&schedule).await.unwrap();
        schedule
    }

    #[tokio::test]
    async fn test_fire_creates_run_and_publishes() {
        let f = fixture();
        let s = insert(&f.store, true).await;
        f.registry.upsert(&s.id).await.unwrap();
        let mut consumer = f.bus.subscribe();

        let outcome = f.dispatcher.fire(&s.id).await.unwrap();
        let FireOutcome::Triggered { run, delivered } = outcome else {
            panic!("expected a trigger");
        };
        assert_eq!(delivered, 1);
        assert_eq!(run.status, RunStatus::Running);

        let stored = f.store.get_schedule(&s.id).await.unwrap().unwrap();
        assert_eq!(stored.last_run_at, Some(run.started_at));
        assert_eq!(stored.last_status, Some(RunStatus::Running));
        assert_eq!(stored.next_run_at, f.registry.next_invocation(&s.id));

        let runs = f.store.list_runs(Some(&s.id)).await.unwrap();
        assert_eq!(runs.len(), 1);

        let event = consumer.recv().await.unwrap();
        assert_eq!(event.run_id, run.id);
        assert_eq!(event.schedule_id, s.id);
        assert_eq!(event.title, "Morning brief");
        assert_eq!(event.frequency_text, "every day at 9");
    }

    #[tokio::test]
    async fn test_fire_disabled_or_missing_is_noop() {
        let f = fixture();
        let s = insert(&f.store, false).await;
        let mut consumer = f.bus.subscribe();

        assert_eq!(f.dispatcher.run_now(&s.id).await.unwrap(), FireOutcome::Skipped);
        assert_eq!(f.dispatcher.fire("ghost").await.unwrap(), FireOutcome::Skipped);
        assert!(f.store.list_runs(None).await.unwrap().is_empty());
        assert!(consumer.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_run_now_without_timer_clears_next_run() {
        let f = fixture();
        let s = insert(&f.store, true).await;

        let outcome = f.dispatcher.run_now(&s.id).await.unwrap();
        assert!(outcome.run().is_some());
        let stored = f.store.get_schedule(&s.id).await.unwrap().unwrap();
        assert!(stored.next_run_at.is_none());
    }

    #[tokio::test]
    async fn test_retired_schedule_never_publishes() {
        let f = fixture();
        let s = insert(&f.store, true).await;
        let mut consumer = f.bus.subscribe();

        f.registry.retire(&s.id).await;
        assert_eq!(f.dispatcher.fire(&s.id).await.unwrap(), FireOutcome::Skipped);
        assert!(consumer.try_recv().is_none());
        assert!(f.store.list_runs(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_deletion_mid_fire_closes_the_run() {
        let store = Arc::new(
            StallingStore::new(Duration::from_millis(50))
                .stall_schedule_updates(|patch| patch.last_run_at.is_some()),
        );
        let repo = Arc::clone(&store) as Arc<dyn ScheduleRepository>;
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&repo),
            Arc::new(ManualCronEngine::new()),
            tx,
        ));
        let bus = Arc::new(TriggerBus::default());
        let dispatcher = Arc::new(TriggerDispatcher::new(
            Arc::clone(&repo),
            Arc::clone(&registry),
            Arc::clone(&bus),
        ));
        let schedule = Schedule::new(NewSchedule {
            prompt: "summarize the news".to_string(),
            model: "gpt-4o".to_string(),
            cron: "0 9 * * *".to_string(),
            ..NewSchedule::default()
        });
        store.create_schedule(&schedule).await.unwrap();
        let mut consumer = bus.subscribe();

        let fire = tokio::spawn({
            let dispatcher = Arc::clone(&dispatcher);
            let id = schedule.id.clone();
            async move { dispatcher.fire(&id).await }
        });
        tokio::time::sleep(Duration::from_millis(10)).await;
        registry.retire(&schedule.id).await;

        assert_eq!(fire.await.unwrap().unwrap(), FireOutcome::Skipped);
        assert!(consumer.try_recv().is_none());

        // The deletion is rolled back; the run it interrupted is not left open.
        registry.release(&schedule.id);
        let runs = store.list_runs(Some(&schedule.id)).await.unwrap();
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].run.status, RunStatus::Error);
        assert_eq!(runs[0].run.error.as_deref(), Some(INTERRUPTED_RUN_ERROR));
        assert!(runs[0].run.finished_at.is_some());
        assert_eq!(runs[0].schedule.last_status, Some(RunStatus::Error));
    }

    #[tokio::test]
    async fn test_run_loop_dispatches_timer_fires() {
        let mut f = fixture();
        let s = insert(&f.store, true).await;
        f.registry.upsert(&s.id).await.unwrap();
        let mut consumer = f.bus.subscribe();

        let shutdown = CancellationToken::new();
        let loop_handle = tokio::spawn(
            Arc::clone(&f.dispatcher).run(f.fire_rx.take().unwrap(), shutdown.clone()),
        );

        assert_eq!(f.engine.fire_all(), 1);
        let event = tokio::time::timeout(Duration::from_secs(5), consumer.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(event.schedule_id, s.id);

        shutdown.cancel();
        loop_handle.await.unwrap();
    }
}
