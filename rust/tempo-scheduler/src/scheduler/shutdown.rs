//! Quit-time coordination.

use std::sync::Arc;

use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::registry::JobRegistry;
use crate::error::SchedulerResult;

/// What the shell should tell the user before quitting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub active_schedules: usize,
    pub requires_confirmation: bool,
    pub message: String,
}

/// Reports active schedules and tears timers down on exit.
#[derive(Debug)]
pub struct ShutdownCoordinator {
    registry: Arc<JobRegistry>,
    dispatcher_token: CancellationToken,
}

impl ShutdownCoordinator {
    pub fn new(registry: Arc<JobRegistry>, dispatcher_token: CancellationToken) -> Self {
        Self {
            registry,
            dispatcher_token,
        }
    }

    pub async fn active_count(&self) -> SchedulerResult<usize> {
        self.registry.active_count().await
    }

    /// Whether quitting would pause enabled schedules.
    pub async fn requires_confirmation(&self) -> SchedulerResult<bool> {
        Ok(self.active_count().await? > 0)
    }

    pub async fn report(&self) -> SchedulerResult<ShutdownReport> {
        let active_schedules = self.active_count().await?;
        let message = match active_schedules {
            0 => "No scheduled tasks are enabled.".to_string(),
            1 => "You have 1 scheduled task enabled. Quitting will pause it until the app is reopened.".to_string(),
            n => format!(
                "You have {n} scheduled tasks enabled. Quitting will pause them until the app is reopened."
            ),
        };
        Ok(ShutdownReport {
            active_schedules,
            requires_confirmation: active_schedules > 0,
            message,
        })
    }

    /// Cancel every live timer and stop the dispatcher loop.
    ///
    /// Nothing is persisted; the next start rebuilds timers from storage.
    pub fn shutdown(&self) -> usize {
        self.dispatcher_token.cancel();
        let cancelled = self.registry.clear();
        tracing::info!(timers = cancelled, "Scheduler stopped");
        cancelled
    }

    pub fn is_shut_down(&self) -> bool {
        self.dispatcher_token.is_cancelled()
    }
}

#[cfg(test)]
mod tests {
    use tokio::sync::mpsc;

    use super::*;
    use crate::database::{InMemoryScheduleStore, ScheduleRepository};
    use crate::domain::{NewSchedule, Schedule};
    use crate::scheduler::CronEngine;
    use crate::scheduler::testing::ManualCronEngine;

    #[tokio::test]
    async fn test_report_and_shutdown() {
        let store = Arc::new(InMemoryScheduleStore::new());
        let engine = Arc::new(ManualCronEngine::new());
        let (tx, _rx) = mpsc::unbounded_channel();
        let registry = Arc::new(JobRegistry::new(
            Arc::clone(&store) as Arc<dyn ScheduleRepository>,
            Arc::clone(&engine) as Arc<dyn CronEngine>,
            tx,
        ));
        let coordinator = ShutdownCoordinator::new(Arc::clone(&registry), CancellationToken::new());

        let report = coordinator.report().await.unwrap();
        assert!(!report.requires_confirmation);
        assert_eq!(report.active_schedules, 0);

        for cron in ["0 9 * * *", "0 18 * * *"] {
            let s = Schedule::new(NewSchedule {
                prompt: "ping".to_string(),
                model: "gpt-4o-mini".to_string(),
                cron: cron.to_string(),
                ..NewSchedule::default()
            });
            store.create_schedule(&s).await.unwrap();
            registry.upsert(&s.id).await.unwrap();
        }

        let report = coordinator.report().await.unwrap();
        assert!(report.requires_confirmation);
        assert_eq!(report.active_schedules, 2);
        assert!(report.message.contains("2 scheduled tasks"));

        assert_eq!(coordinator.shutdown(), 2);
        assert!(coordinator.is_shut_down());
        assert_eq!(engine.live_count(), 0);
        // Storage is untouched: schedules stay enabled for the next start.
        assert_eq!(coordinator.active_count().await.unwrap(), 2);
    }
}
