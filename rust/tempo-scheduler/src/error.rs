//! Error types for the scheduler core.

use thiserror::Error;

use crate::domain::{RunPatchRejection, RunStatus};

/// Core error type for schedule and run operations.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// The schedule does not exist (or was deleted).
    #[error("Schedule '{0}' not found")]
    ScheduleNotFound(String),

    /// The run does not exist.
    #[error("Schedule run '{0}' not found")]
    RunNotFound(String),

    /// The cron expression could not be parsed.
    #[error("Invalid cron expression '{expression}': {reason}")]
    InvalidCron { expression: String, reason: String },

    /// The timezone is not a known IANA zone name.
    #[error("Unknown timezone '{0}'")]
    InvalidTimezone(String),

    /// The expression parses but never fires within the search horizon.
    #[error("Cron expression '{0}' has no upcoming occurrence")]
    NoUpcomingRun(String),

    /// A completion was reported with a non-terminal status.
    #[error("Run status '{0}' is not terminal")]
    InvalidRunStatus(RunStatus),

    /// A run update would move a terminal run backwards.
    #[error("Run '{run_id}' cannot move from {from} to {to}")]
    InvalidTransition {
        run_id: String,
        from: RunStatus,
        to: RunStatus,
    },

    /// A run update would leave `finished_at` inconsistent with the status.
    #[error("Run '{run_id}' update refused: {reason}")]
    InvalidRunUpdate {
        run_id: String,
        reason: RunPatchRejection,
    },

    /// Storage failure.
    #[error(transparent)]
    Storage(#[from] anyhow::Error),
}

impl SchedulerError {
    /// Whether this error describes a bad schedule definition.
    ///
    /// Definition errors are surfaced as `last_status = error` on the
    /// schedule instead of being propagated.
    #[must_use]
    pub fn is_definition_error(&self) -> bool {
        matches!(
            self,
            Self::InvalidCron { .. } | Self::InvalidTimezone(_) | Self::NoUpcomingRun(_)
        )
    }

    /// Classify a failed run update, surfacing refused patches.
    pub(crate) fn from_run_update(run_id: &str, err: anyhow::Error) -> Self {
        match err.downcast::<RunPatchRejection>() {
            Ok(RunPatchRejection::Transition { from, to }) => Self::InvalidTransition {
                run_id: run_id.to_string(),
                from,
                to,
            },
            Ok(reason) => Self::InvalidRunUpdate {
                run_id: run_id.to_string(),
                reason,
            },
            Err(err) => Self::Storage(err),
        }
    }
}

/// Result alias for scheduler operations.
pub type SchedulerResult<T> = Result<T, SchedulerError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_definition_errors() {
        let err = SchedulerError::InvalidCron {
            expression: "bad".to_string(),
            reason: "nope".to_string(),
        };
        assert!(err.is_definition_error());
        assert!(SchedulerError::InvalidTimezone("Mars/Base".to_string()).is_definition_error());
        assert!(!SchedulerError::ScheduleNotFound("x".to_string()).is_definition_error());
    }

    #[test]
    fn test_run_update_errors_are_classified() {
        let err = SchedulerError::from_run_update(
            "run-1",
            anyhow::Error::new(RunPatchRejection::Transition {
                from: RunStatus::Error,
                to: RunStatus::Running,
            }),
        );
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));

        let err = SchedulerError::from_run_update(
            "run-1",
            anyhow::Error::new(RunPatchRejection::FinishedWhileRunning),
        );
        assert!(matches!(err, SchedulerError::InvalidRunUpdate { .. }));

        let err = SchedulerError::from_run_update("run-1", anyhow::anyhow!("disk full"));
        assert!(matches!(err, SchedulerError::Storage(_)));
    }

    #[test]
    fn test_transition_message() {
        let err = SchedulerError::InvalidTransition {
            run_id: "run-1".to_string(),
            from: RunStatus::Success,
            to: RunStatus::Running,
        };
        assert_eq!(
            err.to_string(),
            "Run 'run-1' cannot move from success to running"
        );
    }
}
