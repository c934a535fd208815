//! Execution attempts of a schedule and their state machine.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Schedule, present};

/// One execution attempt of a schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScheduleRun {
    /// Unique run ID.
    pub id: String,
    /// Schedule this run belongs to.
    pub schedule_id: String,
    /// Current status.
    pub status: RunStatus,
    /// When the run was created.
    pub started_at: DateTime<Utc>,
    /// When the consumer reported a terminal status.
    pub finished_at: Option<DateTime<Utc>>,
    /// Success payload.
    pub output: Option<String>,
    /// Failure message.
    pub error: Option<String>,
    /// Conversation the consumer allocated for this run.
    pub conversation_id: Option<String>,
}

impl ScheduleRun {
    /// Create a new run in the `running` state.
    pub fn start(schedule_id: impl Into<String>, started_at: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            schedule_id: schedule_id.into(),
            status: RunStatus::Running,
            started_at,
            finished_at: None,
            output: None,
            error: None,
            conversation_id: None,
        }
    }
}

/// Status of a run.
///
/// `Running` is the only initial state; `Success` and `Error` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Handed to the execution consumer, no completion yet.
    Running,
    /// Completed successfully.
    Success,
    /// Failed.
    Error,
}

impl RunStatus {
    /// Whether no further transition is allowed out of this status.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Wire/storage representation.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Success => "success",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for RunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(Self::Running),
            "success" => Ok(Self::Success),
            "error" => Ok(Self::Error),
            other => anyhow::bail!("Unknown run status: {other}"),
        }
    }
}

/// Partial update of a run.
///
/// Omitted fields keep their stored value; `Some(None)` clears a nullable
/// field.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct RunPatch {
    #[serde(default)]
    pub status: Option<RunStatus>,
    #[serde(default, deserialize_with = "present")]
    pub finished_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub output: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub error: Option<Option<String>>,
    #[serde(default, deserialize_with = "present")]
    pub conversation_id: Option<Option<String>>,
}

impl RunPatch {
    /// Patch that only links a conversation.
    #[must_use]
    pub fn conversation(conversation_id: impl Into<String>) -> Self {
        Self {
            conversation_id: Some(Some(conversation_id.into())),
            ..Self::default()
        }
    }

    /// Apply the patch in place, keeping the run consistent.
    ///
    /// A terminal run never moves back to `running`, and `finished_at` is set
    /// exactly when the status is terminal: a run reaching a terminal status
    /// without one is stamped with `now`. On rejection `run` is untouched.
    pub fn apply_to(
        &self,
        run: &mut ScheduleRun,
        now: DateTime<Utc>,
    ) -> Result<(), RunPatchRejection> {
        let status = self.status.unwrap_or(run.status);
        if run.status.is_terminal() && !status.is_terminal() {
            return Err(RunPatchRejection::Transition {
                from: run.status,
                to: status,
            });
        }

        let finished_at = match (status.is_terminal(), self.finished_at) {
            (true, Some(None)) => return Err(RunPatchRejection::ClearsFinishedAt { status }),
            (true, Some(Some(at))) => Some(at),
            (true, None) => Some(run.finished_at.unwrap_or(now)),
            (false, Some(Some(_))) => return Err(RunPatchRejection::FinishedWhileRunning),
            (false, _) => None,
        };

        run.status = status;
        run.finished_at = finished_at;
        if let Some(output) = &self.output {
            run.output.clone_from(output);
        }
        if let Some(error) = &self.error {
            run.error.clone_from(error);
        }
        if let Some(conversation_id) = &self.conversation_id {
            run.conversation_id.clone_from(conversation_id);
        }
        Ok(())
    }
}

/// Why a patch was refused for the stored state of a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum RunPatchRejection {
    #[error("cannot move from {from} to {to}")]
    Transition { from: RunStatus, to: RunStatus },
    #[error("a {status} run must keep its finished_at")]
    ClearsFinishedAt { status: RunStatus },
    #[error("a running run cannot have finished_at")]
    FinishedWhileRunning,
}

/// Terminal report from the execution consumer.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct RunCompletion {
    /// Must be `success` or `error`.
    pub status: RunStatus,
    /// Defaults to the stored value, or the time of the write when none is stored.
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub output: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub conversation_id: Option<String>,
}

impl RunCompletion {
    /// Successful completion with an output payload.
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Success,
            finished_at: None,
            output: Some(output.into()),
            error: None,
            conversation_id: None,
        }
    }

    /// Failed completion with an error message.
    pub fn failure(error: impl Into<String>) -> Self {
        Self {
            status: RunStatus::Error,
            finished_at: None,
            output: None,
            error: Some(error.into()),
            conversation_id: None,
        }
    }

    /// Convert into a partial update; omitted fields stay untouched.
    #[must_use]
    pub fn into_patch(self) -> RunPatch {
        RunPatch {
            status: Some(self.status),
            finished_at: self.finished_at.map(Some),
            output: self.output.map(Some),
            error: self.error.map(Some),
            conversation_id: self.conversation_id.map(Some),
        }
    }
}

/// A run joined with its owning schedule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ScheduleRunWithSchedule {
    #[serde(flatten)]
    pub run: ScheduleRun,
    pub schedule: Schedule,
}
