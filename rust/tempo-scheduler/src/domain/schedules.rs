//! Recurring task definitions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{RunStatus, present};

/// Title used when a schedule is created without a title or prompt.
const DEFAULT_TITLE: &str = "Scheduled Task";

/// Prompts longer than this are truncated when deriving a title.
const MAX_TITLE_CHARS: usize = 48;

/// A persisted recurring task definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Schedule {
    /// Unique schedule ID.
    pub id: String,
    /// Display title.
    pub title: String,
    /// Prompt handed to the execution consumer.
    pub prompt: String,
    /// Model identifier handed to the execution consumer.
    pub model: String,
    /// Human-readable frequency ("every weekday at 9").
    pub frequency_text: String,
    /// Five-field cron expression.
    pub cron: String,
    /// IANA timezone name; `None` means the process local zone.
    pub timezone: Option<String>,
    /// Whether the schedule should be firing.
    pub enabled: bool,
    /// Last time a run was started.
    pub last_run_at: Option<DateTime<Utc>>,
    /// Next fire instant of the live timer, if one is installed.
    pub next_run_at: Option<DateTime<Utc>>,
    /// Status of the most recent run, or `error` for a bad definition.
    pub last_status: Option<RunStatus>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Schedule {
    /// Build a new schedule from a creation request.
    pub fn new(input: NewSchedule) -> Self {
        let now = Utc::now();
        let title = match input.title {
            Some(title) if !title.trim().is_empty() => title,
            _ => build_title(&input.prompt),
        };

        Self {
            id: Uuid::new_v4().to_string(),
            title,
            prompt: input.prompt,
            model: input.model,
            frequency_text: input.frequency_text,
            cron: input.cron,
            timezone: input.timezone.filter(|tz| !tz.trim().is_empty()),
            enabled: input.enabled.unwrap_or(true),
            last_run_at: None,
            next_run_at: None,
            last_status: None,
            created_at: now,
            updated_at: now,
        }
    }
}

/// Derive a display title from a prompt.
pub fn build_title(prompt: &str) -> String {
    let trimmed = prompt.trim();
    if trimmed.is_empty() {
        return DEFAULT_TITLE.to_string();
    }
    if trimmed.chars().count() > MAX_TITLE_CHARS {
        let head: String = trimmed.chars().take(MAX_TITLE_CHARS - 3).collect();
        format!("{head}...")
    } else {
        trimmed.to_string()
    }
}

/// Request to create a schedule.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct NewSchedule {
    /// Optional title; derived from the prompt when absent.
    #[serde(default)]
    pub title: Option<String>,
    /// Prompt to execute.
    pub prompt: String,
    /// Model to execute the prompt with.
    pub model: String,
    /// Human-readable frequency.
    #[serde(default)]
    pub frequency_text: String,
    /// Cron expression.
    pub cron: String,
    /// Optional IANA timezone.
    #[serde(default)]
    pub timezone: Option<String>,
    /// Defaults to `true`.
    #[serde(default)]
    pub enabled: Option<bool>,
}

/// Partial update of a schedule.
///
/// `None` leaves a field untouched. Nullable fields use a nested option:
/// `Some(None)` clears the stored value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct SchedulePatch {
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub frequency_text: Option<String>,
    #[serde(default)]
    pub cron: Option<String>,
    #[serde(default, deserialize_with = "present")]
    pub timezone: Option<Option<String>>,
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default, deserialize_with = "present")]
    pub last_run_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub next_run_at: Option<Option<DateTime<Utc>>>,
    #[serde(default, deserialize_with = "present")]
    pub last_status: Option<Option<RunStatus>>,
}

impl SchedulePatch {
    /// Patch that only sets `next_run_at`.
    #[must_use]
    pub fn next_run(next_run_at: Option<DateTime<Utc>>) -> Self {
        Self {
            next_run_at: Some(next_run_at),
            ..Self::default()
        }
    }

    /// Patch that only sets `last_status`.
    #[must_use]
    pub fn status(status: RunStatus) -> Self {
        Self {
            last_status: Some(Some(status)),
            ..Self::default()
        }
    }

    /// Patch stamping a freshly started run: both fields land in one write.
    #[must_use]
    pub fn started(at: DateTime<Utc>) -> Self {
        Self {
            last_run_at: Some(Some(at)),
            last_status: Some(Some(RunStatus::Running)),
            ..Self::default()
        }
    }

    /// Apply the patch in place and bump `updated_at`.
    pub fn apply_to(&self, schedule: &mut Schedule) {
        if let Some(title) = &self.title {
            schedule.title.clone_from(title);
        }
        if let Some(prompt) = &self.prompt {
            schedule.prompt.clone_from(prompt);
        }
        if let Some(model) = &self.model {
            schedule.model.clone_from(model);
        }
        if let Some(frequency_text) = &self.frequency_text {
            schedule.frequency_text.clone_from(frequency_text);
        }
        if let Some(cron) = &self.cron {
            schedule.cron.clone_from(cron);
        }
        if let Some(timezone) = &self.timezone {
            schedule.timezone = timezone.clone().filter(|tz| !tz.trim().is_empty());
        }
        if let Some(enabled) = self.enabled {
            schedule.enabled = enabled;
        }
        if let Some(last_run_at) = self.last_run_at {
            schedule.last_run_at = last_run_at;
        }
        if let Some(next_run_at) = self.next_run_at {
            schedule.next_run_at = next_run_at;
        }
        if let Some(last_status) = self.last_status {
            schedule.last_status = last_status;
        }
        schedule.updated_at = Utc::now();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn new_schedule() -> NewSchedule {
        NewSchedule {
            title: None,
            prompt: "Summarise my inbox".to_string(),
            model: "gpt-4o".to_string(),
            frequency_text: "every morning".to_string(),
            cron: "0 9 * * *".to_string(),
            timezone: None,
            enabled: None,
        }
    }

    #[test]
    fn test_new_schedule_defaults() {
        let schedule = Schedule::new(new_schedule());
        assert!(schedule.enabled);
        assert_eq!(schedule.title, "Summarise my inbox");
        assert!(schedule.next_run_at.is_none());
        assert!(schedule.last_status.is_none());
        assert!(Uuid::parse_str(&schedule.id).is_ok());
    }

    #[test]
    fn test_build_title() {
        assert_eq!(build_title("   "), "Scheduled Task");
        assert_eq!(build_title("  short  "), "short");

        let long = "a".repeat(60);
        let title = build_title(&long);
        assert_eq!(title.chars().count(), 48);
        assert!(title.ends_with("..."));

        let exact = "b".repeat(48);
        assert_eq!(build_title(&exact), exact);
    }

    #[test]
    fn test_blank_timezone_is_local() {
        let mut input = new_schedule();
        input.timezone = Some("  ".to_string());
        assert!(Schedule::new(input).timezone.is_none());
    }

    #[test]
    fn test_patch_distinguishes_null_from_missing() {
        let patch: SchedulePatch =
            serde_json::from_str(r#"{"timezone": null, "enabled": false}"#).unwrap();
        assert_eq!(patch.timezone, Some(None));
        assert_eq!(patch.enabled, Some(false));
        assert!(patch.cron.is_none());
        assert!(patch.next_run_at.is_none());

        let mut schedule = Schedule::new(NewSchedule {
            timezone: Some("Europe/Paris".to_string()),
            ..new_schedule()
        });
        patch.apply_to(&mut schedule);
        assert!(schedule.timezone.is_none());
        assert!(!schedule.enabled);
        assert_eq!(schedule.cron, "0 9 * * *");
    }

    #[test]
    fn test_started_patch_sets_both_fields() {
        let mut schedule = Schedule::new(new_schedule());
        let now = Utc::now();
        SchedulePatch::started(now).apply_to(&mut schedule);
        assert_eq!(schedule.last_run_at, Some(now));
        assert_eq!(schedule.last_status, Some(RunStatus::Running));
    }
}
