//! Core domain models for schedules and their runs.

pub mod runs;
pub mod schedules;

pub use runs::{
    RunCompletion, RunPatch, RunPatchRejection, RunStatus, ScheduleRun, ScheduleRunWithSchedule,
};
pub use schedules::{NewSchedule, Schedule, SchedulePatch, build_title};

use serde::{Deserialize, Deserializer};

/// Deserialize a present field (including an explicit `null`) as `Some`.
///
/// Combined with `#[serde(default)]` this distinguishes "field omitted"
/// (`None`) from "field set to null" (`Some(None)`) for partial updates.
pub(crate) fn present<'de, T, D>(deserializer: D) -> Result<Option<T>, D::Error>
where
    T: Deserialize<'de>,
    D: Deserializer<'de>,
{
    T::deserialize(deserializer).map(Some)
}
