//! Cron expression evaluation.
//!
//! Expressions use the standard five-field format
//! `minute hour day month weekday` and are parsed by `croner`, which handles
//! ranges, steps, lists, month/weekday names, `7` as Sunday and Vixie
//! day-of-month OR day-of-week matching.
//!
//! Evaluation happens on the schedule's wall clock: local times that do not
//! exist (spring-forward gaps) are skipped and ambiguous ones (fall-back)
//! fire once, at their earliest instant.

use std::fmt;

use chrono::{DateTime, Duration, Local, LocalResult, NaiveDateTime, TimeZone, Utc};
use chrono_tz::Tz;
use croner::Cron;

use crate::error::{SchedulerError, SchedulerResult};

/// How far ahead `next_after` searches before giving up.
const SEARCH_HORIZON_DAYS: i64 = 366 * 5;

/// The zone a schedule is evaluated in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScheduleZone {
    /// The process local timezone.
    Local,
    /// A named IANA zone.
    Named(Tz),
}

impl ScheduleZone {
    /// Resolve an optional IANA name; `None` or blank means local time.
    pub fn resolve(timezone: Option<&str>) -> SchedulerResult<Self> {
        match timezone.map(str::trim).filter(|tz| !tz.is_empty()) {
            None => Ok(Self::Local),
            Some(name) => name
                .parse::<Tz>()
                .map(Self::Named)
                .map_err(|_| SchedulerError::InvalidTimezone(name.to_string())),
        }
    }

    fn wall_clock_of(self, instant: &DateTime<Utc>) -> NaiveDateTime {
        match self {
            Self::Local => instant.with_timezone(&Local).naive_local(),
            Self::Named(tz) => instant.with_timezone(&tz).naive_local(),
        }
    }

    /// Map a wall-clock time back to an instant. Gaps give `None`.
    fn instant_at(self, local: &NaiveDateTime) -> Option<DateTime<Utc>> {
        match self {
            Self::Local => earliest(Local.from_local_datetime(local)),
            Self::Named(tz) => earliest(tz.from_local_datetime(local)),
        }
    }
}

fn earliest<Z: TimeZone>(result: LocalResult<DateTime<Z>>) -> Option<DateTime<Utc>> {
    match result {
        LocalResult::Single(dt) | LocalResult::Ambiguous(dt, _) => Some(dt.with_timezone(&Utc)),
        LocalResult::None => None,
    }
}

/// A validated cron expression bound to the zone it fires in.
pub struct CronSchedule {
    source: String,
    cron: Cron,
    zone: ScheduleZone,
}

impl CronSchedule {
    /// Parse `expression` and resolve `timezone`.
    ///
    /// # Examples
    ///
    /// - `0 0 * * *` - Daily at midnight
    /// - `*/5 * * * *` - Every 5 minutes
    /// - `0 9-17 * * MON-FRI` - Every hour 9am-5pm, Monday-Friday
    /// - `30 8 1,15 * *` - 08:30 on the 1st and 15th
    pub fn parse(expression: &str, timezone: Option<&str>) -> SchedulerResult<Self> {
        let invalid = |reason: String| SchedulerError::InvalidCron {
            expression: expression.to_string(),
            reason,
        };

        let fields: Vec<&str> = expression.split_whitespace().collect();
        if fields.len() != 5 {
            return Err(invalid(format!(
                "Cron expression must have 5 fields, found {}",
                fields.len()
            )));
        }
        let source = fields.join(" ");
        let cron = Cron::new(&source.to_ascii_uppercase())
            .parse()
            .map_err(|e| invalid(e.to_string()))?;
        let zone = ScheduleZone::resolve(timezone)?;

        Ok(Self { source, cron, zone })
    }

    /// Next instant strictly after `after`, within a five-year horizon.
    pub fn next_after(&self, after: &DateTime<Utc>) -> Option<DateTime<Utc>> {
        // croner walks a zone-free wall clock; the zone is applied per candidate.
        let start = self.zone.wall_clock_of(after);
        let horizon = start + Duration::days(SEARCH_HORIZON_DAYS);
        let mut cursor = Utc.from_utc_datetime(&start);

        loop {
            cursor = self.cron.find_next_occurrence(&cursor, false).ok()?;
            let local = cursor.naive_utc();
            if local > horizon {
                return None;
            }
            if let Some(instant) = self.zone.instant_at(&local) {
                if instant > *after {
                    return Some(instant);
                }
            }
        }
    }
}

impl fmt::Debug for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CronSchedule")
            .field("expression", &self.source)
            .field("zone", &self.zone)
            .finish_non_exhaustive()
    }
}

impl fmt::Display for CronSchedule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.source)
    }
}

/// Parse `cron`, resolve `timezone`, and compute the next instant after `from`.
pub fn next_occurrence(
    cron: &str,
    timezone: Option<&str>,
    from: DateTime<Utc>,
) -> SchedulerResult<DateTime<Utc>> {
    CronSchedule::parse(cron, timezone)?
        .next_after(&from)
        .ok_or_else(|| SchedulerError::NoUpcomingRun(cron.to_string()))
}
