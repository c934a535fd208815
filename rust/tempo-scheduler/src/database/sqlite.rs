//! `SQLite` backend for the schedule store.
//!
//! Holds a single connection behind a mutex and runs every statement on the
//! blocking thread pool. Read-modify-write updates happen while the lock is
//! held, so a patch is applied atomically with respect to other callers.
//!
//! # Example
//!
//! ```rust,ignore
//! use tempo_scheduler::database::SqliteScheduleStore;
//!
//! let store = SqliteScheduleStore::open("./data/schedules.db").await?;
//! let enabled = store.count_enabled_schedules().await?;
//! ```

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::Utc;
use parking_lot::Mutex;
use rusqlite::types::Type;
use rusqlite::{Connection, OptionalExtension, Row, params};
use tokio::task;

use super::ScheduleRepository;
use crate::domain::{
    RunPatch, RunStatus, Schedule, SchedulePatch, ScheduleRun, ScheduleRunWithSchedule,
};

const SCHEMA: &str = r"
    CREATE TABLE IF NOT EXISTS schedules (
        id TEXT PRIMARY KEY,
        title TEXT NOT NULL,
        prompt TEXT NOT NULL,
        model TEXT NOT NULL,
        frequency_text TEXT NOT NULL,
        cron TEXT NOT NULL,
        timezone TEXT,
        enabled INTEGER NOT NULL DEFAULT 1,
        last_run_at TEXT,
        next_run_at TEXT,
        last_status TEXT,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    );
    CREATE INDEX IF NOT EXISTS idx_schedules_enabled ON schedules(enabled);

    CREATE TABLE IF NOT EXISTS schedule_runs (
        id TEXT PRIMARY KEY,
        schedule_id TEXT NOT NULL REFERENCES schedules(id) ON DELETE CASCADE,
        status TEXT NOT NULL,
        started_at TEXT NOT NULL,
        finished_at TEXT,
        output TEXT,
        error TEXT,
        conversation_id TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_schedule_runs_schedule
        ON schedule_runs(schedule_id, started_at DESC);
";

const SCHEDULE_COLUMNS: &str = "id, title, prompt, model, frequency_text, cron, timezone, \
     enabled, last_run_at, next_run_at, last_status, created_at, updated_at";

const RUN_COLUMNS: &str =
    "id, schedule_id, status, started_at, finished_at, output, error, conversation_id";

/// Number of columns produced by [`RUN_COLUMNS`].
const RUN_COLUMN_COUNT: usize = 8;

/// SQLite-backed schedule store.
#[derive(Clone)]
pub struct SqliteScheduleStore {
    db_path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

impl std::fmt::Debug for SqliteScheduleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqliteScheduleStore")
            .field("db_path", &self.db_path)
            .finish_non_exhaustive()
    }
}

impl SqliteScheduleStore {
    /// Open (or create) the database at `path` and apply the schema.
    ///
    /// `":memory:"` opens a private in-memory database.
    pub async fn open<P: Into<PathBuf>>(path: P) -> Result<Self> {
        let db_path = path.into();
        let open_path = db_path.clone();

        let conn = task::spawn_blocking(move || -> Result<Connection> {
            let conn = if open_path.to_str() == Some(":memory:") {
                Connection::open_in_memory().context("Failed to open in-memory database")?
            } else {
                if let Some(parent) = open_path.parent() {
                    if !parent.as_os_str().is_empty() {
                        std::fs::create_dir_all(parent).with_context(|| {
                            format!("Failed to create data directory {}", parent.display())
                        })?;
                    }
                }
                let conn = Connection::open(&open_path).with_context(|| {
                    format!("Failed to open database {}", open_path.display())
                })?;
                conn.pragma_update(None, "journal_mode", "WAL")
                    .context("Failed to enable WAL mode")?;
                conn
            };

            conn.pragma_update(None, "foreign_keys", "ON")
                .context("Failed to enable foreign keys")?;
            conn.execute_batch(SCHEMA)
                .context("Failed to create schedule tables")?;
            Ok(conn)
        })
        .await
        .context("Failed to spawn blocking task")??;

        tracing::debug!(path = %db_path.display(), "Schedule store opened");

        Ok(Self {
            db_path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Run `f` against the connection on the blocking pool.
    async fn with_conn<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        task::spawn_blocking(move || {
            let guard = conn.lock();
            f(&guard)
        })
        .await
        .context("Tokio spawn_blocking failed")?
    }
}

fn parse_status(row: &Row<'_>, idx: usize) -> rusqlite::Result<Option<RunStatus>> {
    let raw: Option<String> = row.get(idx)?;
    raw.map(|s| {
        s.parse::<RunStatus>().map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, e.into())
        })
    })
    .transpose()
}

fn schedule_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Schedule> {
    Ok(Schedule {
        id: row.get(offset)?,
        title: row.get(offset + 1)?,
        prompt: row.get(offset + 2)?,
        model: row.get(offset + 3)?,
        frequency_text: row.get(offset + 4)?,
        cron: row.get(offset + 5)?,
        timezone: row.get(offset + 6)?,
        enabled: row.get(offset + 7)?,
        last_run_at: row.get(offset + 8)?,
        next_run_at: row.get(offset + 9)?,
        last_status: parse_status(row, offset + 10)?,
        created_at: row.get(offset + 11)?,
        updated_at: row.get(offset + 12)?,
    })
}

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRun> {
    Ok(ScheduleRun {
        id: row.get(0)?,
        schedule_id: row.get(1)?,
        status: parse_status(row, 2)?.ok_or(rusqlite::Error::InvalidColumnType(
            2,
            "status".to_string(),
            Type::Null,
        ))?,
        started_at: row.get(3)?,
        finished_at: row.get(4)?,
        output: row.get(5)?,
        error: row.get(6)?,
        conversation_id: row.get(7)?,
    })
}

fn joined_run_from_row(row: &Row<'_>) -> rusqlite::Result<ScheduleRunWithSchedule> {
    Ok(ScheduleRunWithSchedule {
        run: run_from_row(row)?,
        schedule: schedule_from_row(row, RUN_COLUMN_COUNT)?,
    })
}

fn load_schedule(conn: &Connection, id: &str) -> Result<Option<Schedule>> {
    conn.query_row(
        &format!("SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE id = ?1"),
        params![id],
        |row| schedule_from_row(row, 0),
    )
    .optional()
    .context("Failed to load schedule")
}

fn load_run(conn: &Connection, id: &str) -> Result<Option<ScheduleRun>> {
    conn.query_row(
        &format!("SELECT {RUN_COLUMNS} FROM schedule_runs WHERE id = ?1"),
        params![id],
        run_from_row,
    )
    .optional()
    .context("Failed to load schedule run")
}

fn write_schedule(conn: &Connection, s: &Schedule) -> Result<()> {
    conn.execute(
        "UPDATE schedules SET title = ?2, prompt = ?3, model = ?4, frequency_text = ?5,
             cron = ?6, timezone = ?7, enabled = ?8, last_run_at = ?9, next_run_at = ?10,
             last_status = ?11, updated_at = ?12
         WHERE id = ?1",
        params![
            s.id,
            s.title,
            s.prompt,
            s.model,
            s.frequency_text,
            s.cron,
            s.timezone,
            s.enabled,
            s.last_run_at,
            s.next_run_at,
            s.last_status.map(RunStatus::as_str),
            s.updated_at,
        ],
    )
    .context("Failed to update schedule")?;
    Ok(())
}

#[async_trait]
impl ScheduleRepository for SqliteScheduleStore {
    async fn list_schedules(&self) -> Result<Vec<Schedule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules ORDER BY created_at DESC"
            ))?;
            let rows = stmt.query_map([], |row| schedule_from_row(row, 0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to list schedules")
        })
        .await
    }

    async fn list_enabled_schedules(&self) -> Result<Vec<Schedule>> {
        self.with_conn(|conn| {
            let mut stmt = conn.prepare(&format!(
                "SELECT {SCHEDULE_COLUMNS} FROM schedules WHERE enabled = 1"
            ))?;
            let rows = stmt.query_map([], |row| schedule_from_row(row, 0))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to list enabled schedules")
        })
        .await
    }

    async fn count_enabled_schedules(&self) -> Result<usize> {
        self.with_conn(|conn| {
            let count: i64 = conn.query_row(
                "SELECT COUNT(*) FROM schedules WHERE enabled = 1",
                [],
                |row| row.get(0),
            )?;
            usize::try_from(count).context("Negative schedule count")
        })
        .await
    }

    async fn get_schedule(&self, id: &str) -> Result<Option<Schedule>> {
        let id = id.to_string();
        self.with_conn(move |conn| load_schedule(conn, &id)).await
    }

    async fn create_schedule(&self, schedule: &Schedule) -> Result<()> {
        let s = schedule.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO schedules ({SCHEDULE_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
                ),
                params![
                    s.id,
                    s.title,
                    s.prompt,
                    s.model,
                    s.frequency_text,
                    s.cron,
                    s.timezone,
                    s.enabled,
                    s.last_run_at,
                    s.next_run_at,
                    s.last_status.map(RunStatus::as_str),
                    s.created_at,
                    s.updated_at,
                ],
            )
            .context("Failed to insert schedule")?;
            Ok(())
        })
        .await
    }

    async fn update_schedule(&self, id: &str, patch: &SchedulePatch) -> Result<Option<Schedule>> {
        let id = id.to_string();
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let Some(mut schedule) = load_schedule(conn, &id)? else {
                return Ok(None);
            };
            patch.apply_to(&mut schedule);
            write_schedule(conn, &schedule)?;
            Ok(Some(schedule))
        })
        .await
    }

    async fn delete_schedule(&self, id: &str) -> Result<bool> {
        let id = id.to_string();
        self.with_conn(move |conn| {
            let deleted = conn
                .execute("DELETE FROM schedules WHERE id = ?1", params![id])
                .context("Failed to delete schedule")?;
            Ok(deleted > 0)
        })
        .await
    }

    async fn create_run(&self, run: &ScheduleRun) -> Result<()> {
        let run = run.clone();
        self.with_conn(move |conn| {
            conn.execute(
                &format!(
                    "INSERT INTO schedule_runs ({RUN_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    run.id,
                    run.schedule_id,
                    run.status.as_str(),
                    run.started_at,
                    run.finished_at,
                    run.output,
                    run.error,
                    run.conversation_id,
                ],
            )
            .with_context(|| format!("Failed to insert run for schedule {}", run.schedule_id))?;
            Ok(())
        })
        .await
    }

    async fn get_run(&self, id: &str) -> Result<Option<ScheduleRun>> {
        let id = id.to_string();
        self.with_conn(move |conn| load_run(conn, &id)).await
    }

    async fn update_run(&self, id: &str, patch: &RunPatch) -> Result<Option<ScheduleRun>> {
        let id = id.to_string();
        let patch = patch.clone();
        self.with_conn(move |conn| {
            let Some(mut run) = load_run(conn, &id)? else {
                return Ok(None);
            };
            patch.apply_to(&mut run, Utc::now())?;
            conn.execute(
                "UPDATE schedule_runs SET status = ?2, finished_at = ?3, output = ?4,
                     error = ?5, conversation_id = ?6
                 WHERE id = ?1",
                params![
                    run.id,
                    run.status.as_str(),
                    run.finished_at,
                    run.output,
                    run.error,
                    run.conversation_id,
                ],
            )
            .context("Failed to update schedule run")?;
            Ok(Some(run))
        })
        .await
    }

    async fn list_runs(&self, schedule_id: Option<&str>) -> Result<Vec<ScheduleRunWithSchedule>> {
        let schedule_id = schedule_id.map(String::from);
        self.with_conn(move |conn| {
            let run_columns = RUN_COLUMNS
                .split(", ")
                .map(|c| format!("r.{c}"))
                .collect::<Vec<_>>()
                .join(", ");
            let schedule_columns = SCHEDULE_COLUMNS
                .split(", ")
                .map(|c| format!("s.{}", c.trim()))
                .collect::<Vec<_>>()
                .join(", ");
            let mut sql = format!(
                "SELECT {run_columns}, {schedule_columns}
                 FROM schedule_runs r JOIN schedules s ON s.id = r.schedule_id"
            );
            if schedule_id.is_some() {
                sql.push_str(" WHERE r.schedule_id = ?1");
            }
            sql.push_str(" ORDER BY r.started_at DESC");

            let mut stmt = conn.prepare(&sql)?;
            let rows = match &schedule_id {
                Some(id) => stmt.query_map(params![id], joined_run_from_row)?,
                None => stmt.query_map([], joined_run_from_row)?,
            };
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .context("Failed to list schedule runs")
        })
        .await
    }
}
