//! Task record store: the persistence contract consumed by the runtime and
//! scheduler, plus its SQLite implementation.
//!
//! Lock acquisition and release are single conditional UPDATE statements —
//! never read-then-write — so concurrent triggers cannot race each other
//! into double execution.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::Connection;
use tracing::warn;

use taskmill_core::config::QueueOrdering;

use crate::db::init_db;
use crate::error::Result;
use crate::types::{NewTask, Task, TaskState};

/// Filters for selecting task rows.
#[derive(Debug, Clone, Default)]
pub struct TaskFilters {
    pub id: Option<i64>,
    pub state: StateFilter,
    /// Only tasks with `next_execution <= this instant`.
    pub due_by: Option<DateTime<Utc>>,
    pub lock: LockFilter,
    pub task_type: Option<String>,
    /// Substring match against the title.
    pub search: Option<String>,
}

impl TaskFilters {
    /// The default due-task queue: enabled, due now, unlocked or stale.
    pub fn due_queue(now: DateTime<Utc>, stale_cutoff: DateTime<Utc>) -> Self {
        Self {
            state: StateFilter::Enabled,
            due_by: Some(now),
            lock: LockFilter::UnlockedOrStale {
                cutoff: stale_cutoff,
            },
            ..Self::default()
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum StateFilter {
    #[default]
    Enabled,
    /// Enabled and disabled rows; trashed rows are never returned.
    NotTrashed,
    Exact(TaskState),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LockFilter {
    #[default]
    Any,
    /// `locked IS NULL` or older than the staleness cutoff.
    UnlockedOrStale { cutoff: DateTime<Utc> },
    Locked,
}

/// Ordering and limit for list queries.
#[derive(Debug, Clone, Default)]
pub struct ListConfig {
    pub ordering: QueueOrdering,
    pub limit: Option<u32>,
}

/// Fields written back atomically together with the lock release.
///
/// Counters are expressed relatively — `times_executed` always bumps by one
/// and `times_failed` by one when `failed` — so a writeback computed from a
/// stale in-memory row can never erase a concurrent run's increment.
#[derive(Debug, Clone)]
pub struct TaskWriteback {
    pub last_exit_code: i64,
    pub last_execution: Option<DateTime<Utc>>,
    pub next_execution: Option<DateTime<Utc>>,
    pub failed: bool,
}

/// Persistence contract for task rows.
///
/// Implementations must make `try_acquire_lock` and `release_lock` atomic
/// single statements; everything else is plain reads and writes.
pub trait TaskStore: Send + Sync {
    fn list(&self, filters: &TaskFilters, list: &ListConfig) -> Result<Vec<Task>>;

    fn get(&self, id: i64) -> Result<Option<Task>>;

    fn insert(&self, new: &NewTask) -> Result<Task>;

    fn set_state(&self, id: i64, state: TaskState) -> Result<bool>;

    /// Atomically set `locked = now` iff the row is unlocked or its lock is
    /// older than `now - stale_after`. Returns whether the lock was taken.
    fn try_acquire_lock(
        &self,
        id: i64,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Result<bool>;

    /// Clear the lock, optionally writing back run results in the same
    /// statement. Succeeds only if the row is currently locked.
    fn release_lock(&self, id: i64, writeback: Option<&TaskWriteback>) -> Result<bool>;

    /// Out-of-band adjustment used to skip an execution without running.
    fn update_next_execution(&self, id: i64, next: Option<DateTime<Utc>>) -> Result<bool>;
}

/// SQLite-backed task store. One `Connection` per instance; concurrent
/// processes coordinate purely through the conditional lock updates.
pub struct SqliteTaskStore {
    conn: Mutex<Connection>,
}

impl SqliteTaskStore {
    pub fn new(conn: Connection) -> Result<Self> {
        init_db(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Open (or create) a store at `path` with WAL and a busy timeout, so
    /// concurrent trigger processes queue briefly instead of erroring.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA busy_timeout=5000;")?;
        Self::new(conn)
    }

    pub fn open_in_memory() -> Result<Self> {
        Self::new(Connection::open_in_memory()?)
    }
}

const TASK_COLUMNS: &str = "id, title, type, state, execution_rules, cron_rules, ordering, \
     priority, note, params, last_exit_code, last_execution, next_execution, \
     times_executed, times_failed, locked, created_at";

impl TaskStore for SqliteTaskStore {
    fn list(&self, filters: &TaskFilters, list: &ListConfig) -> Result<Vec<Task>> {
        let mut sql = format!("SELECT {TASK_COLUMNS} FROM tasks WHERE 1=1");
        let mut params: Vec<Value> = Vec::new();

        if let Some(id) = filters.id {
            sql.push_str(" AND id = ?");
            params.push(Value::Integer(id));
        }
        match filters.state {
            StateFilter::Enabled => {
                sql.push_str(" AND state = ?");
                params.push(Value::Integer(TaskState::Enabled.to_db()));
            }
            StateFilter::NotTrashed => {
                sql.push_str(" AND state != ?");
                params.push(Value::Integer(TaskState::Trashed.to_db()));
            }
            StateFilter::Exact(state) => {
                sql.push_str(" AND state = ?");
                params.push(Value::Integer(state.to_db()));
            }
        }
        if let Some(due_by) = filters.due_by {
            sql.push_str(" AND next_execution IS NOT NULL AND next_execution <= ?");
            params.push(Value::Text(ts_to_db(due_by)));
        }
        match filters.lock {
            LockFilter::Any => {}
            LockFilter::UnlockedOrStale { cutoff } => {
                sql.push_str(" AND (locked IS NULL OR locked < ?)");
                params.push(Value::Text(ts_to_db(cutoff)));
            }
            LockFilter::Locked => sql.push_str(" AND locked IS NOT NULL"),
        }
        if let Some(task_type) = &filters.task_type {
            sql.push_str(" AND type = ?");
            params.push(Value::Text(task_type.clone()));
        }
        if let Some(search) = &filters.search {
            sql.push_str(" AND title LIKE ?");
            params.push(Value::Text(format!("%{search}%")));
        }

        sql.push_str(match list.ordering {
            QueueOrdering::PriorityThenDue => " ORDER BY priority DESC, next_execution ASC",
            QueueOrdering::Id => " ORDER BY id ASC",
        });
        if let Some(limit) = list.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(i64::from(limit)));
        }

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare_cached(&sql)?;
        let rows: Vec<RawTaskRow> = stmt
            .query_map(rusqlite::params_from_iter(params), RawTaskRow::from_row)?
            .collect::<std::result::Result<_, _>>()?;
        Ok(rows
            .into_iter()
            .filter_map(|raw| match raw.into_task() {
                Ok(task) => Some(task),
                Err(e) => {
                    warn!("skipping unreadable task row: {e}");
                    None
                }
            })
            .collect())
    }

    fn get(&self, id: i64) -> Result<Option<Task>> {
        let filters = TaskFilters {
            id: Some(id),
            state: StateFilter::NotTrashed,
            ..TaskFilters::default()
        };
        let list = ListConfig {
            ordering: QueueOrdering::Id,
            limit: Some(1),
        };
        Ok(self.list(&filters, &list)?.into_iter().next())
    }

    fn insert(&self, new: &NewTask) -> Result<Task> {
        let now = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO tasks
             (title, type, state, execution_rules, cron_rules, ordering, priority,
              note, params, next_execution, created_at)
             VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            rusqlite::params![
                new.title,
                new.task_type,
                new.state.to_db(),
                serde_json::to_string(&new.execution_rules)?,
                serde_json::to_string(&new.cron_rules)?,
                new.ordering,
                new.priority,
                new.note,
                new.params.to_string(),
                new.next_execution.map(ts_to_db),
                ts_to_db(now),
            ],
        )?;
        let id = conn.last_insert_rowid();

        Ok(Task {
            id,
            title: new.title.clone(),
            task_type: new.task_type.clone(),
            state: new.state,
            execution_rules: new.execution_rules.clone(),
            cron_rules: new.cron_rules.clone(),
            ordering: new.ordering,
            priority: new.priority,
            note: new.note.clone(),
            params: new.params.clone(),
            last_exit_code: 0,
            last_execution: None,
            next_execution: new.next_execution,
            times_executed: 0,
            times_failed: 0,
            locked: None,
            created_at: parse_ts(&ts_to_db(now)).unwrap_or(now),
        })
    }

    fn set_state(&self, id: i64, state: TaskState) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET state = ?1 WHERE id = ?2",
            rusqlite::params![state.to_db(), id],
        )?;
        Ok(n == 1)
    }

    fn try_acquire_lock(
        &self,
        id: i64,
        now: DateTime<Utc>,
        stale_after: chrono::Duration,
    ) -> Result<bool> {
        let cutoff = now - stale_after;
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET locked = ?1
             WHERE id = ?2 AND (locked IS NULL OR locked < ?3)",
            rusqlite::params![ts_to_db(now), id, ts_to_db(cutoff)],
        )?;
        Ok(n == 1)
    }

    fn release_lock(&self, id: i64, writeback: Option<&TaskWriteback>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = match writeback {
            None => conn.execute(
                "UPDATE tasks SET locked = NULL
                 WHERE id = ?1 AND locked IS NOT NULL",
                rusqlite::params![id],
            )?,
            Some(wb) => conn.execute(
                "UPDATE tasks SET locked = NULL,
                    last_exit_code = ?1, last_execution = ?2, next_execution = ?3,
                    times_executed = times_executed + 1,
                    times_failed = times_failed + ?4
                 WHERE id = ?5 AND locked IS NOT NULL",
                rusqlite::params![
                    wb.last_exit_code,
                    wb.last_execution.map(ts_to_db),
                    wb.next_execution.map(ts_to_db),
                    i64::from(wb.failed),
                    id
                ],
            )?,
        };
        Ok(n == 1)
    }

    fn update_next_execution(&self, id: i64, next: Option<DateTime<Utc>>) -> Result<bool> {
        let conn = self.conn.lock().unwrap();
        let n = conn.execute(
            "UPDATE tasks SET next_execution = ?1 WHERE id = ?2",
            rusqlite::params![next.map(ts_to_db), id],
        )?;
        Ok(n == 1)
    }
}

/// Column values as stored, before JSON/timestamp decoding.
struct RawTaskRow {
    id: i64,
    title: String,
    task_type: String,
    state: i64,
    execution_rules: String,
    cron_rules: String,
    ordering: i64,
    priority: i64,
    note: Option<String>,
    params: String,
    last_exit_code: i64,
    last_execution: Option<String>,
    next_execution: Option<String>,
    times_executed: u32,
    times_failed: u32,
    locked: Option<String>,
    created_at: String,
}

impl RawTaskRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            title: row.get(1)?,
            task_type: row.get(2)?,
            state: row.get(3)?,
            execution_rules: row.get(4)?,
            cron_rules: row.get(5)?,
            ordering: row.get(6)?,
            priority: row.get(7)?,
            note: row.get(8)?,
            params: row.get(9)?,
            last_exit_code: row.get(10)?,
            last_execution: row.get(11)?,
            next_execution: row.get(12)?,
            times_executed: row.get(13)?,
            times_failed: row.get(14)?,
            locked: row.get(15)?,
            created_at: row.get(16)?,
        })
    }

    fn into_task(self) -> Result<Task> {
        Ok(Task {
            id: self.id,
            title: self.title,
            task_type: self.task_type,
            state: TaskState::from_db(self.state).unwrap_or(TaskState::Disabled),
            execution_rules: serde_json::from_str(&self.execution_rules)?,
            cron_rules: serde_json::from_str(&self.cron_rules)?,
            ordering: self.ordering,
            priority: self.priority,
            note: self.note,
            params: serde_json::from_str(&self.params)?,
            last_exit_code: self.last_exit_code,
            last_execution: self.last_execution.as_deref().and_then(parse_ts),
            next_execution: self.next_execution.as_deref().and_then(parse_ts),
            times_executed: self.times_executed,
            times_failed: self.times_failed,
            locked: self.locked.as_deref().and_then(parse_ts),
            created_at: parse_ts(&self.created_at).unwrap_or_else(Utc::now),
        })
    }
}

/// Fixed-width RFC 3339 UTC ("...Z", whole seconds) so string comparison in
/// SQL matches chronological order.
fn ts_to_db(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|t| t.with_timezone(&Utc))
}
