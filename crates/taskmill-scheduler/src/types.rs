use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::rules::{CronRules, ExecutionRules};

/// Publication state of a task, stored as an integer column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    Enabled,
    Disabled,
    Trashed,
}

impl TaskState {
    /// Integer value stored in the `state` column.
    pub fn to_db(self) -> i64 {
        match self {
            TaskState::Enabled => 1,
            TaskState::Disabled => 0,
            TaskState::Trashed => -2,
        }
    }

    pub fn from_db(value: i64) -> Option<Self> {
        match value {
            1 => Some(TaskState::Enabled),
            0 => Some(TaskState::Disabled),
            -2 => Some(TaskState::Trashed),
            _ => None,
        }
    }
}

/// Exit classification of one execution attempt.
///
/// Persisted as `last_exit_code`; the numeric mapping is stable and must not
/// be reordered. Shell-style high codes mark routine-reported failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExitStatus {
    /// Routine ran and reported success.
    Ok,
    /// No matching task was found.
    NoTask,
    /// The lock could not be acquired — another holder is active.
    NoLock,
    /// Lock acquired but execution was skipped (reserved).
    NoRun,
    /// The task's type has no registered routine.
    NoRoutine,
    /// Routine ran, but the lock release write-back failed.
    NoRelease,
    /// The snapshot was never populated.
    NoExit,
    /// Routine-reported timeout.
    Timeout,
    /// Routine-reported hard failure.
    Knockout,
}

impl ExitStatus {
    pub fn code(self) -> i64 {
        match self {
            ExitStatus::Ok => 0,
            ExitStatus::NoTask => 1,
            ExitStatus::NoLock => 2,
            ExitStatus::NoRun => 3,
            ExitStatus::NoRoutine => 4,
            ExitStatus::NoRelease => 5,
            ExitStatus::NoExit => 6,
            ExitStatus::Timeout => 124,
            ExitStatus::Knockout => 125,
        }
    }

    pub fn from_code(code: i64) -> Option<Self> {
        match code {
            0 => Some(ExitStatus::Ok),
            1 => Some(ExitStatus::NoTask),
            2 => Some(ExitStatus::NoLock),
            3 => Some(ExitStatus::NoRun),
            4 => Some(ExitStatus::NoRoutine),
            5 => Some(ExitStatus::NoRelease),
            6 => Some(ExitStatus::NoExit),
            124 => Some(ExitStatus::Timeout),
            125 => Some(ExitStatus::Knockout),
            _ => None,
        }
    }

    pub fn is_success(self) -> bool {
        self == ExitStatus::Ok
    }
}

impl std::fmt::Display for ExitStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ExitStatus::Ok => "ok",
            ExitStatus::NoTask => "no_task",
            ExitStatus::NoLock => "no_lock",
            ExitStatus::NoRun => "no_run",
            ExitStatus::NoRoutine => "no_routine",
            ExitStatus::NoRelease => "no_release",
            ExitStatus::NoExit => "no_exit",
            ExitStatus::Timeout => "timeout",
            ExitStatus::Knockout => "knockout",
        };
        write!(f, "{s}")
    }
}

/// A persisted scheduled task record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Autoincrement primary key.
    pub id: i64,
    /// Human-readable label.
    pub title: String,
    /// Identifies which registered routine handles this task.
    pub task_type: String,
    pub state: TaskState,
    /// User-facing rule definition; the canonical form is derived from it.
    pub execution_rules: ExecutionRules,
    /// Canonical rule derived from `execution_rules` on every save.
    pub cron_rules: CronRules,
    /// Manual list ordering (admin display only).
    pub ordering: i64,
    /// Queue priority — higher runs first.
    pub priority: i64,
    pub note: Option<String>,
    /// Routine-specific configuration, opaque to the scheduler.
    pub params: serde_json::Value,
    pub last_exit_code: i64,
    /// Start instant of the most recent execution, if any.
    pub last_execution: Option<DateTime<Utc>>,
    /// Next planned execution; None parks the task out of the due queue.
    pub next_execution: Option<DateTime<Utc>>,
    pub times_executed: u32,
    pub times_failed: u32,
    /// Non-null while a run is in progress or presumed crashed-and-stale.
    pub locked: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Basis time for next-execution computation: the last run, or the
    /// creation time for a task that has never run.
    pub fn rule_basis(&self) -> DateTime<Utc> {
        self.last_execution.unwrap_or(self.created_at)
    }
}

/// Fields for a new task row. Rule columns must already be materialized
/// (see `Scheduler::create_task`, which rebuilds them from raw input).
#[derive(Debug, Clone)]
pub struct NewTask {
    pub title: String,
    pub task_type: String,
    pub state: TaskState,
    pub execution_rules: ExecutionRules,
    pub cron_rules: CronRules,
    pub ordering: i64,
    pub priority: i64,
    pub note: Option<String>,
    pub params: serde_json::Value,
    pub next_execution: Option<DateTime<Utc>>,
}

/// Ephemeral result record of one execution attempt. Not persisted
/// wholesale — selected fields are folded back into the task row.
#[derive(Debug, Clone, Serialize)]
pub struct ExecutionSnapshot {
    pub status: ExitStatus,
    pub task_start: Option<DateTime<Utc>>,
    pub task_end: Option<DateTime<Utc>>,
    /// Routine execution time in seconds, excluding lock wait.
    pub net_duration: f64,
    /// Routine-defined output text.
    pub output: Option<String>,
    /// Captured routine error or panic message.
    pub exception: Option<String>,
}

impl Default for ExecutionSnapshot {
    fn default() -> Self {
        Self {
            status: ExitStatus::NoExit,
            task_start: None,
            task_end: None,
            net_duration: 0.0,
            output: None,
            exception: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn state_roundtrip() {
        for state in [TaskState::Enabled, TaskState::Disabled, TaskState::Trashed] {
            assert_eq!(TaskState::from_db(state.to_db()), Some(state));
        }
        assert_eq!(TaskState::from_db(7), None);
    }

    #[test]
    fn exit_code_roundtrip() {
        for status in [
            ExitStatus::Ok,
            ExitStatus::NoTask,
            ExitStatus::NoLock,
            ExitStatus::NoRun,
            ExitStatus::NoRoutine,
            ExitStatus::NoRelease,
            ExitStatus::NoExit,
            ExitStatus::Timeout,
            ExitStatus::Knockout,
        ] {
            assert_eq!(ExitStatus::from_code(status.code()), Some(status));
        }
    }
}
