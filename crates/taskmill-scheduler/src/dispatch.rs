//! Routine dispatch: maps a task's `type` string to the callable that does
//! the actual work, and contains anything that callable throws.
//!
//! The scheduler treats routines as opaque synchronous calls. A routine
//! that errors — or panics — must never take the scheduler down with it;
//! failures surface as a degraded snapshot instead.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};

use tracing::error;

use crate::types::ExitStatus;

/// Everything a routine gets to see about the task invoking it.
#[derive(Debug)]
pub struct RoutineContext<'a> {
    pub task_id: i64,
    pub task_type: &'a str,
    /// Routine-specific configuration from the task record.
    pub params: &'a serde_json::Value,
}

/// Result of one routine invocation.
#[derive(Debug, Clone)]
pub struct RoutineSnapshot {
    pub status: ExitStatus,
    pub output: Option<String>,
    pub exception: Option<String>,
}

impl RoutineSnapshot {
    pub fn ok(output: impl Into<Option<String>>) -> Self {
        Self {
            status: ExitStatus::Ok,
            output: output.into(),
            exception: None,
        }
    }

    pub fn failed(status: ExitStatus, message: impl Into<String>) -> Self {
        Self {
            status,
            output: None,
            exception: Some(message.into()),
        }
    }
}

/// A registered routine. Returns `Err` for failures it cannot classify
/// itself; classified failures use a snapshot with a non-ok status.
pub type Routine =
    Box<dyn Fn(&RoutineContext<'_>) -> std::result::Result<RoutineSnapshot, String> + Send + Sync>;

/// Registry of routines keyed by task type.
#[derive(Default)]
pub struct RoutineRegistry {
    routines: HashMap<String, Routine>,
}

impl RoutineRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, task_type: impl Into<String>, routine: F)
    where
        F: Fn(&RoutineContext<'_>) -> std::result::Result<RoutineSnapshot, String>
            + Send
            + Sync
            + 'static,
    {
        self.routines.insert(task_type.into(), Box::new(routine));
    }

    pub fn contains(&self, task_type: &str) -> bool {
        self.routines.contains_key(task_type)
    }

    pub fn routine_types(&self) -> impl Iterator<Item = &str> {
        self.routines.keys().map(String::as_str)
    }

    /// Invoke the routine for `ctx.task_type`, containing errors and panics.
    ///
    /// Callers must check [`Self::contains`] first; dispatching an
    /// unregistered type reports `Knockout` rather than `NoRoutine` because
    /// reaching that point is a scheduler bug, not a task configuration one.
    pub fn dispatch(&self, ctx: &RoutineContext<'_>) -> RoutineSnapshot {
        let Some(routine) = self.routines.get(ctx.task_type) else {
            return RoutineSnapshot::failed(
                ExitStatus::Knockout,
                format!("no routine registered for '{}'", ctx.task_type),
            );
        };

        match catch_unwind(AssertUnwindSafe(|| routine(ctx))) {
            Ok(Ok(snapshot)) => snapshot,
            Ok(Err(message)) => {
                error!(task_id = ctx.task_id, "routine failed: {message}");
                RoutineSnapshot::failed(ExitStatus::Knockout, message)
            }
            Err(panic) => {
                let message = panic_message(&*panic);
                error!(task_id = ctx.task_id, "routine panicked: {message}");
                RoutineSnapshot::failed(ExitStatus::Knockout, format!("routine panicked: {message}"))
            }
        }
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
