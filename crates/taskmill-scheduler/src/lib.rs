//! `taskmill-scheduler` — trigger-driven task scheduler with SQLite
//! persistence.
//!
//! # Overview
//!
//! Tasks are persisted to a SQLite `tasks` table. There is no in-process
//! timer: execution happens whenever an external trigger (CLI invocation,
//! webcron-style endpoint, admin test run) calls into [`Scheduler`], which
//! picks due tasks, takes a row-level pseudo-lock and drives each one
//! through the [`runtime::TaskRuntime`] state machine. Concurrent triggers
//! coordinate purely through the lock column, so any number of processes
//! can fire against the same database.
//!
//! # Execution rules
//!
//! | Kind       | Stored expression          | Behaviour                        |
//! |------------|----------------------------|----------------------------------|
//! | `interval` | `PT15M`, `PT3H`, `P1D`, …  | Fixed delta from the last run    |
//! | `cron`     | 5-field cron expression    | Next matching wall-clock minute  |
//!
//! Raw rule input is normalized by [`rules::normalize`] and compiled to the
//! stored form by [`rules::build`].

pub mod db;
pub mod dispatch;
pub mod error;
pub mod rules;
pub mod runtime;
pub mod scheduler;
pub mod store;
pub mod types;

pub use dispatch::{RoutineContext, RoutineRegistry, RoutineSnapshot};
pub use error::{Result, SchedulerError};
pub use scheduler::{RunReport, Scheduler, SchedulerOptions, TaskDefinition};
pub use store::{ListConfig, SqliteTaskStore, TaskFilters, TaskStore};
pub use types::{ExecutionSnapshot, ExitStatus, Task, TaskState};
