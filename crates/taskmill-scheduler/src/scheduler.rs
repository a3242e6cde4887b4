//! Scheduler service: resolves which task(s) to run and drives the runtime.
//!
//! Every trigger mechanism — CLI, webcron-style callers, admin test runs —
//! goes through the same entry points here. There is no in-process timer
//! loop: callers invoke [`Scheduler::run_task`] or
//! [`Scheduler::run_due_tasks`] whenever they fire, and the row lock in the
//! store keeps concurrent invocations from double-executing a task.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use tracing::{info, warn};

use taskmill_core::config::{QueueOrdering, SchedulerConfig};

use crate::dispatch::RoutineRegistry;
use crate::error::Result;
use crate::rules::{self, RawRules};
use crate::runtime::TaskRuntime;
use crate::store::{ListConfig, LockFilter, StateFilter, TaskFilters, TaskStore};
use crate::types::{ExecutionSnapshot, ExitStatus, NewTask, Task, TaskState};

/// Knobs consumed by the scheduler core, decoupled from the config layer.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Lock age beyond which a holder is presumed crashed.
    pub lock_timeout: Duration,
    /// Forward-scan bound for cron matching.
    pub cron_horizon: Duration,
    pub ordering: QueueOrdering,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            lock_timeout: Duration::seconds(
                taskmill_core::config::DEFAULT_LOCK_TIMEOUT_SECS as i64,
            ),
            cron_horizon: Duration::days(i64::from(rules::DEFAULT_HORIZON_DAYS)),
            ordering: QueueOrdering::default(),
        }
    }
}

impl From<&SchedulerConfig> for SchedulerOptions {
    fn from(config: &SchedulerConfig) -> Self {
        Self {
            lock_timeout: Duration::seconds(config.lock_timeout_secs as i64),
            cron_horizon: Duration::days(i64::from(config.cron_horizon_days)),
            ordering: config.ordering,
        }
    }
}

/// The outcome of one `run_task`/`run_due_tasks` entry: the task as it
/// stands after the attempt plus the execution snapshot.
#[derive(Debug)]
pub struct RunReport {
    pub task: Task,
    pub snapshot: ExecutionSnapshot,
}

impl RunReport {
    pub fn status(&self) -> ExitStatus {
        self.snapshot.status
    }
}

/// Raw material for creating a task; rule columns are derived on save.
#[derive(Debug, Clone)]
pub struct TaskDefinition {
    pub title: String,
    pub task_type: String,
    pub state: TaskState,
    pub rules: RawRules,
    pub ordering: i64,
    pub priority: i64,
    pub note: Option<String>,
    pub params: serde_json::Value,
}

/// Orchestrates task selection and execution. All collaborators are
/// injected: the store, the routine registry and the clock-free options.
pub struct Scheduler {
    store: Arc<dyn TaskStore>,
    registry: RoutineRegistry,
    options: SchedulerOptions,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        registry: RoutineRegistry,
        options: SchedulerOptions,
    ) -> Self {
        Self {
            store,
            registry,
            options,
        }
    }

    pub fn store(&self) -> &Arc<dyn TaskStore> {
        &self.store
    }

    /// Run a scheduled task.
    ///
    /// `id == 0` picks the next task from the due queue. A positive id
    /// targets that task directly, bypassing the due check (the manual
    /// test-run path), honouring `allow_disabled`.
    ///
    /// Returns `None` when no matching task exists or — for the queue path —
    /// when every due candidate is already locked.
    pub fn run_task(&self, id: i64, allow_disabled: bool) -> Result<Option<RunReport>> {
        if id > 0 {
            let Some(task) = self.store.get(id)? else {
                return Ok(None);
            };
            if task.state == TaskState::Disabled && !allow_disabled {
                return Ok(None);
            }
            // Lock not yet held: the runtime acquires it itself, so a row
            // currently locked by another trigger comes back as NoLock.
            return self.execute(task, false).map(Some);
        }

        let now = Utc::now();
        let candidates = self.store.list(
            &TaskFilters::due_queue(now, now - self.options.lock_timeout),
            &ListConfig {
                ordering: self.options.ordering,
                limit: None,
            },
        )?;

        // Lock while picking: a candidate snapped up by a concurrent trigger
        // just moves us to the next one.
        for mut task in candidates {
            if self
                .store
                .try_acquire_lock(task.id, now, self.options.lock_timeout)?
            {
                task.locked = Some(now);
                return self.execute(task, true).map(Some);
            }
        }
        Ok(None)
    }

    /// Run every due task sequentially, each under its own lock
    /// acquisition. A lock failure on one candidate is reported in its
    /// `RunReport` and does not block the rest.
    pub fn run_due_tasks(&self) -> Result<Vec<RunReport>> {
        let now = Utc::now();
        // Unlike the single-task queue path, locked rows stay in the batch
        // so the caller gets an explicit NoLock report for each of them.
        let filters = TaskFilters {
            lock: LockFilter::Any,
            ..TaskFilters::due_queue(now, now - self.options.lock_timeout)
        };
        let candidates = self.store.list(
            &filters,
            &ListConfig {
                ordering: self.options.ordering,
                limit: None,
            },
        )?;

        let mut reports = Vec::with_capacity(candidates.len());
        for mut task in candidates {
            let now = Utc::now();
            if self
                .store
                .try_acquire_lock(task.id, now, self.options.lock_timeout)?
            {
                task.locked = Some(now);
                reports.push(self.execute(task, true)?);
            } else {
                warn!(task_id = task.id, title = %task.title, "task already locked, skipped");
                reports.push(RunReport {
                    task,
                    snapshot: ExecutionSnapshot {
                        status: ExitStatus::NoLock,
                        ..ExecutionSnapshot::default()
                    },
                });
            }
        }
        Ok(reports)
    }

    /// Fetch a single task record without running it: by id, or the head of
    /// the due queue when `id == 0`.
    pub fn fetch_task_record(&self, id: i64, include_disabled: bool) -> Result<Option<Task>> {
        let now = Utc::now();
        let mut filters = if id > 0 {
            TaskFilters {
                id: Some(id),
                ..TaskFilters::default()
            }
        } else {
            TaskFilters::due_queue(now, now - self.options.lock_timeout)
        };
        if include_disabled {
            filters.state = StateFilter::NotTrashed;
        }
        let list = ListConfig {
            ordering: self.options.ordering,
            limit: Some(1),
        };
        Ok(self.fetch_task_records(&filters, &list)?.into_iter().next())
    }

    /// Read-only queue inspection with caller-supplied filters.
    pub fn fetch_task_records(&self, filters: &TaskFilters, list: &ListConfig) -> Result<Vec<Task>> {
        self.store.list(filters, list)
    }

    pub fn routine_types(&self) -> impl Iterator<Item = &str> {
        self.registry.routine_types()
    }

    /// Create a task from raw rule input, rebuilding the derived columns:
    /// `cron_rules` comes from normalized rules, and the first
    /// `next_execution` from the rules' anchor day/time. The anchor keeps
    /// the schedule phase; the catch-up scan keeps the first run strictly
    /// in the future.
    pub fn create_task(&self, def: TaskDefinition) -> Result<Task> {
        let execution_rules = rules::normalize(&def.rules)?;
        let cron_rules = rules::build(&execution_rules);
        let now = Utc::now();
        let anchor = execution_rules.anchor(now);
        let next_execution = rules::next_execution(
            &cron_rules,
            anchor,
            now,
            true,
            self.options.cron_horizon,
        )?;

        self.store.insert(&NewTask {
            title: def.title,
            task_type: def.task_type,
            state: def.state,
            execution_rules,
            cron_rules,
            ordering: def.ordering,
            priority: def.priority,
            note: def.note,
            params: def.params,
            next_execution: Some(next_execution),
        })
    }

    fn execute(&self, task: Task, lock_held: bool) -> Result<RunReport> {
        let task_id = task.id;
        let title = task.title.clone();
        info!(task_id, %title, "task starting");

        let build = if lock_held {
            TaskRuntime::with_lock_held
        } else {
            TaskRuntime::new
        };
        let mut runtime = build(
            self.store.as_ref(),
            &self.registry,
            self.options.lock_timeout,
            self.options.cron_horizon,
            task,
        );
        let status = runtime.run()?;
        let (task, snapshot) = runtime.into_parts();

        match status {
            ExitStatus::Ok => {
                info!(task_id, %title, duration = snapshot.net_duration, "task complete")
            }
            ExitStatus::NoLock => warn!(task_id, %title, "task locked by another holder"),
            ExitStatus::NoRoutine => {
                warn!(task_id, %title, "task routine not available, schedule advanced")
            }
            ExitStatus::NoRelease => warn!(task_id, %title, "task ran but lock release failed"),
            other => warn!(task_id, %title, status = %other, "task exited abnormally"),
        }

        Ok(RunReport { task, snapshot })
    }
}

/// Next-due instant across the enabled queue, ignoring locks — what an
/// external trigger needs to decide when to fire next.
pub fn next_due(store: &dyn TaskStore) -> Result<Option<DateTime<Utc>>> {
    let tasks = store.list(
        &TaskFilters::default(),
        &ListConfig {
            ordering: QueueOrdering::PriorityThenDue,
            limit: None,
        },
    )?;
    Ok(tasks.into_iter().filter_map(|t| t.next_execution).min())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::RoutineSnapshot;
    use crate::store::SqliteTaskStore;

    fn definition(title: &str, task_type: &str, priority: i64) -> TaskDefinition {
        TaskDefinition {
            title: title.into(),
            task_type: task_type.into(),
            state: TaskState::Enabled,
            rules: RawRules {
                rule_type: "interval-minutes".into(),
                interval_minutes: Some(15),
                exec_day: Some(1),
                exec_time: Some("00:00".into()),
                ..RawRules::default()
            },
            ordering: 0,
            priority,
            note: None,
            params: serde_json::json!({}),
        }
    }

    fn scheduler_with(registry: RoutineRegistry) -> Scheduler {
        let store = Arc::new(SqliteTaskStore::open_in_memory().unwrap());
        Scheduler::new(store, registry, SchedulerOptions::default())
    }

    fn make_due(scheduler: &Scheduler, id: i64) {
        scheduler
            .store()
            .update_next_execution(id, Some(Utc::now() - Duration::minutes(1)))
            .unwrap();
    }

    #[test]
    fn run_next_due_picks_highest_priority() {
        let mut registry = RoutineRegistry::new();
        registry.register("demo.ok", |_ctx| Ok(RoutineSnapshot::ok(None)));
        let scheduler = scheduler_with(registry);

        let low = scheduler.create_task(definition("low", "demo.ok", 1)).unwrap();
        let high = scheduler.create_task(definition("high", "demo.ok", 9)).unwrap();
        make_due(&scheduler, low.id);
        make_due(&scheduler, high.id);

        let report = scheduler.run_task(0, false).unwrap().unwrap();
        assert_eq!(report.task.id, high.id);
        assert_eq!(report.status(), ExitStatus::Ok);
        assert_eq!(report.task.times_executed, 1);
    }

    #[test]
    fn run_task_returns_none_when_nothing_due() {
        let scheduler = scheduler_with(RoutineRegistry::new());
        let task = scheduler
            .create_task(definition("future", "demo.ok", 0))
            .unwrap();
        // next_execution is in the future, so the queue is empty.
        assert!(task.next_execution.unwrap() > Utc::now() - Duration::minutes(1));
        assert!(scheduler.run_task(0, false).unwrap().is_none());
    }

    #[test]
    fn run_by_id_bypasses_due_check_and_respects_disabled() {
        let mut registry = RoutineRegistry::new();
        registry.register("demo.ok", |_ctx| Ok(RoutineSnapshot::ok(None)));
        let scheduler = scheduler_with(registry);

        let task = scheduler
            .create_task(definition("manual", "demo.ok", 0))
            .unwrap();
        // Not due, but a direct run executes anyway.
        let report = scheduler.run_task(task.id, false).unwrap().unwrap();
        assert_eq!(report.status(), ExitStatus::Ok);

        scheduler
            .store()
            .set_state(task.id, TaskState::Disabled)
            .unwrap();
        assert!(scheduler.run_task(task.id, false).unwrap().is_none());
        let report = scheduler.run_task(task.id, true).unwrap().unwrap();
        assert_eq!(report.status(), ExitStatus::Ok);
    }

    #[test]
    fn run_due_tasks_processes_all_candidates() {
        let mut registry = RoutineRegistry::new();
        registry.register("demo.ok", |_ctx| Ok(RoutineSnapshot::ok(None)));
        let scheduler = scheduler_with(registry);

        let a = scheduler.create_task(definition("a", "demo.ok", 0)).unwrap();
        let b = scheduler.create_task(definition("b", "demo.ok", 0)).unwrap();
        make_due(&scheduler, a.id);
        make_due(&scheduler, b.id);

        let reports = scheduler.run_due_tasks().unwrap();
        assert_eq!(reports.len(), 2);
        assert!(reports.iter().all(|r| r.status() == ExitStatus::Ok));
    }

    #[test]
    fn locked_candidate_reports_no_lock_but_does_not_block_batch() {
        let mut registry = RoutineRegistry::new();
        registry.register("demo.ok", |_ctx| Ok(RoutineSnapshot::ok(None)));
        let scheduler = scheduler_with(registry);

        let stuck = scheduler
            .create_task(definition("stuck", "demo.ok", 9))
            .unwrap();
        let free = scheduler.create_task(definition("free", "demo.ok", 0)).unwrap();
        make_due(&scheduler, stuck.id);
        make_due(&scheduler, free.id);
        // A fresh (non-stale) lock held by someone else.
        scheduler
            .store()
            .try_acquire_lock(stuck.id, Utc::now(), Duration::seconds(300))
            .unwrap();

        let reports = scheduler.run_due_tasks().unwrap();
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].task.id, stuck.id);
        assert_eq!(reports[0].status(), ExitStatus::NoLock);
        assert_eq!(reports[1].task.id, free.id);
        assert_eq!(reports[1].status(), ExitStatus::Ok);

        // The locked candidate's row was never mutated.
        let row = scheduler.store().get(stuck.id).unwrap().unwrap();
        assert_eq!(row.times_executed, 0);

        // The single-task queue path also skips over it.
        make_due(&scheduler, free.id);
        let report = scheduler.run_task(0, false).unwrap().unwrap();
        assert_eq!(report.task.id, free.id);
    }

    #[test]
    fn direct_run_on_foreign_locked_task_reports_no_lock() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let ran = Arc::new(AtomicBool::new(false));
        let mut registry = RoutineRegistry::new();
        let ran_flag = Arc::clone(&ran);
        registry.register("demo.ok", move |_ctx| {
            ran_flag.store(true, Ordering::SeqCst);
            Ok(RoutineSnapshot::ok(None))
        });
        let scheduler = scheduler_with(registry);
        let task = scheduler
            .create_task(definition("held", "demo.ok", 0))
            .unwrap();
        make_due(&scheduler, task.id);
        // Another trigger holds a fresh lock on the row.
        scheduler
            .store()
            .try_acquire_lock(task.id, Utc::now(), Duration::seconds(300))
            .unwrap();

        let report = scheduler.run_task(task.id, false).unwrap().unwrap();
        assert_eq!(report.status(), ExitStatus::NoLock);
        assert!(!ran.load(Ordering::SeqCst));

        let row = scheduler.store().get(task.id).unwrap().unwrap();
        assert_eq!(row.times_executed, 0);
        assert!(row.locked.is_some());

        // Once the holder releases, the same direct run goes through.
        scheduler.store().release_lock(task.id, None).unwrap();
        let report = scheduler.run_task(task.id, false).unwrap().unwrap();
        assert_eq!(report.status(), ExitStatus::Ok);
        assert!(ran.load(Ordering::SeqCst));
    }

    #[test]
    fn unregistered_type_reports_no_routine_and_reschedules() {
        let scheduler = scheduler_with(RoutineRegistry::new());
        let task = scheduler
            .create_task(definition("orphan", "plugin.gone", 0))
            .unwrap();
        make_due(&scheduler, task.id);

        let report = scheduler.run_task(0, false).unwrap().unwrap();
        assert_eq!(report.status(), ExitStatus::NoRoutine);
        let row = scheduler.store().get(task.id).unwrap().unwrap();
        assert_eq!(row.times_executed, 0);
        assert!(row.next_execution.unwrap() > Utc::now());
    }

    #[test]
    fn fetch_task_record_is_read_only() {
        let scheduler = scheduler_with(RoutineRegistry::new());
        let task = scheduler
            .create_task(definition("inspect", "demo.ok", 0))
            .unwrap();
        make_due(&scheduler, task.id);

        let head = scheduler.fetch_task_record(0, false).unwrap().unwrap();
        assert_eq!(head.id, task.id);
        let row = scheduler.store().get(task.id).unwrap().unwrap();
        assert!(row.locked.is_none());
        assert_eq!(row.times_executed, 0);

        scheduler
            .store()
            .set_state(task.id, TaskState::Disabled)
            .unwrap();
        assert!(scheduler.fetch_task_record(task.id, false).unwrap().is_none());
        assert!(scheduler.fetch_task_record(task.id, true).unwrap().is_some());
    }
}
