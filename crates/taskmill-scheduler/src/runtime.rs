//! Task runtime: drives one task record through a single execution.
//!
//! The run is a small state machine: lock acquire, routine dispatch,
//! snapshot capture, counter and timestamp mutation, lock release. Two
//! constructors exist — [`TaskRuntime::with_lock_held`] for callers that
//! already acquired the lock while fetching from the queue, and
//! [`TaskRuntime::new`] for everything else — and both converge immediately
//! after lock acquisition. The `locked` column on the task itself is never
//! trusted as proof of ownership: a non-null value may belong to another
//! active holder.

use chrono::{DateTime, Duration, Utc};
use tracing::warn;

use crate::dispatch::{RoutineContext, RoutineRegistry};
use crate::error::Result;
use crate::rules;
use crate::store::{TaskStore, TaskWriteback};
use crate::types::{ExecutionSnapshot, ExitStatus, Task};

/// Wraps one task record for a single execution attempt.
pub struct TaskRuntime<'a> {
    store: &'a dyn TaskStore,
    registry: &'a RoutineRegistry,
    lock_timeout: Duration,
    cron_horizon: Duration,
    task: Task,
    snapshot: ExecutionSnapshot,
    /// Whether this runtime owns the row lock. Set on construction by the
    /// queue-fetch path, or after a successful acquire in [`Self::run`].
    lock_held: bool,
}

impl<'a> TaskRuntime<'a> {
    /// Runtime for a task whose lock has not been acquired; [`Self::run`]
    /// acquires it first and aborts with `NoLock` when it cannot.
    pub fn new(
        store: &'a dyn TaskStore,
        registry: &'a RoutineRegistry,
        lock_timeout: Duration,
        cron_horizon: Duration,
        task: Task,
    ) -> Self {
        Self {
            store,
            registry,
            lock_timeout,
            cron_horizon,
            task,
            snapshot: ExecutionSnapshot::default(),
            lock_held: false,
        }
    }

    /// Runtime for a task the caller locked via `try_acquire_lock` while
    /// fetching it from the queue.
    pub fn with_lock_held(
        store: &'a dyn TaskStore,
        registry: &'a RoutineRegistry,
        lock_timeout: Duration,
        cron_horizon: Duration,
        task: Task,
    ) -> Self {
        Self {
            lock_held: true,
            ..Self::new(store, registry, lock_timeout, cron_horizon, task)
        }
    }

    pub fn task(&self) -> &Task {
        &self.task
    }

    pub fn snapshot(&self) -> &ExecutionSnapshot {
        &self.snapshot
    }

    pub fn into_parts(self) -> (Task, ExecutionSnapshot) {
        (self.task, self.snapshot)
    }

    /// Execute the task end to end.
    ///
    /// Returns `Err` only when the storage layer fails outright; every
    /// expected condition (lock busy, missing routine, routine failure,
    /// lost release) comes back as an [`ExitStatus`].
    pub fn run(&mut self) -> Result<ExitStatus> {
        // Lock acquisition, unless the caller pre-acquired while fetching
        // from the queue. A non-null `locked` on the record alone proves
        // nothing — it may be another holder's live lock.
        if !self.lock_held {
            let now = Utc::now();
            if !self
                .store
                .try_acquire_lock(self.task.id, now, self.lock_timeout)?
            {
                // Another holder is active: report and leave the row untouched.
                self.snapshot.status = ExitStatus::NoLock;
                return Ok(ExitStatus::NoLock);
            }
            self.task.locked = Some(now);
            self.lock_held = true;
        }

        if !self.registry.contains(&self.task.task_type) {
            return self.skip_missing_routine();
        }

        // Dispatch. The registry contains routine errors and panics.
        let task_start = Utc::now();
        self.snapshot.task_start = Some(task_start);
        let result = self.registry.dispatch(&RoutineContext {
            task_id: self.task.id,
            task_type: &self.task.task_type,
            params: &self.task.params,
        });
        let task_end = Utc::now();
        self.snapshot.task_end = Some(task_end);
        self.snapshot.net_duration = (task_end - task_start).num_milliseconds() as f64 / 1000.0;
        self.snapshot.status = result.status;
        self.snapshot.output = result.output;
        self.snapshot.exception = result.exception;

        self.finalize(task_start)
    }

    /// The task's type has no registered routine: advance `next_execution`
    /// so the task doesn't spin forever re-attempting, then release without
    /// touching counters or duration bookkeeping.
    fn skip_missing_routine(&mut self) -> Result<ExitStatus> {
        self.snapshot.status = ExitStatus::NoRoutine;
        let next = self.next_after(self.task.rule_basis());
        self.store.update_next_execution(self.task.id, next)?;
        self.task.next_execution = next;

        if !self.store.release_lock(self.task.id, None)? {
            self.snapshot.status = ExitStatus::NoRelease;
        }
        self.task.locked = None;
        Ok(self.snapshot.status)
    }

    /// Fold the snapshot back into the task row and release the lock in one
    /// atomic write.
    fn finalize(&mut self, task_start: DateTime<Utc>) -> Result<ExitStatus> {
        let next = self.next_after(task_start);
        let failed = !self.snapshot.status.is_success();

        let writeback = TaskWriteback {
            last_exit_code: self.snapshot.status.code(),
            last_execution: Some(task_start),
            next_execution: next,
            failed,
        };

        if !self.store.release_lock(self.task.id, Some(&writeback))? {
            // Lock was lost or the row vanished mid-run. Reportable, not
            // retried: the next trigger sees whatever state the row is in.
            self.snapshot.status = ExitStatus::NoRelease;
            return Ok(ExitStatus::NoRelease);
        }

        self.task.last_exit_code = writeback.last_exit_code;
        self.task.last_execution = Some(task_start);
        self.task.next_execution = next;
        self.task.times_executed += 1;
        if failed {
            self.task.times_failed += 1;
        }
        self.task.locked = None;
        Ok(self.snapshot.status)
    }

    /// Next execution strictly after now, or None to park the task when its
    /// rule has become unsatisfiable — the lock must still be released, so
    /// rule errors are downgraded to a warning here.
    fn next_after(&self, basis: DateTime<Utc>) -> Option<DateTime<Utc>> {
        match rules::next_execution(
            &self.task.cron_rules,
            basis,
            Utc::now(),
            true,
            self.cron_horizon,
        ) {
            Ok(next) => Some(next),
            Err(e) => {
                warn!(
                    task_id = self.task.id,
                    "cannot compute next execution, parking task: {e}"
                );
                None
            }
        }
    }
}
