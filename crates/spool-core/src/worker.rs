//! Workers and the worker pool.
//!
//! A [`Worker`] runs exactly one attempt of one task and drives the task's
//! state machine around it. The [`WorkerPool`] is a fixed set of workers;
//! holding a [`WorkerSlot`] is the only license to run a task.
//!
//! # 設計メモ
//! - `run` もフックもユーザーコードなので、どれが panic しても worker の外へは漏らさない
//! - slot の返却は RAII（`WorkerSlot` の drop）で行い、返し忘れを型で防ぐ
//! - 取得はノンブロッキング。空きがなければ `None` を返し、次の完了時に再度 dispatch される

use std::any::Any;
use std::backtrace::Backtrace;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use futures::FutureExt;
use parking_lot::Mutex;

use crate::domain::{State, TaskError};
use crate::queue::{Decision, decide};
use crate::task::Task;

/// Execution right with a stable id (for logs).
#[derive(Debug)]
pub struct Worker {
    id: usize,
}

impl Worker {
    pub fn id(&self) -> usize {
        self.id
    }

    /// Run one attempt of `task`.
    ///
    /// Flow:
    /// 1. `WaitingRetry` -> `BeforeRetry` + before-retry hook (retries only)
    /// 2. `Running`, then `run()` behind the unwind boundary
    /// 3. Ok  -> `Succeeded` + on-succeeded hook, error cleared
    /// 4. Err -> [`Worker::fail`]
    ///
    /// With `timeout`, the attempt sees a child of the task's root token and
    /// is abandoned once the deadline passes (`TaskError::Timeout`).
    ///
    /// Hooks sit behind the same boundary. A panicking before-retry hook
    /// fails the attempt without running it; a panic in the succeeded or
    /// failed hook is logged and the transition completes.
    pub async fn execute<T: Task>(&self, task: &T, timeout: Option<Duration>) {
        let base = task.base();
        if base.state() == State::WaitingRetry {
            base.set_state(State::BeforeRetry);
            if let Err(err) = self
                .guard_hook(task, "on_before_retry", task.on_before_retry())
                .await
            {
                self.fail(task, err).await;
                return;
            }
        }
        base.set_state(State::Running);

        match self.run_guarded(task, timeout).await {
            Ok(()) => {
                base.set_state(State::Succeeded);
                // logged inside; the attempt already succeeded
                let _ = self
                    .guard_hook(task, "on_succeeded", task.on_succeeded())
                    .await;
                base.set_error(None);
                tracing::debug!(worker = self.id, task = %base.id(), "task succeeded");
            }
            Err(err) => self.fail(task, err).await,
        }
    }

    /// The single unwind boundary around a work body: a panic inside `run`
    /// becomes `TaskError::Panicked` and goes through the normal failure path.
    async fn run_guarded<T: Task>(&self, task: &T, timeout: Option<Duration>) -> Result<(), TaskError> {
        let base = task.base();
        let Some(timeout) = timeout.filter(|d| *d > Duration::ZERO) else {
            return AssertUnwindSafe(task.run())
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| Err(self.panic_error(task, "run", payload)));
        };

        let ctx = base.cancel_token().child_token();
        base.set_ctx(ctx.clone());
        let run = AssertUnwindSafe(task.run()).catch_unwind();
        match tokio::time::timeout(timeout, run).await {
            Ok(outcome) => {
                outcome.unwrap_or_else(|payload| Err(self.panic_error(task, "run", payload)))
            }
            Err(_elapsed) => {
                // the work body was dropped; fire its token for anything it spawned
                ctx.cancel();
                Err(TaskError::Timeout { timeout })
            }
        }
    }

    /// Run a lifecycle hook behind the unwind boundary.
    async fn guard_hook<T, F>(&self, task: &T, stage: &'static str, hook: F) -> Result<(), TaskError>
    where
        T: Task,
        F: Future<Output = ()>,
    {
        AssertUnwindSafe(hook)
            .catch_unwind()
            .await
            .map_err(|payload| self.panic_error(task, stage, payload))
    }

    fn panic_error<T: Task>(
        &self,
        task: &T,
        stage: &'static str,
        payload: Box<dyn Any + Send>,
    ) -> TaskError {
        let message = if let Some(s) = payload.downcast_ref::<&str>() {
            (*s).to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "unknown panic payload".to_string()
        };
        let backtrace = Backtrace::force_capture().to_string();
        tracing::error!(
            worker = self.id,
            task = %task.base().id(),
            stage,
            panic = %message,
            "panic in task, stack trace:\n{backtrace}"
        );
        TaskError::Panicked { message, backtrace }
    }

    /// Failure path: record the error, classify, then retry or fail.
    ///
    /// A canceled task stops at `Canceled`: no retry and no on-failed hook.
    async fn fail<T: Task>(&self, task: &T, err: TaskError) {
        let base = task.base();
        base.set_error(Some(err.clone()));
        if err.is_canceled() {
            base.set_state(State::Canceled);
            tracing::info!(worker = self.id, task = %base.id(), "task canceled");
            return;
        }
        base.set_state(State::Errored);

        match decide(task, &err) {
            Decision::Retry { retry, max_retry } => {
                base.set_retry(retry, max_retry);
                base.set_state(State::WaitingRetry);
                tracing::warn!(
                    worker = self.id,
                    task = %base.id(),
                    error = %err,
                    retry,
                    max_retry,
                    "task errored, retry scheduled"
                );
            }
            Decision::Fail { reason } => {
                base.set_state(State::Failing);
                // logged inside; the task fails either way
                let _ = self.guard_hook(task, "on_failed", task.on_failed()).await;
                base.set_state(State::Failed);
                tracing::warn!(
                    worker = self.id,
                    task = %base.id(),
                    error = %err,
                    kind = err.as_label(),
                    reason = reason.as_str(),
                    "task failed"
                );
            }
        }
    }
}

/// Fixed-size set of interchangeable workers.
///
/// Acquisition never blocks: [`WorkerPool::try_acquire`] either hands out a
/// slot or returns `None` when every worker is busy.
pub struct WorkerPool {
    idle: Mutex<Vec<Worker>>,
    working: AtomicUsize,
    size: usize,
}

impl WorkerPool {
    pub fn new(size: usize) -> Arc<Self> {
        let size = size.max(1);
        let idle = (0..size).rev().map(|id| Worker { id }).collect();
        Arc::new(Self {
            idle: Mutex::new(idle),
            working: AtomicUsize::new(0),
            size,
        })
    }

    pub fn try_acquire(self: &Arc<Self>) -> Option<WorkerSlot> {
        let worker = {
            let mut idle = self.idle.lock();
            let worker = idle.pop()?;
            self.working.fetch_add(1, Ordering::SeqCst);
            worker
        };
        Some(WorkerSlot {
            worker,
            pool: Arc::clone(self),
        })
    }

    /// Number of slots currently held.
    pub fn working(&self) -> usize {
        self.working.load(Ordering::SeqCst)
    }

    pub fn size(&self) -> usize {
        self.size
    }
}

/// A held worker. Dropping the slot returns the worker to its pool.
pub struct WorkerSlot {
    worker: Worker,
    pool: Arc<WorkerPool>,
}

impl std::ops::Deref for WorkerSlot {
    type Target = Worker;

    fn deref(&self) -> &Worker {
        &self.worker
    }
}

impl Drop for WorkerSlot {
    fn drop(&mut self) {
        self.pool.idle.lock().push(Worker { id: self.worker.id });
        self.pool.working.fetch_sub(1, Ordering::SeqCst);
    }
}
