//! Manager: the engine that owns a task registry, a pending queue and a
//! worker pool, and keeps a JSON snapshot of them.
//!
//! # Flow
//! ```text
//! add ──> registry + queue ──> dispatch ──> WorkerSlot ──> Worker::execute
//!                 ^                                            │
//!                 └──────────── WaitingRetry (re-enqueue) ─────┘
//! any setter ──> request_flush ──> Flusher (debounced) ──> SnapshotStore
//! ```
//!
//! # Locking
//! Task setters fire the persistence trigger, and the trigger may serialize
//! the whole registry. No registry guard, queue lock or base lock is ever
//! held while a setter runs: handles are cloned out first.
//!
//! # 設計メモ
//! - manager ごとに registry / queue / pool / snapshot を持つ（プロセス共有の状態はなし）
//! - dispatch は実行完了のたびに呼び直される。空き worker と待ちタスクのどちらかが尽きるまで詰める
//! - 実行が panic で巻き戻っても `Redispatch` の drop で次の dispatch が走る

mod options;


pub use options::{DEFAULT_PERSIST_DEBOUNCE, DEFAULT_WORKERS, ManagerConfig, Options};

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::Mutex;
use tokio::runtime::Handle;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

use crate::domain::{IdGenerator, State, TaskError};
use crate::error::EngineError;
use crate::observability::{StateCounts, TaskInfo};
use crate::persist::{Flusher, SnapshotStore};
use crate::queue::PendingQueue;
use crate::task::{PersistFn, Task, TaskBase};
use crate::worker::{WorkerPool, WorkerSlot};

/// Handle to a running engine. Cheap to clone; all clones drive the same
/// engine, which shuts its background flusher down when the last one drops.
pub struct Manager<T: Task> {
    inner: Arc<Inner<T>>,
}

impl<T: Task> Clone for Manager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<T: Task> {
    tasks: DashMap<String, Arc<T>>,
    queue: PendingQueue<T>,
    workers: Arc<WorkerPool>,
    running: AtomicBool,
    max_retry: u32,
    timeout: Option<Duration>,

    store: Option<Arc<dyn SnapshotStore>>,
    /// `None` means every trigger flushes synchronously.
    flusher: Option<Arc<Flusher>>,
    /// Serializes `save` calls.
    save_lock: Mutex<()>,
    /// Set while the snapshot is being loaded; a partial registry is never saved.
    recovering: AtomicBool,
    /// Bound into every task; holds a weak reference back to this engine.
    trigger: PersistFn,

    shutdown: CancellationToken,
    handle: Handle,
    span: tracing::Span,
    id_generator: Arc<dyn IdGenerator>,
}

impl<T: Task> Manager<T> {
    /// Build an engine and recover the snapshot, if one is configured.
    ///
    /// Must be called inside a tokio runtime: task executions and the flush
    /// loop are spawned onto it. A snapshot that cannot be read or parsed
    /// is an error rather than something to overwrite later.
    pub fn new(options: Options) -> Result<Self, EngineError> {
        let handle = Handle::try_current().map_err(|_| EngineError::NoRuntime)?;
        let store = options.snapshot_store();
        let flusher = match (&store, options.persist_debounce) {
            (Some(_), Some(debounce)) if debounce > Duration::ZERO => {
                Some(Arc::new(Flusher::new(debounce)))
            }
            _ => None,
        };

        let inner = Arc::new_cyclic(|weak: &Weak<Inner<T>>| {
            let weak = weak.clone();
            let trigger: PersistFn = Arc::new(move || {
                if let Some(inner) = weak.upgrade() {
                    inner.request_flush();
                }
            });
            Inner {
                tasks: DashMap::new(),
                queue: PendingQueue::new(),
                workers: WorkerPool::new(options.worker_count()),
                running: AtomicBool::new(options.running),
                max_retry: options.max_retry,
                timeout: options.timeout,
                store,
                flusher,
                save_lock: Mutex::new(()),
                recovering: AtomicBool::new(false),
                trigger,
                shutdown: CancellationToken::new(),
                handle,
                span: options.execution_span(),
                id_generator: Arc::clone(&options.id_generator),
            }
        });

        let manager = Self { inner };
        manager.recover()?;
        manager.spawn_flusher();

        tracing::info!(
            parent: &manager.inner.span,
            workers = manager.inner.workers.size(),
            max_retry = manager.inner.max_retry,
            persistent = manager.inner.store.is_some(),
            "manager started"
        );
        Ok(manager)
    }

    fn spawn_flusher(&self) {
        let Some(flusher) = self.inner.flusher.clone() else {
            return;
        };
        let weak = Arc::downgrade(&self.inner);
        let shutdown = self.inner.shutdown.clone();
        let span = self.inner.span.clone();
        self.inner.handle.spawn(
            async move {
                flusher
                    .run(shutdown, || match weak.upgrade() {
                        Some(inner) => {
                            inner.persist_logged();
                            true
                        }
                        None => false,
                    })
                    .await;
                tracing::debug!("flush loop stopped");
            }
            .instrument(span),
        );
    }

    /// Load the snapshot and re-admit every task in it.
    ///
    /// Recoverable tasks go through [`Manager::add`], which normalizes
    /// in-flight states. The others are registered as `Failed` with
    /// [`TaskError::Interrupted`] and never run.
    fn recover(&self) -> Result<(), EngineError> {
        let Some(store) = &self.inner.store else {
            return Ok(());
        };
        let Some(data) = store.load()? else {
            return Ok(());
        };
        let tasks: Vec<T> = serde_json::from_slice(&data)?;
        let total = tasks.len();
        let mut interrupted = 0usize;

        self.inner.recovering.store(true, Ordering::SeqCst);

        for task in tasks {
            if task.recoverable() {
                self.add(task);
                continue;
            }
            interrupted += 1;
            self.inner.bind(&task, CancellationToken::new());
            let base = task.base();
            base.set_state(State::Failed);
            base.set_error(Some(TaskError::Interrupted));
            let id = base.id();
            self.inner.tasks.insert(id, Arc::new(task));
        }
        self.inner.recovering.store(false, Ordering::SeqCst);
        self.inner.request_flush();

        tracing::info!(
            parent: &self.inner.span,
            total,
            interrupted,
            "recovered tasks from snapshot"
        );
        Ok(())
    }

    /// Admit a task.
    ///
    /// The task gets a fresh cancellation token and the persistence trigger,
    /// an id if it has none, and the default retry budget if its own is
    /// zero. States left over from an interrupted run are normalized:
    /// `Running` -> `Pending`, `Canceling` -> `Canceled`, `Failing` -> `Failed`.
    /// Tasks not in a done state are queued.
    ///
    /// Admitting a task whose id is already registered replaces the old
    /// entry and retracts it from the queue.
    pub fn add(&self, task: T) -> Arc<T> {
        let inner = &self.inner;
        inner.bind(&task, CancellationToken::new());

        let base = task.base();
        let (retry, max_retry) = base.retry();
        if max_retry == 0 {
            base.set_retry(retry, inner.max_retry);
        }
        match base.state() {
            State::Running => base.set_state(State::Pending),
            State::Canceling => {
                base.set_state(State::Canceled);
                base.set_error(Some(TaskError::Canceled));
            }
            State::Failing => base.set_state(State::Failed),
            _ => {}
        }

        let id = base.id();
        let done = base.state().is_done();
        let task = Arc::new(task);
        if let Some(previous) = inner.tasks.insert(id.clone(), Arc::clone(&task)) {
            inner.queue.retain(|queued| !Arc::ptr_eq(queued, &previous));
            tracing::warn!(parent: &inner.span, task = %id, "task id reused, previous entry replaced");
        }
        if !done {
            inner.queue.push(Arc::clone(&task));
        }
        tracing::debug!(parent: &inner.span, task = %id, queued = !done, "task added");

        inner.request_flush();
        self.dispatch();
        task
    }

    /// Hand queued tasks to free workers until either runs out.
    fn dispatch(&self) {
        let inner = &self.inner;
        loop {
            if !inner.running.load(Ordering::SeqCst) {
                return;
            }
            let Some(slot) = inner.workers.try_acquire() else {
                return;
            };
            let Some(task) = inner.queue.pop() else {
                drop(slot);
                // a push may have raced the release; look again
                if inner.queue.is_empty() {
                    return;
                }
                continue;
            };
            tracing::debug!(parent: &inner.span, worker = slot.id(), task = %task.base().id(), "task dispatched");

            let manager = self.clone();
            inner
                .handle
                .spawn(manager.execute(slot, task).instrument(inner.span.clone()));
        }
    }

    async fn execute(self, slot: WorkerSlot, task: Arc<T>) {
        // declared before the slot so it drops after it: the worker is back
        // in the pool when dispatch runs, also when a trigger unwinds
        let _continue = Redispatch(self.clone());
        let slot = slot;

        let base = task.base();
        if base.state() == State::Canceling {
            // canceled while queued
            finish_canceled(base);
            tracing::info!(worker = slot.id(), task = %base.id(), "task canceled before start");
            return;
        }

        tracing::info!(worker = slot.id(), task = %base.id(), "worker executes task");
        slot.execute(task.as_ref(), self.inner.timeout).await;
        match base.state() {
            State::WaitingRetry if self.inner.is_registered(&task) => {
                self.inner.queue.push(Arc::clone(&task));
            }
            // canceled between the retry decision and the re-enqueue
            State::Canceling => {
                finish_canceled(base);
                tracing::info!(worker = slot.id(), task = %base.id(), "task canceled before retry");
            }
            _ => {}
        }
    }

    /// Request cancellation of a task. Done tasks are left untouched.
    pub fn cancel(&self, id: &str) {
        if let Some(task) = self.get_by_id(id) {
            self.cancel_task(&task);
        }
    }

    pub fn cancel_all(&self) {
        for task in self.get_all() {
            self.cancel_task(&task);
        }
    }

    fn cancel_task(&self, task: &Arc<T>) {
        let base = task.base();
        if base.set_state_if(|state| !state.is_done(), State::Canceling) {
            base.cancel_token().cancel();
            tracing::info!(parent: &self.inner.span, task = %base.id(), "cancel requested");
        }
    }

    /// Every registered task, ordered by id (admission order for generated ids).
    pub fn get_all(&self) -> Vec<Arc<T>> {
        self.inner.all()
    }

    pub fn get_by_id(&self, id: &str) -> Option<Arc<T>> {
        self.inner.tasks.get(id).map(|entry| Arc::clone(entry.value()))
    }

    /// Registered tasks whose state is one of `states`.
    pub fn get_by_state(&self, states: &[State]) -> Vec<Arc<T>> {
        self.get_all()
            .into_iter()
            .filter(|task| states.contains(&task.base().state()))
            .collect()
    }

    /// Drop a task from the registry and the queue.
    ///
    /// A running task is not interrupted (cancel it first for that), but it
    /// will not be queued again for a retry.
    pub fn remove(&self, id: &str) -> Option<Arc<T>> {
        let (_, task) = self.inner.tasks.remove(id)?;
        self.inner.queue.retain(|queued| !Arc::ptr_eq(queued, &task));
        tracing::debug!(parent: &self.inner.span, task = %id, "task removed");
        self.inner.request_flush();
        Some(task)
    }

    pub fn remove_all(&self) {
        let ids: Vec<String> = self.inner.tasks.iter().map(|entry| entry.key().clone()).collect();
        for id in ids {
            self.remove(&id);
        }
    }

    pub fn remove_by_state(&self, states: &[State]) {
        for task in self.get_by_state(states) {
            self.remove(&task.base().id());
        }
    }

    /// Re-run a task that already reached a done state.
    ///
    /// Bypasses the automatic retry gate: the counter restarts at zero, the
    /// last error is cleared and the task gets a fresh cancellation token.
    /// Returns `false` (and does nothing) for unknown or unfinished tasks.
    pub fn retry(&self, id: &str) -> bool {
        let Some(task) = self.get_by_id(id) else {
            return false;
        };
        let base = task.base();
        if !base.set_state_if(State::is_done, State::WaitingRetry) {
            tracing::debug!(parent: &self.inner.span, task = %id, "retry ignored, task not done");
            return false;
        }
        base.set_cancel_token(CancellationToken::new());
        base.set_error(None);
        let (_, max_retry) = base.retry();
        base.set_retry(0, max_retry);

        self.inner.queue.push(task);
        tracing::info!(parent: &self.inner.span, task = %id, "manual retry queued");
        self.dispatch();
        true
    }

    /// Manually retry every `Failed` task.
    pub fn retry_all_failed(&self) {
        for task in self.get_by_state(&[State::Failed]) {
            self.retry(&task.base().id());
        }
    }

    /// Enable dispatch and fill every free worker.
    pub fn start(&self) {
        self.inner.running.store(true, Ordering::SeqCst);
        self.dispatch();
    }

    /// Stop handing out new work. Running attempts finish normally.
    pub fn pause(&self) {
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::SeqCst)
    }

    /// Resolves once the queue is empty and no worker is busy.
    ///
    /// Polls cooperatively. Never resolves while the manager is paused with
    /// work queued.
    pub async fn wait(&self) {
        while !self.inner.is_idle() {
            tokio::task::yield_now().await;
        }
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.inner.queue.len()
    }

    /// Number of workers currently executing.
    pub fn working(&self) -> usize {
        self.inner.workers.working()
    }

    pub fn infos(&self) -> Vec<TaskInfo> {
        self.get_all().iter().map(|task| TaskInfo::of(task.as_ref())).collect()
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for task in self.get_all() {
            counts.record(task.base().state());
        }
        counts
    }

    /// Write the snapshot now, bypassing the debounce window.
    pub fn flush(&self) -> Result<(), EngineError> {
        if let Some(flusher) = &self.inner.flusher {
            flusher.take_dirty();
        }
        self.inner.persist()
    }
}

/// Offers freed capacity to the queue when an execution ends, however it ends.
struct Redispatch<T: Task>(Manager<T>);

impl<T: Task> Drop for Redispatch<T> {
    fn drop(&mut self) {
        self.0.dispatch();
    }
}

fn finish_canceled(base: &TaskBase) {
    if base.set_state_if(|state| state == State::Canceling, State::Canceled) {
        base.set_error(Some(TaskError::Canceled));
    }
}

impl<T: Task> Inner<T> {
    /// Attach the engine's infrastructure to a task.
    fn bind(&self, task: &T, token: CancellationToken) {
        let base = task.base();
        base.set_cancel_token(token);
        base.set_persist(Arc::clone(&self.trigger));
        if base.id().is_empty() {
            base.set_id(self.id_generator.generate());
        }
    }

    fn all(&self) -> Vec<Arc<T>> {
        let mut tasks: Vec<Arc<T>> = self
            .tasks
            .iter()
            .map(|entry| Arc::clone(entry.value()))
            .collect();
        tasks.sort_by_cached_key(|task| task.base().id());
        tasks
    }

    /// Is this exact task still the registered one for its id?
    fn is_registered(&self, task: &Arc<T>) -> bool {
        let id = task.base().id();
        self.tasks
            .get(&id)
            .is_some_and(|entry| Arc::ptr_eq(entry.value(), task))
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.workers.working() == 0
    }

    fn request_flush(&self) {
        if self.store.is_none() || self.recovering.load(Ordering::SeqCst) {
            return;
        }
        match &self.flusher {
            Some(flusher) => flusher.request(),
            None => self.persist_logged(),
        }
    }

    fn persist_logged(&self) {
        if let Err(err) = self.persist() {
            tracing::error!(parent: &self.span, error = %err, "failed to persist tasks");
        }
    }

    /// Serialize every persistable task and replace the snapshot.
    fn persist(&self) -> Result<(), EngineError> {
        let Some(store) = &self.store else {
            return Ok(());
        };
        let tasks = self.all();
        let refs: Vec<&T> = tasks
            .iter()
            .filter(|task| task.persistable())
            .map(|task| &**task)
            .collect();
        let data = serde_json::to_vec(&refs)?;

        let _guard = self.save_lock.lock();
        store.save(&data)?;
        tracing::trace!(parent: &self.span, tasks = refs.len(), bytes = data.len(), "snapshot saved");
        Ok(())
    }
}

impl<T: Task> Drop for Inner<T> {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if self.flusher.as_ref().is_some_and(|flusher| flusher.take_dirty()) {
            self.persist_logged();
        }
    }
}
