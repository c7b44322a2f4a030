//! TaskBase: bookkeeping embedded by every concrete task.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use tokio_util::sync::CancellationToken;

use crate::domain::{State, TaskError};

/// Durability trigger bound by the manager. Fired by every mutating setter.
pub type PersistFn = Arc<dyn Fn() + Send + Sync>;

/// Bookkeeping shared by all tasks: identity, state, progress, last error,
/// retry counters, cancellation and the persistence trigger.
///
/// Design:
/// - Embedded by value in a concrete task (`#[serde(flatten)]` works).
/// - Interior mutability: the task is shared (`Arc`) between the registry,
///   the queue and the executing worker, so setters take `&self`.
/// - Every setter fires the bound persistence trigger after releasing the lock.
/// - Only `id`, `state`, `retry` and `max_retry` are part of the snapshot.
pub struct TaskBase {
    inner: Mutex<BaseInner>,
}

struct BaseInner {
    id: String,
    state: State,
    retry: u32,
    max_retry: u32,
    progress: f64,
    error: Option<TaskError>,

    /// Root token; `cancel()` fires it.
    token: CancellationToken,

    /// Token seen by the current attempt (the root, or a child of it when a
    /// deadline applies).
    ctx: CancellationToken,

    persist: Option<PersistFn>,
}

impl TaskBase {
    pub fn new() -> Self {
        Self::from_snapshot(BaseSnapshot::default())
    }

    /// A base carrying a caller-chosen identity.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self::from_snapshot(BaseSnapshot {
            id: id.into(),
            ..BaseSnapshot::default()
        })
    }

    fn from_snapshot(snapshot: BaseSnapshot) -> Self {
        let token = CancellationToken::new();
        Self {
            inner: Mutex::new(BaseInner {
                id: snapshot.id,
                state: snapshot.state,
                retry: snapshot.retry,
                max_retry: snapshot.max_retry,
                progress: 0.0,
                error: None,
                ctx: token.clone(),
                token,
                persist: None,
            }),
        }
    }

    fn snapshot(&self) -> BaseSnapshot {
        let inner = self.inner.lock();
        BaseSnapshot {
            id: inner.id.clone(),
            state: inner.state,
            retry: inner.retry,
            max_retry: inner.max_retry,
        }
    }

    /// Apply a mutation, then fire the trigger with the lock released.
    fn mutate(&self, f: impl FnOnce(&mut BaseInner)) {
        let persist = {
            let mut inner = self.inner.lock();
            f(&mut inner);
            inner.persist.clone()
        };
        if let Some(persist) = persist {
            persist();
        }
    }

    pub fn id(&self) -> String {
        self.inner.lock().id.clone()
    }

    pub fn set_id(&self, id: impl Into<String>) {
        let id = id.into();
        self.mutate(|inner| inner.id = id);
    }

    pub fn state(&self) -> State {
        self.inner.lock().state
    }

    pub fn set_state(&self, state: State) {
        self.mutate(|inner| inner.state = state);
    }

    /// Move to `state` only if `allow(current)` holds, atomically.
    /// Returns whether the transition happened.
    pub fn set_state_if(&self, allow: impl FnOnce(State) -> bool, state: State) -> bool {
        let persist = {
            let mut inner = self.inner.lock();
            if !allow(inner.state) {
                return false;
            }
            inner.state = state;
            inner.persist.clone()
        };
        if let Some(persist) = persist {
            persist();
        }
        true
    }

    /// Progress in percent (0-100).
    pub fn progress(&self) -> f64 {
        self.inner.lock().progress
    }

    pub fn set_progress(&self, progress: f64) {
        self.mutate(|inner| inner.progress = progress);
    }

    pub fn error(&self) -> Option<TaskError> {
        self.inner.lock().error.clone()
    }

    pub fn set_error(&self, error: Option<TaskError>) {
        self.mutate(|inner| inner.error = error);
    }

    /// `(retry, max_retry)`
    pub fn retry(&self) -> (u32, u32) {
        let inner = self.inner.lock();
        (inner.retry, inner.max_retry)
    }

    pub fn set_retry(&self, retry: u32, max_retry: u32) {
        self.mutate(|inner| {
            inner.retry = retry;
            inner.max_retry = max_retry;
        });
    }

    /// Cancellation token for the current attempt. Work bodies select on
    /// `ctx().cancelled()` and return [`TaskError::Canceled`] when it fires.
    pub fn ctx(&self) -> CancellationToken {
        self.inner.lock().ctx.clone()
    }

    pub fn set_ctx(&self, ctx: CancellationToken) {
        self.inner.lock().ctx = ctx;
    }

    /// The root token, fired by [`TaskBase::cancel`].
    pub fn cancel_token(&self) -> CancellationToken {
        self.inner.lock().token.clone()
    }

    /// Bind a new root token; the current attempt context becomes the root.
    pub fn set_cancel_token(&self, token: CancellationToken) {
        let mut inner = self.inner.lock();
        inner.ctx = token.clone();
        inner.token = token;
    }

    /// Returns `Err(Canceled)` once cancellation was requested.
    /// A cheap checkpoint for loops inside work bodies.
    pub fn check_canceled(&self) -> Result<(), TaskError> {
        if self.ctx().is_cancelled() {
            Err(TaskError::Canceled)
        } else {
            Ok(())
        }
    }

    /// Request cancellation: state becomes `Canceling` and the root token fires.
    pub fn cancel(&self) {
        let token = self.cancel_token();
        self.set_state(State::Canceling);
        token.cancel();
    }

    pub fn set_persist(&self, persist: PersistFn) {
        self.inner.lock().persist = Some(persist);
    }

    /// Fire the persistence trigger, if bound.
    pub fn persist(&self) {
        let persist = self.inner.lock().persist.clone();
        if let Some(persist) = persist {
            persist();
        }
    }
}

impl Default for TaskBase {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TaskBase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let inner = self.inner.lock();
        f.debug_struct("TaskBase")
            .field("id", &inner.id)
            .field("state", &inner.state)
            .field("retry", &inner.retry)
            .field("max_retry", &inner.max_retry)
            .field("progress", &inner.progress)
            .field("error", &inner.error)
            .finish_non_exhaustive()
    }
}

/// Persisted part of [`TaskBase`].
#[derive(Debug, Default, Serialize, Deserialize)]
struct BaseSnapshot {
    #[serde(default)]
    id: String,
    #[serde(default)]
    state: State,
    #[serde(default)]
    retry: u32,
    #[serde(default)]
    max_retry: u32,
}

impl Serialize for TaskBase {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        self.snapshot().serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for TaskBase {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        BaseSnapshot::deserialize(deserializer).map(Self::from_snapshot)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_trigger() -> (PersistFn, Arc<AtomicUsize>) {
        let fired = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&fired);
        let persist: PersistFn = Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        (persist, fired)
    }

    #[test]
    fn new_base_is_pending_without_id() {
        let base = TaskBase::new();
        assert_eq!(base.state(), State::Pending);
        assert_eq!(base.id(), "");
        assert_eq!(base.retry(), (0, 0));
        assert!(base.error().is_none());
    }

    #[test]
    fn every_setter_fires_the_trigger() {
        let base = TaskBase::new();
        let (persist, fired) = counting_trigger();
        base.set_persist(persist);

        base.set_id("a");
        base.set_state(State::Running);
        base.set_progress(42.0);
        base.set_error(Some(TaskError::msg("x")));
        base.set_retry(1, 3);

        assert_eq!(fired.load(Ordering::SeqCst), 5);
        assert_eq!(base.progress(), 42.0);
        assert_eq!(base.retry(), (1, 3));
    }

    #[test]
    fn trigger_may_read_the_base_without_deadlock() {
        let base = Arc::new(TaskBase::new());
        let weak = Arc::downgrade(&base);
        base.set_persist(Arc::new(move || {
            if let Some(base) = weak.upgrade() {
                let _ = base.state();
            }
        }));
        base.set_state(State::Running);
        assert_eq!(base.state(), State::Running);
    }

    #[test]
    fn cancel_marks_canceling_and_fires_token() {
        let base = TaskBase::new();
        let ctx = base.ctx();
        base.cancel();

        assert_eq!(base.state(), State::Canceling);
        assert!(ctx.is_cancelled());
        assert!(matches!(base.check_canceled(), Err(TaskError::Canceled)));
    }

    #[test]
    fn conditional_transition_checks_current_state() {
        let base = TaskBase::new();
        base.set_state(State::Succeeded);

        assert!(!base.set_state_if(|s| !s.is_done(), State::Canceling));
        assert_eq!(base.state(), State::Succeeded);

        assert!(base.set_state_if(State::is_done, State::WaitingRetry));
        assert_eq!(base.state(), State::WaitingRetry);
    }

    #[test]
    fn child_context_follows_root_cancel() {
        let base = TaskBase::new();
        let child = base.cancel_token().child_token();
        base.set_ctx(child.clone());

        base.cancel();
        assert!(child.is_cancelled());
    }

    #[test]
    fn only_snapshot_fields_are_serialized() {
        let base = TaskBase::with_id("t1");
        base.set_state(State::Errored);
        base.set_retry(2, 5);
        base.set_progress(50.0);

        let v = serde_json::to_value(&base).unwrap();
        assert_eq!(
            v,
            serde_json::json!({"id": "t1", "state": "errored", "retry": 2, "max_retry": 5})
        );

        let back: TaskBase = serde_json::from_value(v).unwrap();
        assert_eq!(back.id(), "t1");
        assert_eq!(back.state(), State::Errored);
        assert_eq!(back.retry(), (2, 5));
        assert_eq!(back.progress(), 0.0);
    }

    #[test]
    fn flattened_into_a_concrete_task() {
        #[derive(Serialize, Deserialize)]
        struct Upload {
            #[serde(flatten)]
            base: TaskBase,
            path: String,
        }

        let json = r#"{"id":"u1","state":"running","retry":0,"max_retry":2,"path":"/a"}"#;
        let upload: Upload = serde_json::from_str(json).unwrap();
        assert_eq!(upload.base.id(), "u1");
        assert_eq!(upload.base.state(), State::Running);
        assert_eq!(upload.path, "/a");
    }
}
