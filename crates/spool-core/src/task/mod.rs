//! Task trait: the contract a schedulable unit of work satisfies.
//!
//! A concrete task embeds a [`TaskBase`] and implements [`Task::run`].
//! Everything else has a default:
//!
//! | capability         | default            | effect when overridden                          |
//! |--------------------|--------------------|-------------------------------------------------|
//! | `persistable`      | `true`             | `false` keeps the task out of the snapshot      |
//! | `recoverable`      | `true`             | `false` reloads it as `Failed` (interrupted)    |
//! | `retryable`        | `true`             | `false` disables automatic retry                |
//! | `on_before_retry`  | no-op              | runs in `BeforeRetry`, before the next attempt  |
//! | `on_succeeded`     | no-op              | runs in `Succeeded`                             |
//! | `on_failed`        | no-op              | runs in `Failing`, before `Failed`              |
//! | `name` / `status`  | id / empty         | display only                                    |
//!
//! Hooks run inline on the executing worker and hold its slot until they
//! return, so they must not block indefinitely.

mod base;

pub use base::{PersistFn, TaskBase};

use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::domain::TaskError;

/// A unit of schedulable, retryable, cancelable work.
///
/// # Example
/// ```ignore
/// #[derive(Serialize, Deserialize)]
/// struct CopyTask {
///     #[serde(flatten)]
///     base: TaskBase,
///     src: String,
///     dst: String,
/// }
///
/// #[async_trait]
/// impl Task for CopyTask {
///     fn base(&self) -> &TaskBase {
///         &self.base
///     }
///
///     async fn run(&self) -> Result<(), TaskError> {
///         let ctx = self.base.ctx();
///         tokio::select! {
///             _ = ctx.cancelled() => Err(TaskError::Canceled),
///             r = copy(&self.src, &self.dst) => r,
///         }
///     }
/// }
/// ```
///
/// # Trait bounds
/// - `Serialize + DeserializeOwned`: the snapshot stores tasks as JSON
/// - `Send + Sync + 'static`: tasks are shared through `Arc` across workers
///
/// `run` may be invoked again after a failure. It starts from the same
/// value each time, so side effects must be safe to repeat.
#[async_trait]
pub trait Task: Serialize + DeserializeOwned + Send + Sync + 'static {
    fn base(&self) -> &TaskBase;

    /// Do the work.
    async fn run(&self) -> Result<(), TaskError>;

    fn persistable(&self) -> bool {
        true
    }

    fn recoverable(&self) -> bool {
        true
    }

    fn retryable(&self) -> bool {
        true
    }

    async fn on_before_retry(&self) {}

    async fn on_succeeded(&self) {}

    async fn on_failed(&self) {}

    fn name(&self) -> String {
        self.base().id()
    }

    fn status(&self) -> String {
        String::new()
    }
}
