//! Task errors and their classification.
//!
//! Classification:
//! - ordinary errors (`Message`, `Other`, `Timeout`, `Panicked`): retried up to the budget
//! - `Unretryable(..)`: never retried, whatever the remaining budget
//! - `Canceled`: the standard cancellation signal, terminal and never retried

use std::error::Error as StdError;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;

/// Error returned by a task's work body and stored as the task's last error.
#[non_exhaustive]
#[derive(Debug, Clone, Error)]
pub enum TaskError {
    /// The task's cancellation token fired and the work body gave up.
    #[error("context canceled")]
    Canceled,

    /// The manager-wide deadline elapsed before the attempt finished.
    #[error("timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    /// The work body panicked; the unwind was caught at the execution boundary.
    #[error("panic: {message}\n{backtrace}")]
    Panicked { message: String, backtrace: String },

    /// Recorded for snapshot entries that opted out of recovery.
    #[error("the task is interrupted and cannot be recovered")]
    Interrupted,

    #[error("{0}")]
    Message(String),

    #[error(transparent)]
    Other(Arc<dyn StdError + Send + Sync>),

    /// Marks the inner error as permanently non-retryable.
    #[error("{0}")]
    Unretryable(Box<TaskError>),
}

impl TaskError {
    pub fn msg(message: impl Into<String>) -> Self {
        TaskError::Message(message.into())
    }

    pub fn other<E>(err: E) -> Self
    where
        E: StdError + Send + Sync + 'static,
    {
        TaskError::Other(Arc::new(err))
    }

    /// Wrap `err` so the engine never retries it.
    ///
    /// Wrapping twice is a no-op.
    pub fn unretryable(err: impl Into<TaskError>) -> Self {
        match err.into() {
            e @ TaskError::Unretryable(_) => e,
            e => TaskError::Unretryable(Box::new(e)),
        }
    }

    /// `false` iff the error carries the non-retryable mark.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, TaskError::Unretryable(_))
    }

    /// Does this error represent the standard cancellation signal?
    /// Looks through the non-retryable wrapper.
    pub fn is_canceled(&self) -> bool {
        matches!(self.root_cause(), TaskError::Canceled)
    }

    /// The original error, with the non-retryable mark removed.
    pub fn root_cause(&self) -> &TaskError {
        match self {
            TaskError::Unretryable(inner) => (**inner).root_cause(),
            other => other,
        }
    }

    /// Short stable label (snake_case) for logs.
    pub fn as_label(&self) -> &'static str {
        match self {
            TaskError::Canceled => "task_canceled",
            TaskError::Timeout { .. } => "task_timeout",
            TaskError::Panicked { .. } => "task_panicked",
            TaskError::Interrupted => "task_interrupted",
            TaskError::Message(_) | TaskError::Other(_) => "task_failed",
            TaskError::Unretryable(_) => "task_unretryable",
        }
    }
}

impl From<String> for TaskError {
    fn from(message: String) -> Self {
        TaskError::Message(message)
    }
}

impl From<&str> for TaskError {
    fn from(message: &str) -> Self {
        TaskError::Message(message.to_string())
    }
}

impl From<std::io::Error> for TaskError {
    fn from(err: std::io::Error) -> Self {
        TaskError::other(err)
    }
}

impl From<serde_json::Error> for TaskError {
    fn from(err: serde_json::Error) -> Self {
        TaskError::other(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::message(TaskError::msg("boom"), true)]
    #[case::timeout(TaskError::Timeout { timeout: Duration::from_secs(1) }, true)]
    #[case::canceled(TaskError::Canceled, true)]
    #[case::unretryable(TaskError::unretryable(TaskError::msg("403")), false)]
    fn retryable_classification(#[case] err: TaskError, #[case] retryable: bool) {
        assert_eq!(err.is_retryable(), retryable);
    }

    #[test]
    fn unretryable_unwraps_to_cause() {
        let err = TaskError::unretryable("rejected by remote");
        assert!(!err.is_retryable());
        assert!(matches!(err.root_cause(), TaskError::Message(m) if m == "rejected by remote"));
        // Display is the cause's message.
        assert_eq!(err.to_string(), "rejected by remote");
    }

    #[test]
    fn root_cause_sees_through_nested_marks() {
        let err = TaskError::Unretryable(Box::new(TaskError::Unretryable(Box::new(
            TaskError::Canceled,
        ))));
        assert!(matches!(err.root_cause(), TaskError::Canceled));
        assert!(err.is_canceled());
    }

    #[test]
    fn wrapping_twice_keeps_one_layer() {
        let err = TaskError::unretryable(TaskError::unretryable("x"));
        match err {
            TaskError::Unretryable(inner) => assert!(inner.is_retryable()),
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn cancellation_is_seen_through_the_wrapper() {
        assert!(TaskError::Canceled.is_canceled());
        assert!(TaskError::unretryable(TaskError::Canceled).is_canceled());
        assert!(!TaskError::msg("canceled").is_canceled());
    }

    #[test]
    fn io_errors_convert() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: TaskError = io.into();
        assert_eq!(err.as_label(), "task_failed");
        assert_eq!(err.to_string(), "gone");
    }
}
