//! Automatic retry gate.
//!
//! `decide` is pure: it looks at the task and the error of the attempt that
//! just failed and says what should happen next. Applying the decision
//! (bumping the counter, moving to `WaitingRetry`) is the worker's job.

use crate::domain::{State, TaskError};
use crate::task::Task;

/// What to do with a task whose attempt just failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    /// Run again. `retry` is the new value of the retry counter.
    Retry { retry: u32, max_retry: u32 },

    /// Give up (on-failed hook, then `Failed`).
    Fail { reason: FailReason },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailReason {
    /// The error carries the non-retryable mark.
    UnretryableError,
    /// The task type opted out of retry.
    TaskNotRetryable,
    /// The task is not in a retryable state (e.g. `Canceled`).
    NotRetryableState,
    /// `retry >= max_retry`.
    BudgetExhausted,
}

impl FailReason {
    pub fn as_str(self) -> &'static str {
        match self {
            FailReason::UnretryableError => "unretryable_error",
            FailReason::TaskNotRetryable => "task_not_retryable",
            FailReason::NotRetryableState => "not_retryable_state",
            FailReason::BudgetExhausted => "budget_exhausted",
        }
    }
}

/// Retry is granted iff
/// - the error is not marked non-retryable,
/// - the task did not opt out,
/// - the task is `Errored` (or `Failed`),
/// - `retry < max_retry`.
///
/// `Canceled` tasks never pass the state check.
pub fn decide<T: Task>(task: &T, err: &TaskError) -> Decision {
    if !err.is_retryable() {
        return Decision::Fail {
            reason: FailReason::UnretryableError,
        };
    }
    if !task.retryable() {
        return Decision::Fail {
            reason: FailReason::TaskNotRetryable,
        };
    }
    let base = task.base();
    // Failed is never the state here on the worker path (the failure handler
    // just wrote Errored or Canceled); it is accepted for callers that
    // re-evaluate an already failed task.
    if !matches!(base.state(), State::Errored | State::Failed) {
        return Decision::Fail {
            reason: FailReason::NotRetryableState,
        };
    }
    let (retry, max_retry) = base.retry();
    if retry < max_retry {
        Decision::Retry {
            retry: retry + 1,
            max_retry,
        }
    } else {
        Decision::Fail {
            reason: FailReason::BudgetExhausted,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskBase;
    use async_trait::async_trait;
    use rstest::rstest;
    use serde::{Deserialize, Serialize};

    #[derive(Serialize, Deserialize)]
    struct Probe {
        #[serde(flatten)]
        base: TaskBase,
        #[serde(default = "yes")]
        retryable: bool,
    }

    fn yes() -> bool {
        true
    }

    #[async_trait]
    impl Task for Probe {
        fn base(&self) -> &TaskBase {
            &self.base
        }

        async fn run(&self) -> Result<(), TaskError> {
            Ok(())
        }

        fn retryable(&self) -> bool {
            self.retryable
        }
    }

    fn probe(state: State, retry: u32, max_retry: u32, retryable: bool) -> Probe {
        let base = TaskBase::new();
        base.set_state(state);
        base.set_retry(retry, max_retry);
        Probe { base, retryable }
    }

    #[test]
    fn grants_retry_under_budget() {
        let task = probe(State::Errored, 0, 2, true);
        assert_eq!(
            decide(&task, &TaskError::msg("x")),
            Decision::Retry {
                retry: 1,
                max_retry: 2
            }
        );
    }

    #[test]
    fn failed_state_is_accepted_by_the_gate() {
        let task = probe(State::Failed, 1, 2, true);
        assert!(matches!(
            decide(&task, &TaskError::msg("x")),
            Decision::Retry { retry: 2, .. }
        ));
    }

    #[rstest]
    #[case::exhausted(probe(State::Errored, 2, 2, true), TaskError::msg("x"), FailReason::BudgetExhausted)]
    #[case::no_budget(probe(State::Errored, 0, 0, true), TaskError::msg("x"), FailReason::BudgetExhausted)]
    #[case::canceled(probe(State::Canceled, 0, 5, true), TaskError::Canceled, FailReason::NotRetryableState)]
    #[case::opted_out(probe(State::Errored, 0, 5, false), TaskError::msg("x"), FailReason::TaskNotRetryable)]
    #[case::marked(probe(State::Errored, 0, 5, true), TaskError::unretryable("403"), FailReason::UnretryableError)]
    fn refuses_retry(#[case] task: Probe, #[case] err: TaskError, #[case] expected: FailReason) {
        assert_eq!(decide(&task, &err), Decision::Fail { reason: expected });
    }
}
