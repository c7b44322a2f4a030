//! Task lifecycle state machine.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle state of a task.
///
/// State transitions:
/// - Pending -> Running -> Succeeded
/// - Pending -> Running -> Errored -> WaitingRetry -> BeforeRetry -> Running -> ...
/// - Pending -> Running -> Errored -> Failing -> Failed (retry budget exhausted)
/// - Pending -> Running -> Canceled (work body observed cancellation)
/// - Pending/WaitingRetry -> Canceling -> Canceled (canceled before a worker picked it up)
///
/// Design note: the engine is the only writer of this value. Task bodies only
/// report progress and return a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum State {
    /// Waiting in the queue for a free worker.
    #[default]
    Pending,

    /// Currently executed by a worker.
    Running,

    /// Work body returned success.
    Succeeded,

    /// Cancellation requested; not yet observed.
    Canceling,

    /// Cancellation observed (terminal).
    Canceled,

    /// Last attempt failed; retry eligibility not yet decided.
    Errored,

    /// Retry refused; the on-failed hook is running.
    Failing,

    /// Failed permanently (terminal).
    Failed,

    /// Retry granted; waiting in the queue for the next attempt.
    WaitingRetry,

    /// A worker picked up a retry; the before-retry hook is running.
    BeforeRetry,
}

impl State {
    /// States in which the task is finished and never dispatched again
    /// automatically.
    pub const DONE: [State; 3] = [State::Succeeded, State::Canceled, State::Failed];

    /// Everything that is not [`State::DONE`].
    pub const UNDONE: [State; 7] = [
        State::Pending,
        State::Running,
        State::Canceling,
        State::Errored,
        State::Failing,
        State::WaitingRetry,
        State::BeforeRetry,
    ];

    /// Is this a terminal state (no further automatic transitions)?
    pub fn is_done(self) -> bool {
        matches!(self, State::Succeeded | State::Canceled | State::Failed)
    }

    /// Short stable label (snake_case), same as the serialized form.
    pub fn as_str(self) -> &'static str {
        match self {
            State::Pending => "pending",
            State::Running => "running",
            State::Succeeded => "succeeded",
            State::Canceling => "canceling",
            State::Canceled => "canceled",
            State::Errored => "errored",
            State::Failing => "failing",
            State::Failed => "failed",
            State::WaitingRetry => "waiting_retry",
            State::BeforeRetry => "before_retry",
        }
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    #[case::succeeded(State::Succeeded, true)]
    #[case::canceled(State::Canceled, true)]
    #[case::failed(State::Failed, true)]
    #[case::pending(State::Pending, false)]
    #[case::errored(State::Errored, false)]
    #[case::waiting_retry(State::WaitingRetry, false)]
    #[case::canceling(State::Canceling, false)]
    fn done_states(#[case] state: State, #[case] done: bool) {
        assert_eq!(state.is_done(), done);
    }

    #[test]
    fn done_and_undone_cover_every_state() {
        assert!(State::DONE.iter().all(|s| s.is_done()));
        assert!(State::UNDONE.iter().all(|s| !s.is_done()));
        assert_eq!(State::DONE.len() + State::UNDONE.len(), 10);
    }

    #[test]
    fn serializes_as_snake_case() {
        let s = serde_json::to_string(&State::WaitingRetry).unwrap();
        assert_eq!(s, "\"waiting_retry\"");
        assert_eq!(State::WaitingRetry.to_string(), "waiting_retry");

        let back: State = serde_json::from_str("\"before_retry\"").unwrap();
        assert_eq!(back, State::BeforeRetry);
    }
}
