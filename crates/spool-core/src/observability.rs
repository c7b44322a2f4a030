//! Read-only views over tasks for status surfaces.

use serde::{Deserialize, Serialize};

use crate::domain::State;
use crate::task::Task;

/// Serializable snapshot of one task, as shown to end users.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskInfo {
    pub id: String,
    pub name: String,
    pub state: State,
    pub status: String,
    /// Percent. A NaN progress is reported as 100.
    pub progress: f64,
    /// Last error message, empty when none.
    pub error: String,
}

impl TaskInfo {
    pub fn of<T: Task>(task: &T) -> Self {
        let base = task.base();
        let progress = base.progress();
        Self {
            id: base.id(),
            name: task.name(),
            state: base.state(),
            status: task.status(),
            progress: if progress.is_nan() { 100.0 } else { progress },
            error: base.error().map(|e| e.to_string()).unwrap_or_default(),
        }
    }
}

/// Number of registered tasks per state.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCounts {
    pub pending: usize,
    pub running: usize,
    pub succeeded: usize,
    pub canceling: usize,
    pub canceled: usize,
    pub errored: usize,
    pub failing: usize,
    pub failed: usize,
    pub waiting_retry: usize,
    pub before_retry: usize,
}

impl StateCounts {
    pub fn record(&mut self, state: State) {
        match state {
            State::Pending => self.pending += 1,
            State::Running => self.running += 1,
            State::Succeeded => self.succeeded += 1,
            State::Canceling => self.canceling += 1,
            State::Canceled => self.canceled += 1,
            State::Errored => self.errored += 1,
            State::Failing => self.failing += 1,
            State::Failed => self.failed += 1,
            State::WaitingRetry => self.waiting_retry += 1,
            State::BeforeRetry => self.before_retry += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.pending
            + self.running
            + self.succeeded
            + self.canceling
            + self.canceled
            + self.errored
            + self.failing
            + self.failed
            + self.waiting_retry
            + self.before_retry
    }

    /// Tasks in a done state.
    pub fn done(&self) -> usize {
        self.succeeded + self.canceled + self.failed
    }
}
