use thiserror::Error;

/// Errors returned by the manager itself (construction, snapshot I/O).
///
/// Task failures never surface here; they are recorded on the task.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("manager must be created inside a tokio runtime")]
    NoRuntime,

    #[error("snapshot io: {0}")]
    Io(#[from] std::io::Error),

    #[error("snapshot json: {0}")]
    Json(#[from] serde_json::Error),

    #[error("snapshot store: {0}")]
    Store(String),
}
