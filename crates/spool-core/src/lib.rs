//! spool-core
//!
//! In-process task engine: a bounded worker pool draining a FIFO queue of
//! user-defined tasks, with automatic retry, cooperative cancellation and a
//! debounced JSON snapshot for crash recovery.
//!
//! # Modules
//! - **domain**: task states, task errors, id generation
//! - **task**: the `Task` trait and the embedded `TaskBase`
//! - **queue**: pending FIFO and the automatic retry gate
//! - **worker**: one-attempt execution and the worker pool
//! - **persist**: snapshot stores and the debounced flusher
//! - **manager**: the engine tying them together, plus its options
//! - **observability**: read-only task views
//! - **error**: engine-level errors (construction, snapshot I/O)

pub mod domain;
pub mod error;
pub mod manager;
pub mod observability;
pub mod persist;
pub mod queue;
pub mod task;
pub mod worker;

pub use domain::{IdGenerator, State, TaskError, UlidGenerator};
pub use error::EngineError;
pub use manager::{Manager, ManagerConfig, Options};
pub use observability::{StateCounts, TaskInfo};
pub use persist::{FileStore, FnStore, SnapshotStore};
pub use task::{Task, TaskBase};
