//! Queue module: pending FIFO and the automatic retry gate.

mod pending;
pub mod retry;

pub use pending::PendingQueue;
pub use retry::{Decision, FailReason, decide};
