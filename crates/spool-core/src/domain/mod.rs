//! Domain model: task states, task errors and id generation.

pub mod errors;
pub mod ids;
pub mod state;

pub use errors::TaskError;
pub use ids::{IdGenerator, UlidGenerator};
pub use state::State;
