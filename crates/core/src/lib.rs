//! Shared domain types for the generation orchestrator.
//!
//! Everything here is dependency-light so that the queue, poller,
//! stream and event crates can agree on identifiers, task state and
//! configuration parsing without depending on each other.

pub mod env;
pub mod error;
pub mod poll_interval;
pub mod types;

pub use error::CoreError;
pub use poll_interval::PollIntervals;
pub use types::{SessionId, Task, TaskId, TaskKind, TaskStatus, TaskStatusReport, Timestamp};
