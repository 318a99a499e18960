//! Generation orchestrator: configuration and the [`Orchestrator`] facade
//! that ties the submission queue, task pollers, event bus and stream
//! client together.

pub mod config;
pub mod orchestrator;

pub use config::WorkerConfig;
pub use orchestrator::{Orchestrator, OrchestratorError};
