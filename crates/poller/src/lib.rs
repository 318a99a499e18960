//! Status polling for externally-hosted generation tasks.
//!
//! - [`TaskStatusSource`] is the status contract a poller queries.
//! - [`TaskApi`] is the HTTP implementation against the task backend
//!   (create, status, cancel).
//! - [`TaskPoller`] runs one cancellable polling loop per task until a
//!   terminal status, a not-found signal, or cancellation.
//! - [`PollerRegistry`] is an owner-scoped set of pollers that refuses to
//!   poll the same task twice and forgets tasks once they finish.

pub mod api;
pub mod error;
pub mod poller;
pub mod registry;
pub mod source;

pub use api::TaskApi;
pub use error::TaskApiError;
pub use poller::{PollHandle, PollOutcome, TaskObserver, TaskPoller};
pub use registry::{PollerRegistry, RegistryError};
pub use source::TaskStatusSource;
