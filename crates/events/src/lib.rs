//! Event fan-out for the generation orchestrator.
//!
//! - [`SessionDispatcher`] forwards stream-session messages to the
//!   subscribers of that session and drops them when it ends.
//! - [`TaskEventBus`] is an in-process publish/subscribe hub for task
//!   lifecycle events, backed by `tokio::sync::broadcast`.

pub mod bus;
pub mod dispatcher;

pub use bus::{TaskEvent, TaskEventBus, TaskEventKind};
pub use dispatcher::{DispatchError, SessionDispatcher, SubscriberId};
