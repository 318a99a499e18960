//! Bounded-concurrency submission queue.
//!
//! Each named resource class (a model tier, a provider account, ...)
//! has its own concurrency ceiling and FIFO wait list. Callers hand a
//! unit of work to [`QueueManager::enqueue`] and get back exactly the
//! outcome of that unit once a slot was available to run it.

pub mod config;
pub mod manager;

pub use config::{ConcurrencyLimit, QueueConfig};
pub use manager::{ClassStatus, QueueError, QueueManager};
