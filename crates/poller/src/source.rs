//! The status contract polled by [`TaskPoller`](crate::TaskPoller).

use async_trait::async_trait;
use flowgen_core::{TaskId, TaskStatusReport};

use crate::error::TaskApiError;

/// Anything that can report the current status of a task.
///
/// Implementations return [`TaskApiError::NotFound`] when the task is
/// unknown; the poller treats that as fatal. Every other error is
/// treated as transient.
#[async_trait]
pub trait TaskStatusSource: Send + Sync {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<TaskStatusReport, TaskApiError>;
}
