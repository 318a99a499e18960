//! In-process task lifecycle bus backed by a `tokio::sync::broadcast` channel.
//!
//! [`TaskEventBus`] fans every [`TaskEvent`] out to any number of
//! independent observers (UI contexts, loggers, the CLI). It is designed
//! to be shared via `Arc<TaskEventBus>`.

use chrono::{DateTime, Utc};
use flowgen_core::{TaskId, TaskKind, TaskStatus};
use serde::Serialize;
use tokio::sync::broadcast;

// ---------------------------------------------------------------------------
// TaskEvent
// ---------------------------------------------------------------------------

/// What happened to a task.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum TaskEventKind {
    /// Task creation succeeded inside a queue slot.
    Submitted { resource_class: String },
    /// A non-terminal status snapshot.
    Progress {
        status: TaskStatus,
        #[serde(skip_serializing_if = "Option::is_none")]
        progress: Option<f64>,
    },
    Completed {
        #[serde(skip_serializing_if = "Option::is_none")]
        result: Option<serde_json::Value>,
    },
    /// The provider reported failure.
    Failed { error: String },
    /// The backend no longer knows the task.
    Lost { error: String },
    /// Polling was stopped by its owner.
    Cancelled,
}

/// A task lifecycle event.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TaskEvent {
    pub task_id: TaskId,
    pub kind: TaskKind,
    #[serde(flatten)]
    pub event: TaskEventKind,
    /// When the event was created (UTC).
    pub timestamp: DateTime<Utc>,
}

impl TaskEvent {
    pub fn new(task_id: TaskId, kind: TaskKind, event: TaskEventKind) -> Self {
        Self {
            task_id,
            kind,
            event,
            timestamp: Utc::now(),
        }
    }

    /// Whether no further events will follow for this task.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self.event,
            TaskEventKind::Submitted { .. } | TaskEventKind::Progress { .. }
        )
    }
}

// ---------------------------------------------------------------------------
// TaskEventBus
// ---------------------------------------------------------------------------

/// Default buffer capacity for the broadcast channel.
const DEFAULT_CAPACITY: usize = 1024;

/// In-process fan-out bus for [`TaskEvent`]s.
///
/// When the buffer is full the oldest unconsumed events are dropped and
/// slow receivers observe `RecvError::Lagged`.
pub struct TaskEventBus {
    sender: broadcast::Sender<TaskEvent>,
}

impl TaskEventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all current subscribers.
    ///
    /// With no subscribers the event is dropped.
    pub fn publish(&self, event: TaskEvent) {
        tracing::debug!(task_id = %event.task_id, event = ?event.event, "Task event");
        let _ = self.sender.send(event);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for TaskEventBus {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
