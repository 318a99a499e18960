//! Task and session identifiers plus the externally-hosted task model.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::CoreError;

/// All timestamps are UTC.
pub type Timestamp = chrono::DateTime<chrono::Utc>;

/// Error text reported when the backend no longer knows a task.
pub const TASK_LOST_MESSAGE: &str = "Task not found; the generation service may have restarted";

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque, server-assigned task identifier.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(String);

impl TaskId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TaskId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for TaskId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// Identifier of one streaming session, chosen by whoever opens the stream.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(String);

impl SessionId {
    /// Generate a fresh random session id.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for SessionId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for SessionId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

// ---------------------------------------------------------------------------
// TaskKind
// ---------------------------------------------------------------------------

/// The kind of content a task generates. Drives the poll interval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Image,
    Video,
    Music,
    Speech,
    Slides,
    Sprite,
}

impl TaskKind {
    pub const ALL: [TaskKind; 6] = [
        TaskKind::Image,
        TaskKind::Video,
        TaskKind::Music,
        TaskKind::Speech,
        TaskKind::Slides,
        TaskKind::Sprite,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Image => "image",
            TaskKind::Video => "video",
            TaskKind::Music => "music",
            TaskKind::Speech => "speech",
            TaskKind::Slides => "slides",
            TaskKind::Sprite => "sprite",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|kind| kind.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| CoreError::Validation(format!("Unknown task kind: \"{s}\"")))
    }
}

// ---------------------------------------------------------------------------
// TaskStatus
// ---------------------------------------------------------------------------

/// Lifecycle status reported by the task status endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Processing,
    Completed,
    Failed,
}

impl TaskStatus {
    /// `Completed` and `Failed` admit no further transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, TaskStatus::Completed | TaskStatus::Failed)
    }
}

/// Body returned by the status endpoint for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub status: TaskStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub progress: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TaskStatusReport {
    pub fn new(status: TaskStatus) -> Self {
        Self {
            status,
            progress: None,
            result: None,
            error: None,
        }
    }

    pub fn with_progress(mut self, progress: f64) -> Self {
        self.progress = Some(progress);
        self
    }

    pub fn with_result(mut self, result: serde_json::Value) -> Self {
        self.result = Some(result);
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// Local view of an externally-hosted generation task.
///
/// Once `status` is terminal the task is frozen: [`Task::apply_report`]
/// and [`Task::mark_lost`] become no-ops.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Task {
    pub task_id: TaskId,
    pub kind: TaskKind,
    pub status: TaskStatus,
    pub progress: Option<f64>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    /// Poll interval in milliseconds.
    pub interval_ms: u64,
    pub last_polled_at: Option<Timestamp>,
}

impl Task {
    /// A freshly submitted task in `Pending` state.
    pub fn new(task_id: TaskId, kind: TaskKind, interval_ms: u64) -> Self {
        Self {
            task_id,
            kind,
            status: TaskStatus::Pending,
            progress: None,
            result: None,
            error: None,
            interval_ms,
            last_polled_at: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// Merge a status report into the task.
    ///
    /// Returns `false` (and leaves the task untouched) if the task was
    /// already terminal.
    pub fn apply_report(&mut self, report: TaskStatusReport) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = report.status;
        if report.progress.is_some() {
            self.progress = report.progress;
        }
        if report.result.is_some() {
            self.result = report.result;
        }
        if report.error.is_some() {
            self.error = report.error;
        }
        if self.status == TaskStatus::Failed && self.error.is_none() {
            self.error = Some("Generation failed".to_string());
        }
        self.last_polled_at = Some(chrono::Utc::now());
        true
    }

    /// Record that the backend no longer knows this task.
    pub fn mark_lost(&mut self) -> bool {
        if self.is_terminal() {
            return false;
        }
        self.status = TaskStatus::Failed;
        self.error = Some(TASK_LOST_MESSAGE.to_string());
        self.last_polled_at = Some(chrono::Utc::now());
        true
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
