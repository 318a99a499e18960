use flowgen_core::env::var_or;
use flowgen_core::{CoreError, PollIntervals};
use flowgen_queue::QueueConfig;

/// Worker configuration loaded from environment variables.
///
/// All fields have defaults suitable for local development.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Base URL of the task and stream backend.
    pub api_url: String,
    /// Path of the streaming endpoint, relative to `api_url`.
    pub stream_path: String,
    /// Path notified when a stream is aborted. `None` disables it.
    pub stream_abort_path: Option<String>,
    pub queue: QueueConfig,
    pub poll_intervals: PollIntervals,
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                           | Default                        |
    /// |-----------------------------------|--------------------------------|
    /// | `FLOWGEN_API_URL`                 | `http://localhost:8080`        |
    /// | `FLOWGEN_STREAM_PATH`             | `agent/stream`                 |
    /// | `FLOWGEN_STREAM_ABORT_PATH`       | unset (no abort notification)  |
    /// | `FLOWGEN_QUEUE_LIMITS`            | `fast=4,pro=2,local=unlimited` |
    /// | `FLOWGEN_QUEUE_MAX_WAITING`       | unset (unbounded)              |
    /// | `FLOWGEN_POLL_INTERVAL_<KIND>_MS` | per-kind table                 |
    pub fn from_env() -> Result<Self, CoreError> {
        let stream_abort_path = std::env::var("FLOWGEN_STREAM_ABORT_PATH")
            .ok()
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty());

        Ok(Self {
            api_url: var_or("FLOWGEN_API_URL", "http://localhost:8080"),
            stream_path: var_or("FLOWGEN_STREAM_PATH", "agent/stream"),
            stream_abort_path,
            queue: QueueConfig::from_env()?,
            poll_intervals: PollIntervals::from_env()?,
        })
    }

    /// Configuration pointing at `api_url` with default limits and intervals.
    pub fn for_api(api_url: impl Into<String>) -> Result<Self, CoreError> {
        Ok(Self {
            api_url: api_url.into(),
            stream_path: "agent/stream".to_string(),
            stream_abort_path: None,
            queue: QueueConfig::parse_limits(flowgen_queue::config::DEFAULT_QUEUE_LIMITS)?,
            poll_intervals: PollIntervals::default(),
        })
    }
}
