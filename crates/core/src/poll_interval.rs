//! Static poll-interval table keyed by [`TaskKind`].
//!
//! Short jobs (speech) are polled often, long jobs (video) rarely. The
//! table is fixed at startup; there is no adaptive or backoff polling.

use std::collections::HashMap;
use std::time::Duration;

use crate::env::parse_value;
use crate::error::CoreError;
use crate::types::TaskKind;

/// Env var prefix for per-kind overrides, e.g. `FLOWGEN_POLL_INTERVAL_VIDEO_MS`.
pub const POLL_INTERVAL_ENV_PREFIX: &str = "FLOWGEN_POLL_INTERVAL_";

/// Built-in interval for a task kind.
pub const fn default_interval(kind: TaskKind) -> Duration {
    match kind {
        TaskKind::Speech => Duration::from_secs(2),
        TaskKind::Image | TaskKind::Slides | TaskKind::Sprite => Duration::from_secs(3),
        TaskKind::Music => Duration::from_secs(5),
        TaskKind::Video => Duration::from_secs(10),
    }
}

/// Poll interval per task kind.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PollIntervals {
    overrides: HashMap<TaskKind, Duration>,
}

impl PollIntervals {
    /// Interval used when polling a task of `kind`.
    pub fn for_kind(&self, kind: TaskKind) -> Duration {
        self.overrides
            .get(&kind)
            .copied()
            .unwrap_or_else(|| default_interval(kind))
    }

    /// Replace the interval for one kind. Zero is rejected.
    pub fn with_override(mut self, kind: TaskKind, interval: Duration) -> Result<Self, CoreError> {
        if interval.is_zero() {
            return Err(CoreError::Validation(format!(
                "Poll interval for {kind} must be greater than zero"
            )));
        }
        self.overrides.insert(kind, interval);
        Ok(self)
    }

    /// Load overrides from `FLOWGEN_POLL_INTERVAL_<KIND>_MS` variables.
    pub fn from_env() -> Result<Self, CoreError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load overrides through an arbitrary variable lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, CoreError> {
        let mut intervals = Self::default();
        for kind in TaskKind::ALL {
            let name = format!(
                "{POLL_INTERVAL_ENV_PREFIX}{}_MS",
                kind.as_str().to_ascii_uppercase()
            );
            let Some(raw) = lookup(&name) else {
                continue;
            };
            if let Some(ms) = parse_value::<u64>(&name, &raw)? {
                intervals = intervals.with_override(kind, Duration::from_millis(ms))?;
            }
        }
        Ok(intervals)
    }
}
