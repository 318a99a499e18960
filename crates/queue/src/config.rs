//! Resource-class configuration for the submission queue.

use std::fmt;
use std::num::NonZeroUsize;
use std::str::FromStr;

use flowgen_core::env::{parse_value, var_or};
use flowgen_core::CoreError;
use indexmap::IndexMap;

/// Env var holding the comma-separated class limits.
pub const QUEUE_LIMITS_ENV: &str = "FLOWGEN_QUEUE_LIMITS";

/// Env var holding the optional per-class wait-queue depth limit.
pub const QUEUE_MAX_WAITING_ENV: &str = "FLOWGEN_QUEUE_MAX_WAITING";

/// Limits applied when [`QUEUE_LIMITS_ENV`] is unset.
pub const DEFAULT_QUEUE_LIMITS: &str = "fast=4,pro=2,local=unlimited";

// ---------------------------------------------------------------------------
// ConcurrencyLimit
// ---------------------------------------------------------------------------

/// Maximum number of jobs of one class that may run at the same time.
///
/// A ceiling of zero is unrepresentable: nothing would ever run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConcurrencyLimit {
    Bounded(NonZeroUsize),
    /// No known upstream limit; every job starts immediately.
    Unbounded,
}

impl ConcurrencyLimit {
    /// Build a bounded limit, rejecting zero.
    pub fn bounded(max: usize) -> Result<Self, CoreError> {
        NonZeroUsize::new(max)
            .map(ConcurrencyLimit::Bounded)
            .ok_or_else(|| {
                CoreError::Validation("maxConcurrency must be at least 1".to_string())
            })
    }

    /// Whether another job may start while `active` are running.
    pub fn admits(self, active: usize) -> bool {
        match self {
            ConcurrencyLimit::Bounded(max) => active < max.get(),
            ConcurrencyLimit::Unbounded => true,
        }
    }

    /// The ceiling as a number, `None` when unbounded.
    pub fn max(self) -> Option<usize> {
        match self {
            ConcurrencyLimit::Bounded(max) => Some(max.get()),
            ConcurrencyLimit::Unbounded => None,
        }
    }
}

impl fmt::Display for ConcurrencyLimit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConcurrencyLimit::Bounded(max) => write!(f, "{max}"),
            ConcurrencyLimit::Unbounded => f.write_str("unlimited"),
        }
    }
}

impl FromStr for ConcurrencyLimit {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if s.eq_ignore_ascii_case("unlimited") || s.eq_ignore_ascii_case("inf") || s == "∞" {
            return Ok(ConcurrencyLimit::Unbounded);
        }
        let max: usize = s
            .parse()
            .map_err(|_| CoreError::Validation(format!("Invalid concurrency limit: \"{s}\"")))?;
        ConcurrencyLimit::bounded(max)
    }
}

// ---------------------------------------------------------------------------
// QueueConfig
// ---------------------------------------------------------------------------

/// Static queue configuration: the known resource classes and their limits.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueueConfig {
    pub(crate) classes: IndexMap<String, ConcurrencyLimit>,
    pub(crate) max_waiting: Option<usize>,
}

impl QueueConfig {
    /// An empty configuration with no classes.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add (or replace) a resource class.
    pub fn with_class(mut self, name: impl Into<String>, limit: ConcurrencyLimit) -> Self {
        self.classes.insert(name.into(), limit);
        self
    }

    /// Cap the wait list of every class. Unbounded when never called.
    /// Zero disables queuing: a job that cannot start at once is rejected.
    pub fn with_max_waiting(mut self, max_waiting: usize) -> Self {
        self.max_waiting = Some(max_waiting);
        self
    }

    /// Configured classes in declaration order.
    pub fn classes(&self) -> impl Iterator<Item = (&str, ConcurrencyLimit)> {
        self.classes.iter().map(|(name, limit)| (name.as_str(), *limit))
    }

    pub fn max_waiting(&self) -> Option<usize> {
        self.max_waiting
    }

    /// Parse a limit list such as `fast=4,pro=2,local=unlimited`.
    pub fn parse_limits(limits: &str) -> Result<Self, CoreError> {
        let mut config = Self::new();
        for entry in limits.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (name, limit) = entry.split_once('=').ok_or_else(|| {
                CoreError::Validation(format!(
                    "Queue limit entry \"{entry}\" must look like class=N"
                ))
            })?;
            let name = name.trim();
            if name.is_empty() {
                return Err(CoreError::Validation(format!(
                    "Queue limit entry \"{entry}\" has an empty class name"
                )));
            }
            let limit: ConcurrencyLimit = limit.parse().map_err(|e: CoreError| {
                CoreError::Validation(format!("Resource class \"{name}\": {e}"))
            })?;
            config = config.with_class(name, limit);
        }
        Ok(config)
    }

    /// Parse a wait-list depth limit. Blank means unbounded; zero is
    /// rejected, since it would turn every saturated class into an error.
    pub fn parse_max_waiting(raw: &str) -> Result<Option<usize>, CoreError> {
        match parse_value::<usize>(QUEUE_MAX_WAITING_ENV, raw)? {
            Some(0) => Err(CoreError::Validation(format!(
                "{QUEUE_MAX_WAITING_ENV} must be at least 1"
            ))),
            depth => Ok(depth),
        }
    }

    /// Load the configuration from the environment.
    ///
    /// | Env Var                     | Default                          |
    /// |-----------------------------|----------------------------------|
    /// | `FLOWGEN_QUEUE_LIMITS`      | `fast=4,pro=2,local=unlimited`   |
    /// | `FLOWGEN_QUEUE_MAX_WAITING` | unset (unbounded wait lists)     |
    pub fn from_env() -> Result<Self, CoreError> {
        let mut config = Self::parse_limits(&var_or(QUEUE_LIMITS_ENV, DEFAULT_QUEUE_LIMITS))?;
        if let Ok(raw) = std::env::var(QUEUE_MAX_WAITING_ENV) {
            config.max_waiting = Self::parse_max_waiting(&raw)?;
        }
        Ok(config)
    }
}
