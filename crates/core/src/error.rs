//! Error raised while building configuration or parsing user input.

/// A configuration value, limit or argument was rejected.
///
/// Runtime failures have their own per-crate error types; this one only
/// covers values checked before anything starts.
#[derive(Debug, thiserror::Error)]
pub enum CoreError {
    #[error("Invalid value: {0}")]
    Validation(String),
}
