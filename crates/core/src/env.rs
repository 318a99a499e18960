//! Helpers for reading typed configuration values from the environment.

use std::str::FromStr;

use crate::error::CoreError;

/// Read `name` from the environment, falling back to `default`.
pub fn var_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

/// Parse a raw configuration value, naming the setting in the error.
///
/// Returns `Ok(None)` when the value is blank.
pub fn parse_value<T: FromStr>(name: &str, raw: &str) -> Result<Option<T>, CoreError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Ok(None);
    }
    trimmed
        .parse()
        .map(Some)
        .map_err(|_| CoreError::Validation(format!("{name} has an invalid value: \"{trimmed}\"")))
}
