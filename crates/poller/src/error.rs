//! Errors from the task backend.

/// Errors from the task REST API layer.
#[derive(Debug, thiserror::Error)]
pub enum TaskApiError {
    /// The HTTP request itself failed (network, DNS, TLS, body decoding).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend does not know this task (HTTP 404).
    #[error("Task {0} not found")]
    NotFound(String),

    /// The backend returned a non-2xx status code other than 404.
    #[error("Task API error ({status}): {body}")]
    ApiError {
        /// HTTP status code.
        status: u16,
        /// Raw response body for debugging.
        body: String,
    },

    /// The configured base URL cannot address a task.
    #[error("Invalid task API URL: {0}")]
    InvalidUrl(String),
}

impl TaskApiError {
    /// Whether this error means the task is gone for good.
    pub fn is_not_found(&self) -> bool {
        matches!(self, TaskApiError::NotFound(_))
    }
}
