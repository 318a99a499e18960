//! REST API client for the generation task backend.
//!
//! Wraps task creation, status retrieval and cancellation using
//! [`reqwest`]. Task ids are opaque and percent-encoded into the path.

use async_trait::async_trait;
use flowgen_core::{TaskId, TaskKind, TaskStatusReport};
use reqwest::{StatusCode, Url};
use serde::Deserialize;

use crate::error::TaskApiError;
use crate::source::TaskStatusSource;

/// HTTP client for one task backend.
#[derive(Clone)]
pub struct TaskApi {
    client: reqwest::Client,
    base_url: String,
}

/// Response returned by the task creation endpoint.
#[derive(Debug, Deserialize)]
pub struct CreateTaskResponse {
    /// Server-assigned identifier of the new task.
    #[serde(alias = "taskId")]
    pub task_id: TaskId,
}

impl TaskApi {
    /// Create a new API client.
    ///
    /// * `base_url` - Base HTTP URL, e.g. `http://host:8080`.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url)
    }

    /// Create an API client reusing an existing [`reqwest::Client`]
    /// (useful for connection pooling across backends).
    pub fn with_client(client: reqwest::Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { client, base_url }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Submit a new generation task.
    ///
    /// Sends `POST /tasks` with the task kind and its input payload and
    /// returns the server-assigned task id.
    pub async fn create_task(
        &self,
        kind: TaskKind,
        input: &serde_json::Value,
    ) -> Result<TaskId, TaskApiError> {
        let body = serde_json::json!({
            "kind": kind,
            "input": input,
        });

        let response = self
            .client
            .post(self.endpoint(&["tasks"])?)
            .json(&body)
            .send()
            .await?;

        let created: CreateTaskResponse = Self::parse_response(response, None).await?;
        tracing::info!(task_id = %created.task_id, %kind, "Task created");
        Ok(created.task_id)
    }

    /// Fetch the current status of a task (`GET /tasks/{id}`).
    pub async fn get_status(&self, task_id: &TaskId) -> Result<TaskStatusReport, TaskApiError> {
        let response = self
            .client
            .get(self.endpoint(&["tasks", task_id.as_str()])?)
            .send()
            .await?;

        Self::parse_response(response, Some(task_id)).await
    }

    /// Ask the backend to stop a queued or running task
    /// (`POST /tasks/{id}/cancel`).
    pub async fn cancel_task(&self, task_id: &TaskId) -> Result<(), TaskApiError> {
        let response = self
            .client
            .post(self.endpoint(&["tasks", task_id.as_str(), "cancel"])?)
            .send()
            .await?;

        Self::ensure_success(response, Some(task_id)).await?;
        Ok(())
    }

    // ---- private helpers ----

    fn endpoint(&self, segments: &[&str]) -> Result<Url, TaskApiError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| TaskApiError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| TaskApiError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    /// Ensure the response has a success status code. A 404 for a
    /// specific task becomes [`TaskApiError::NotFound`].
    async fn ensure_success(
        response: reqwest::Response,
        task_id: Option<&TaskId>,
    ) -> Result<reqwest::Response, TaskApiError> {
        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }
        if let (StatusCode::NOT_FOUND, Some(task_id)) = (status, task_id) {
            return Err(TaskApiError::NotFound(task_id.to_string()));
        }
        let body = response
            .text()
            .await
            .unwrap_or_else(|_| "<unreadable body>".to_string());
        Err(TaskApiError::ApiError {
            status: status.as_u16(),
            body,
        })
    }

    /// Parse a successful JSON response body into the expected type.
    async fn parse_response<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
        task_id: Option<&TaskId>,
    ) -> Result<T, TaskApiError> {
        let response = Self::ensure_success(response, task_id).await?;
        Ok(response.json::<T>().await?)
    }
}

#[async_trait]
impl TaskStatusSource for TaskApi {
    async fn fetch_status(&self, task_id: &TaskId) -> Result<TaskStatusReport, TaskApiError> {
        self.get_status(task_id).await
    }
}
