//! HTTP client for the streaming endpoint.
//!
//! Opens one streaming request per session, feeds the chunked body
//! through [`process_stream`] and always leaves the dispatcher session
//! closed when it returns. Cancelling the token drops the connection
//! and, when an abort path is configured, tells the backend to stop
//! generating.

use flowgen_core::SessionId;
use flowgen_events::SessionDispatcher;
use reqwest::header::ACCEPT;
use reqwest::Url;
use tokio_util::sync::CancellationToken;

use crate::processor::{finish_session, process_stream, SessionUpdate, StopReason};
use crate::session::StreamSession;

/// Header carrying the session id on stream and abort requests.
pub const SESSION_ID_HEADER: &str = "x-session-id";

/// Errors that prevent a stream from being opened.
#[derive(Debug, thiserror::Error)]
pub enum StreamError {
    /// The HTTP request itself failed (network, DNS, TLS).
    #[error("HTTP request failed: {0}")]
    Request(#[from] reqwest::Error),

    /// The backend answered with a non-2xx status.
    #[error("Stream API error ({status}): {body}")]
    ApiError { status: u16, body: String },

    /// The configured base URL cannot address the endpoint.
    #[error("Invalid stream URL: {0}")]
    InvalidUrl(String),
}

/// Streaming endpoint client.
#[derive(Clone)]
pub struct StreamClient {
    client: reqwest::Client,
    base_url: String,
    stream_path: String,
    abort_path: Option<String>,
}

impl StreamClient {
    /// * `base_url` - Base HTTP URL, e.g. `http://host:8080`.
    /// * `stream_path` - Path of the streaming endpoint, e.g. `agent/stream`.
    pub fn new(base_url: impl Into<String>, stream_path: impl Into<String>) -> Self {
        Self::with_client(reqwest::Client::new(), base_url, stream_path)
    }

    pub fn with_client(
        client: reqwest::Client,
        base_url: impl Into<String>,
        stream_path: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            stream_path: stream_path.into(),
            abort_path: None,
        }
    }

    /// Notify `abort_path` with a `POST` when a stream is cancelled.
    pub fn with_abort_path(mut self, abort_path: impl Into<String>) -> Self {
        self.abort_path = Some(abort_path.into());
        self
    }

    /// Run one streaming request to completion.
    ///
    /// Opens `session_id` in `dispatcher` (subscribers may join before
    /// the call), publishes every accepted event, then publishes
    /// [`SessionUpdate::Ended`] and closes the dispatcher session. The
    /// returned session holds the accumulated state and its outcome.
    ///
    /// Only failures to open the stream are returned as `Err`; they are
    /// also published to subscribers as a failed outcome.
    pub async fn run(
        &self,
        session_id: SessionId,
        request: &serde_json::Value,
        dispatcher: &SessionDispatcher<SessionUpdate>,
        cancel: &CancellationToken,
    ) -> Result<StreamSession, StreamError> {
        dispatcher.open(&session_id).await;
        let mut session = StreamSession::new(session_id);

        let response = match self.open(&session, request, cancel).await {
            Ok(Some(response)) => response,
            Ok(None) => {
                session.abort();
                self.notify_abort(session.id()).await;
                finish_session(&session, dispatcher).await;
                return Ok(session);
            }
            Err(e) => {
                tracing::error!(session_id = %session.id(), error = %e, "Failed to open stream");
                session.fail(e.to_string());
                finish_session(&session, dispatcher).await;
                return Err(e);
            }
        };

        tracing::info!(session_id = %session.id(), "Stream opened");
        let reason = process_stream(response.bytes_stream(), &mut session, dispatcher, cancel).await;

        match reason {
            StopReason::Terminal => {}
            StopReason::Closed => {
                session.close();
            }
            StopReason::Cancelled => {
                // The body was dropped with the loop, which closes the connection.
                session.abort();
                self.notify_abort(session.id()).await;
            }
        }

        finish_session(&session, dispatcher).await;
        Ok(session)
    }

    // ---- private helpers ----

    /// Send the stream request. `Ok(None)` means cancelled before a response.
    async fn open(
        &self,
        session: &StreamSession,
        request: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<Option<reqwest::Response>, StreamError> {
        let send = self
            .client
            .post(self.endpoint(&self.stream_path)?)
            .header(ACCEPT, "text/event-stream")
            .header(SESSION_ID_HEADER, session.id().as_str())
            .json(request)
            .send();

        let response = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Ok(None),
            response = send => response?,
        };

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<unreadable body>".to_string());
            return Err(StreamError::ApiError {
                status: status.as_u16(),
                body,
            });
        }
        Ok(Some(response))
    }

    /// Ask the backend to stop generating. Failures are logged only.
    async fn notify_abort(&self, session_id: &SessionId) {
        let Some(path) = &self.abort_path else {
            return;
        };
        let url = match self.endpoint(path) {
            Ok(url) => url,
            Err(e) => {
                tracing::warn!(%session_id, error = %e, "Cannot build abort URL");
                return;
            }
        };

        let result = self
            .client
            .post(url)
            .header(SESSION_ID_HEADER, session_id.as_str())
            .json(&serde_json::json!({ "session_id": session_id }))
            .send()
            .await
            .and_then(reqwest::Response::error_for_status);

        match result {
            Ok(_) => tracing::info!(%session_id, "Upstream notified of abort"),
            Err(e) => tracing::warn!(%session_id, error = %e, "Abort notification failed"),
        }
    }

    fn endpoint(&self, path: &str) -> Result<Url, StreamError> {
        let mut url = Url::parse(&self.base_url)
            .map_err(|e| StreamError::InvalidUrl(format!("{}: {e}", self.base_url)))?;
        url.path_segments_mut()
            .map_err(|_| StreamError::InvalidUrl(self.base_url.clone()))?
            .pop_if_empty()
            .extend(path.split('/').filter(|s| !s.is_empty()));
        Ok(url)
    }
}
