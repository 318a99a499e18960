//! Accumulated state of one streaming response.
//!
//! [`StreamSession::apply`] is the only way state changes. Once the
//! session reaches an outcome it is frozen, and so is every entity once
//! it ends.

use flowgen_core::SessionId;
use indexmap::IndexMap;
use serde::Serialize;
use serde_json::Value;

use crate::messages::{EntityEvent, SessionEvent, StreamEvent};

// ---------------------------------------------------------------------------
// ToolCallState
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolCallStatus {
    Running,
    Completed,
    Errored,
}

/// State of one entity (tool call) within a session.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolCallState {
    pub name: Option<String>,
    pub status: ToolCallStatus,
    /// Structured input, when the backend sent a JSON value.
    pub input: Value,
    /// Concatenated input fragments, when the backend streamed text.
    pub input_text: String,
    /// Concatenated output text.
    pub text: String,
    pub progress: Option<f64>,
    pub result: Option<Value>,
    pub error: Option<String>,
}

impl ToolCallState {
    fn new(name: Option<String>) -> Self {
        Self {
            name,
            status: ToolCallStatus::Running,
            input: Value::Null,
            input_text: String::new(),
            text: String::new(),
            progress: None,
            result: None,
            error: None,
        }
    }

    pub fn is_finished(&self) -> bool {
        self.status != ToolCallStatus::Running
    }
}

// ---------------------------------------------------------------------------
// SessionOutcome
// ---------------------------------------------------------------------------

/// How a stream session ended.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum SessionOutcome {
    /// A `complete` event arrived, carrying the structured result.
    Completed { result: Value },
    /// An `error` event arrived, or the request itself failed.
    Failed { message: String },
    /// The initiator aborted the stream.
    Aborted,
    /// The connection ended without a terminal event.
    Closed,
}

// ---------------------------------------------------------------------------
// StreamSession
// ---------------------------------------------------------------------------

/// Per-session state machine fed by decoded events.
#[derive(Debug, Clone, Serialize)]
pub struct StreamSession {
    id: SessionId,
    events: Vec<StreamEvent>,
    entities: IndexMap<String, ToolCallState>,
    text: String,
    thinking: String,
    done: bool,
    outcome: Option<SessionOutcome>,
}

impl StreamSession {
    pub fn new(id: SessionId) -> Self {
        Self {
            id,
            events: Vec::new(),
            entities: IndexMap::new(),
            text: String::new(),
            thinking: String::new(),
            done: false,
            outcome: None,
        }
    }

    pub fn id(&self) -> &SessionId {
        &self.id
    }

    /// Accepted events in stream order.
    pub fn events(&self) -> &[StreamEvent] {
        &self.events
    }

    /// Entity states in order of first `start`.
    pub fn entities(&self) -> &IndexMap<String, ToolCallState> {
        &self.entities
    }

    pub fn entity(&self, id: &str) -> Option<&ToolCallState> {
        self.entities.get(id)
    }

    /// Accumulated free text.
    pub fn text(&self) -> &str {
        &self.text
    }

    /// Accumulated reasoning text.
    pub fn thinking(&self) -> &str {
        &self.thinking
    }

    /// Whether the `[DONE]` sentinel was seen.
    pub fn is_done(&self) -> bool {
        self.done
    }

    pub fn outcome(&self) -> Option<&SessionOutcome> {
        self.outcome.as_ref()
    }

    pub fn is_terminal(&self) -> bool {
        self.outcome.is_some()
    }

    /// Apply one event. Returns `false` if it was ignored: the session
    /// is over, the entity is unknown or already ended, or free text
    /// arrived after `[DONE]`.
    pub fn apply(&mut self, event: StreamEvent) -> bool {
        if self.is_terminal() {
            tracing::debug!(
                session_id = %self.id,
                event_type = event.type_name(),
                "Ignoring event after session end",
            );
            return false;
        }

        let accepted = match &event {
            StreamEvent::Session(e) => self.apply_session(e),
            StreamEvent::Entity(e) => self.apply_entity(e),
        };
        if accepted {
            self.events.push(event);
        }
        accepted
    }

    /// Record the `[DONE]` sentinel. Free text is no longer appended;
    /// `complete` and `error` are still honoured.
    pub fn mark_done(&mut self) {
        self.done = true;
    }

    /// The initiator aborted the stream. No-op once terminal.
    pub fn abort(&mut self) -> bool {
        self.finish(SessionOutcome::Aborted)
    }

    /// The connection ended. No-op once terminal.
    pub fn close(&mut self) -> bool {
        self.finish(SessionOutcome::Closed)
    }

    /// The request failed before or while streaming. No-op once terminal.
    pub fn fail(&mut self, message: impl Into<String>) -> bool {
        self.finish(SessionOutcome::Failed {
            message: message.into(),
        })
    }

    // ---- private helpers ----

    fn finish(&mut self, outcome: SessionOutcome) -> bool {
        if self.is_terminal() {
            return false;
        }
        tracing::info!(session_id = %self.id, outcome = ?outcome, "Stream session ended");
        self.outcome = Some(outcome);
        true
    }

    fn apply_session(&mut self, event: &SessionEvent) -> bool {
        match event {
            SessionEvent::Chunk { content } | SessionEvent::ThinkingChunk { content }
                if self.done =>
            {
                tracing::debug!(session_id = %self.id, len = content.len(), "Text after [DONE] dropped");
                false
            }
            SessionEvent::Chunk { content } => {
                self.text.push_str(content);
                true
            }
            SessionEvent::ThinkingChunk { content } => {
                self.thinking.push_str(content);
                true
            }
            SessionEvent::Start { .. }
            | SessionEvent::Thought { .. }
            | SessionEvent::Action { .. }
            | SessionEvent::Observation { .. } => true,
            SessionEvent::Complete { result } => self.finish(SessionOutcome::Completed {
                result: result.clone(),
            }),
            SessionEvent::Error { message } => self.finish(SessionOutcome::Failed {
                message: message.clone(),
            }),
        }
    }

    fn apply_entity(&mut self, event: &EntityEvent) -> bool {
        if let EntityEvent::Start { id, name } = event {
            self.entities.insert(id.clone(), ToolCallState::new(name.clone()));
            return true;
        }

        let id = event.id();
        let Some(state) = self.entities.get_mut(id) else {
            tracing::debug!(session_id = %self.id, entity_id = id, "Event for unknown entity ignored");
            return false;
        };
        if state.is_finished() {
            tracing::debug!(session_id = %self.id, entity_id = id, "Event for finished entity ignored");
            return false;
        }

        match event {
            EntityEvent::Start { .. } => {}
            EntityEvent::Input { input, .. } => match input {
                Value::String(fragment) => state.input_text.push_str(fragment),
                other => state.input = other.clone(),
            },
            EntityEvent::Progress { progress, .. } => state.progress = Some(*progress),
            EntityEvent::Chunk { content, .. } => state.text.push_str(content),
            EntityEvent::End { result, error, .. } => {
                state.result = result.clone();
                state.error = error.clone();
                state.status = if error.is_some() {
                    ToolCallStatus::Errored
                } else {
                    ToolCallStatus::Completed
                };
            }
        }
        true
    }
}
