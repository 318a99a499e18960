//! Stream event types and parser.
//!
//! Every `data:` record carries a JSON object discriminated by a `type`
//! field. Records whose `type` is an entity type and that also carry an
//! `id` are scoped to one entity (a tool call); all others apply to the
//! session as a whole. The same `type` name (`start`, `chunk`) therefore
//! means different things depending on whether an `id` is present, while
//! session-only types such as `complete` ignore a stray `id`.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A decoded stream event.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StreamEvent {
    Session(SessionEvent),
    Entity(EntityEvent),
}

/// Events that apply to the whole session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SessionEvent {
    /// The backend accepted the request and started generating.
    Start {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Free text appended to the session's output.
    Chunk {
        #[serde(alias = "text", alias = "delta")]
        content: String,
    },

    /// Incremental reasoning text.
    ThinkingChunk {
        #[serde(alias = "text", alias = "delta")]
        content: String,
    },

    /// A complete reasoning step.
    Thought {
        #[serde(alias = "text")]
        content: String,
    },

    /// The agent decided to invoke a tool.
    Action {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        tool: Option<String>,
        #[serde(default)]
        input: Value,
    },

    /// What a tool invocation returned.
    Observation {
        #[serde(default)]
        content: Value,
    },

    /// The session finished; `result` is the structured output.
    Complete {
        #[serde(default)]
        result: Value,
    },

    /// The session was aborted upstream.
    Error {
        #[serde(alias = "error")]
        message: String,
    },
}

/// Events scoped to one entity, keyed by `id`.
///
/// An entity goes through `start`, then any number of `input`,
/// `progress` and `chunk` events, then `end`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntityEvent {
    Start {
        id: String,
        #[serde(default, alias = "tool", skip_serializing_if = "Option::is_none")]
        name: Option<String>,
    },

    /// Tool input. A string is a streamed fragment and is appended; any
    /// other JSON value replaces the accumulated input.
    Input {
        id: String,
        #[serde(alias = "delta")]
        input: Value,
    },

    Progress {
        id: String,
        #[serde(alias = "value")]
        progress: f64,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
    },

    /// Streamed output text of the entity.
    Chunk {
        id: String,
        #[serde(alias = "text", alias = "delta")]
        content: String,
    },

    /// The entity finished. A present `error` means it failed.
    End {
        id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        result: Option<Value>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
    },
}

impl EntityEvent {
    pub fn id(&self) -> &str {
        match self {
            EntityEvent::Start { id, .. }
            | EntityEvent::Input { id, .. }
            | EntityEvent::Progress { id, .. }
            | EntityEvent::Chunk { id, .. }
            | EntityEvent::End { id, .. } => id,
        }
    }
}

impl StreamEvent {
    /// The `type` discriminator, for logging.
    pub fn type_name(&self) -> &'static str {
        match self {
            StreamEvent::Session(event) => match event {
                SessionEvent::Start { .. } => "start",
                SessionEvent::Chunk { .. } => "chunk",
                SessionEvent::ThinkingChunk { .. } => "thinking_chunk",
                SessionEvent::Thought { .. } => "thought",
                SessionEvent::Action { .. } => "action",
                SessionEvent::Observation { .. } => "observation",
                SessionEvent::Complete { .. } => "complete",
                SessionEvent::Error { .. } => "error",
            },
            StreamEvent::Entity(event) => match event {
                EntityEvent::Start { .. } => "start",
                EntityEvent::Input { .. } => "input",
                EntityEvent::Progress { .. } => "progress",
                EntityEvent::Chunk { .. } => "chunk",
                EntityEvent::End { .. } => "end",
            },
        }
    }
}

/// `type` values that can be scoped to an entity.
const ENTITY_TYPES: [&str; 5] = ["start", "input", "progress", "chunk", "end"];

/// Parse one `data:` payload into a typed event.
///
/// Returns `Err` for malformed JSON, a missing or unknown `type`, or
/// missing required fields. Callers should log and skip.
pub fn parse_event(text: &str) -> Result<StreamEvent, serde_json::Error> {
    let value: Value = serde_json::from_str(text)?;
    let has_id = value.get("id").is_some_and(|id| !id.is_null());
    let entity_type = value
        .get("type")
        .and_then(Value::as_str)
        .is_some_and(|kind| ENTITY_TYPES.contains(&kind));
    let scoped = has_id && entity_type;
    if scoped {
        serde_json::from_value(value).map(StreamEvent::Entity)
    } else {
        serde_json::from_value(value).map(StreamEvent::Session)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn parse_session_chunk() {
        let event = parse_event(r#"{"type":"chunk","content":"Hello"}"#).unwrap();
        assert_eq!(
            event,
            StreamEvent::Session(SessionEvent::Chunk {
                content: "Hello".to_string()
            })
        );
        assert_eq!(event.type_name(), "chunk");
    }

    #[test]
    fn id_makes_event_entity_scoped() {
        let event = parse_event(r#"{"type":"chunk","id":"tool-1","text":"partial"}"#).unwrap();
        match event {
            StreamEvent::Entity(EntityEvent::Chunk { id, content }) => {
                assert_eq!(id, "tool-1");
                assert_eq!(content, "partial");
            }
            other => panic!("Expected entity chunk, got {other:?}"),
        }
    }

    #[test]
    fn session_only_types_ignore_id() {
        let complete =
            parse_event(r#"{"type":"complete","id":"sess-1","result":{"ok":true}}"#).unwrap();
        assert_matches!(
            complete,
            StreamEvent::Session(SessionEvent::Complete { result }) if result["ok"] == true
        );

        let error = parse_event(r#"{"type":"error","id":"sess-1","message":"boom"}"#).unwrap();
        assert_matches!(
            error,
            StreamEvent::Session(SessionEvent::Error { message }) if message == "boom"
        );

        let thought = parse_event(r#"{"type":"thought","id":"step-2","content":"hmm"}"#).unwrap();
        assert_matches!(thought, StreamEvent::Session(SessionEvent::Thought { .. }));
    }

    #[test]
    fn parse_entity_end_with_error() {
        let event = parse_event(r#"{"type":"end","id":"t","error":"rate limited"}"#).unwrap();
        assert_matches!(
            event,
            StreamEvent::Entity(EntityEvent::End { error: Some(e), result: None, .. }) if e == "rate limited"
        );
    }

    #[test]
    fn parse_complete_and_error() {
        let complete = parse_event(r#"{"type":"complete","result":{"slides":3}}"#).unwrap();
        assert_matches!(
            complete,
            StreamEvent::Session(SessionEvent::Complete { result }) if result["slides"] == 3
        );

        let error = parse_event(r#"{"type":"error","error":"context overflow"}"#).unwrap();
        assert_matches!(
            error,
            StreamEvent::Session(SessionEvent::Error { message }) if message == "context overflow"
        );
    }

    #[test]
    fn parse_action_without_input() {
        let event = parse_event(r#"{"type":"action","tool":"search"}"#).unwrap();
        assert_matches!(
            event,
            StreamEvent::Session(SessionEvent::Action { tool: Some(t), input: Value::Null }) if t == "search"
        );
    }

    #[test]
    fn unknown_type_is_an_error() {
        assert!(parse_event(r#"{"type":"telemetry","cpu":3}"#).is_err());
        assert!(parse_event(r#"{"content":"no type"}"#).is_err());
        assert!(parse_event("{not json").is_err());
        assert!(parse_event(r#"{"type":"end"}"#).is_err());
    }

    #[test]
    fn entity_event_roundtrips_type_tag() {
        let event = StreamEvent::Entity(EntityEvent::Progress {
            id: "t".to_string(),
            progress: 0.5,
            message: None,
        });
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "progress");
        assert_eq!(json["id"], "t");
    }
}
