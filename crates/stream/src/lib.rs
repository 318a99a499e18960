//! Decoding of incrementally delivered agent event streams.
//!
//! - [`SseDecoder`] frames `data: <json>` records out of arbitrary
//!   transport chunks and parses them into [`StreamEvent`]s.
//! - [`StreamSession`] applies events to a per-session state machine
//!   with per-entity [`ToolCallState`]s.
//! - [`process_stream`] drives a body stream through both and forwards
//!   updates to a [`SessionDispatcher`](flowgen_events::SessionDispatcher).
//! - [`StreamClient`] opens the HTTP stream and handles abort.

pub mod client;
pub mod decoder;
pub mod messages;
pub mod processor;
pub mod session;

pub use client::{StreamClient, StreamError};
pub use decoder::{Decoded, SseDecoder};
pub use messages::{parse_event, EntityEvent, SessionEvent, StreamEvent};
pub use processor::{finish_session, process_stream, SessionUpdate, StopReason};
pub use session::{SessionOutcome, StreamSession, ToolCallState, ToolCallStatus};
