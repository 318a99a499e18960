//! Stream consumption loop.
//!
//! Reads raw chunks from a body stream, decodes them into events,
//! applies each event to a [`StreamSession`] and forwards accepted ones
//! to the session's subscribers. Ends on a terminal event, on closure
//! or read failure of the stream, or on cancellation.

use std::fmt::Display;

use flowgen_events::SessionDispatcher;
use futures::{Stream, StreamExt};
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use crate::decoder::{Decoded, SseDecoder};
use crate::messages::StreamEvent;
use crate::session::{SessionOutcome, StreamSession};

/// What subscribers of a stream session receive.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "snake_case")]
pub enum SessionUpdate {
    /// An event accepted by the session.
    Event(StreamEvent),
    /// The session ended. Always the last message.
    Ended(SessionOutcome),
}

/// Why [`process_stream`] stopped reading.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// The session reached a terminal event.
    Terminal,
    /// The body ended or failed to read.
    Closed,
    /// The cancellation token fired.
    Cancelled,
}

/// Consume `body` into `session` until it stops.
///
/// Accepted events are published as [`SessionUpdate::Event`]. The
/// session is not ended here unless a terminal event arrives; the caller
/// decides how closure and cancellation are recorded.
pub async fn process_stream<S, B, E>(
    body: S,
    session: &mut StreamSession,
    dispatcher: &SessionDispatcher<SessionUpdate>,
    cancel: &CancellationToken,
) -> StopReason
where
    S: Stream<Item = Result<B, E>>,
    B: AsRef<[u8]>,
    E: Display,
{
    let mut body = std::pin::pin!(body);
    let mut decoder = SseDecoder::new();

    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => return StopReason::Cancelled,
            next = body.next() => next,
        };

        match next {
            Some(Ok(chunk)) => {
                for decoded in decoder.push(chunk.as_ref()) {
                    if apply(decoded, session, dispatcher).await {
                        return StopReason::Terminal;
                    }
                }
            }
            Some(Err(e)) => {
                tracing::warn!(session_id = %session.id(), error = %e, "Stream read failed");
                return StopReason::Closed;
            }
            None => {
                if let Some(decoded) = decoder.finish() {
                    if apply(decoded, session, dispatcher).await {
                        return StopReason::Terminal;
                    }
                }
                tracing::debug!(
                    session_id = %session.id(),
                    skipped = decoder.skipped(),
                    "Stream body ended",
                );
                return StopReason::Closed;
            }
        }
    }
}

/// Apply one decoded record. Returns `true` once the session is terminal.
async fn apply(
    decoded: Decoded,
    session: &mut StreamSession,
    dispatcher: &SessionDispatcher<SessionUpdate>,
) -> bool {
    match decoded {
        Decoded::Done => {
            tracing::debug!(session_id = %session.id(), "Received [DONE]");
            session.mark_done();
        }
        Decoded::Event(event) => {
            if session.apply(event.clone()) {
                dispatcher
                    .publish(session.id(), SessionUpdate::Event(event))
                    .await;
            }
        }
    }
    session.is_terminal()
}

/// Publish the final outcome and close the session in `dispatcher`.
pub async fn finish_session(session: &StreamSession, dispatcher: &SessionDispatcher<SessionUpdate>) {
    let outcome = session.outcome().cloned().unwrap_or(SessionOutcome::Closed);
    dispatcher
        .publish(session.id(), SessionUpdate::Ended(outcome))
        .await;
    dispatcher.close(session.id()).await;
}
