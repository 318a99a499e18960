//! End-to-end decoding tests: body stream -> session state -> subscribers.

use std::convert::Infallible;

use assert_matches::assert_matches;
use flowgen_core::SessionId;
use flowgen_events::SessionDispatcher;
use flowgen_stream::{
    finish_session, process_stream, SessionEvent, SessionOutcome, SessionUpdate, StopReason,
    StreamEvent, StreamSession, ToolCallStatus,
};
use futures::stream::{self, StreamExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

async fn open_session(
    dispatcher: &SessionDispatcher<SessionUpdate>,
) -> (StreamSession, mpsc::UnboundedReceiver<SessionUpdate>) {
    let id = SessionId::generate();
    dispatcher.open(&id).await;
    let (_, rx) = dispatcher.subscribe(&id).await.unwrap();
    (StreamSession::new(id), rx)
}

fn body(
    chunks: Vec<&'static str>,
) -> impl futures::Stream<Item = Result<&'static str, Infallible>> {
    stream::iter(chunks.into_iter().map(Ok))
}

fn drain(rx: &mut mpsc::UnboundedReceiver<SessionUpdate>) -> Vec<SessionUpdate> {
    let mut out = Vec::new();
    while let Ok(update) = rx.try_recv() {
        out.push(update);
    }
    out
}

// ---------------------------------------------------------------------------
// Test: chunk boundaries
// ---------------------------------------------------------------------------

#[tokio::test]
async fn record_split_across_chunks_is_delivered_once() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, mut rx) = open_session(&dispatcher).await;

    let reason = process_stream(
        body(vec![
            "data: {\"type\":\"start\"}\n\ndata: {\"type\":\"chu",
            "nk\",\"content\":\"Hi\"}\n\n",
        ]),
        &mut session,
        &dispatcher,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(reason, StopReason::Closed);
    assert_eq!(session.text(), "Hi");
    let updates = drain(&mut rx);
    assert_eq!(updates.len(), 2);
    assert_matches!(
        &updates[1],
        SessionUpdate::Event(StreamEvent::Session(SessionEvent::Chunk { content })) if content == "Hi"
    );
}

#[tokio::test]
async fn malformed_record_between_two_good_ones_is_skipped() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, mut rx) = open_session(&dispatcher).await;

    process_stream(
        body(vec![
            "data: {\"type\":\"chunk\",\"content\":\"one \"}\n\n",
            "data: {\"type\":\"chunk\",\"content\":\"tw\n\n",
            "data: {\"type\":\"chunk\",\"content\":\"two\"}\n\n",
        ]),
        &mut session,
        &dispatcher,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(session.text(), "one two");
    assert_eq!(session.events().len(), 2);
    assert_eq!(drain(&mut rx).len(), 2);
}

// ---------------------------------------------------------------------------
// Test: terminal events and closure
// ---------------------------------------------------------------------------

#[tokio::test]
async fn complete_stops_reading_and_ends_session() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, mut rx) = open_session(&dispatcher).await;

    let reason = process_stream(
        body(vec![
            "data: {\"type\":\"start\",\"id\":\"t1\",\"name\":\"render\"}\n\n",
            "data: {\"type\":\"progress\",\"id\":\"t1\",\"progress\":0.5}\n\n",
            "data: {\"type\":\"end\",\"id\":\"t1\",\"result\":{\"frames\":24}}\n\n",
            "data: [DONE]\n\n",
            "data: {\"type\":\"complete\",\"result\":{\"answer\":42}}\n\n",
            "data: {\"type\":\"chunk\",\"content\":\"never\"}\n\n",
        ]),
        &mut session,
        &dispatcher,
        &CancellationToken::new(),
    )
    .await;
    finish_session(&session, &dispatcher).await;

    assert_eq!(reason, StopReason::Terminal);
    assert!(session.is_done());
    assert_eq!(session.text(), "");
    assert_eq!(session.entity("t1").unwrap().status, ToolCallStatus::Completed);
    assert_matches!(
        session.outcome(),
        Some(SessionOutcome::Completed { result }) if result["answer"] == 42
    );

    let updates = drain(&mut rx);
    assert_eq!(updates.len(), 5);
    assert_matches!(updates.last(), Some(SessionUpdate::Ended(SessionOutcome::Completed { .. })));
    // The subscriber was dropped with the session.
    assert_eq!(rx.recv().await, None);
    assert!(!dispatcher.is_open(session.id()).await);
}

#[tokio::test]
async fn complete_carrying_an_id_still_ends_session() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, _rx) = open_session(&dispatcher).await;

    let reason = process_stream(
        body(vec![
            "data: {\"type\":\"thought\",\"id\":\"sess-1\",\"content\":\"planning\"}\n\n",
            "data: {\"type\":\"complete\",\"id\":\"sess-1\",\"result\":{\"ok\":true}}\n\n",
            "data: {\"type\":\"chunk\",\"content\":\"never\"}\n\n",
        ]),
        &mut session,
        &dispatcher,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(reason, StopReason::Terminal);
    assert!(session.is_done());
    assert!(session.entity("sess-1").is_none());
    assert_matches!(
        session.outcome(),
        Some(SessionOutcome::Completed { result }) if result["ok"] == true
    );
}

#[tokio::test]
async fn unterminated_final_record_is_flushed_at_close() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, _rx) = open_session(&dispatcher).await;

    let reason = process_stream(
        body(vec!["data: {\"type\":\"error\",\"message\":\"model overloaded\"}"]),
        &mut session,
        &dispatcher,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(reason, StopReason::Terminal);
    assert_eq!(
        session.outcome(),
        Some(&SessionOutcome::Failed {
            message: "model overloaded".to_string()
        })
    );
}

#[tokio::test]
async fn read_error_closes_without_outcome() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, _rx) = open_session(&dispatcher).await;

    let chunks: Vec<Result<&'static str, &'static str>> = vec![
        Ok("data: {\"type\":\"chunk\",\"content\":\"par\"}\n"),
        Err("connection reset by peer"),
        Ok("data: {\"type\":\"chunk\",\"content\":\"tial\"}\n"),
    ];
    let reason = process_stream(
        stream::iter(chunks),
        &mut session,
        &dispatcher,
        &CancellationToken::new(),
    )
    .await;

    assert_eq!(reason, StopReason::Closed);
    assert_eq!(session.text(), "par");
    assert!(session.outcome().is_none());
}

// ---------------------------------------------------------------------------
// Test: cancellation
// ---------------------------------------------------------------------------

#[tokio::test]
async fn cancel_stops_a_stalled_stream() {
    let dispatcher = SessionDispatcher::new();
    let (mut session, mut rx) = open_session(&dispatcher).await;
    let cancel = CancellationToken::new();

    let stalled = body(vec!["data: {\"type\":\"chunk\",\"content\":\"first\"}\n\n"])
        .chain(stream::pending());

    let (reason, _) = tokio::join!(
        process_stream(stalled, &mut session, &dispatcher, &cancel),
        async {
            assert!(rx.recv().await.is_some());
            cancel.cancel();
        }
    );

    assert_eq!(reason, StopReason::Cancelled);
    assert_eq!(session.text(), "first");
}
