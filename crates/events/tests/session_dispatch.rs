//! Subscriber lifetime tests for [`SessionDispatcher`].

use flowgen_core::SessionId;
use flowgen_events::SessionDispatcher;

// ---------------------------------------------------------------------------
// Test: fan-out and ordering
// ---------------------------------------------------------------------------

#[tokio::test]
async fn every_subscriber_sees_every_message_in_order() {
    let dispatcher = SessionDispatcher::<&'static str>::new();
    let session = SessionId::generate();
    dispatcher.open(&session).await;
    let (_a, mut rx_a) = dispatcher.subscribe(&session).await.unwrap();
    let (_b, mut rx_b) = dispatcher.subscribe(&session).await.unwrap();

    for msg in ["start", "chunk", "complete"] {
        assert_eq!(dispatcher.publish(&session, msg).await, 2);
    }

    for rx in [&mut rx_a, &mut rx_b] {
        assert_eq!(rx.recv().await, Some("start"));
        assert_eq!(rx.recv().await, Some("chunk"));
        assert_eq!(rx.recv().await, Some("complete"));
    }
}

#[tokio::test]
async fn sessions_are_isolated() {
    let dispatcher = SessionDispatcher::<u32>::new();
    let first = SessionId::generate();
    let second = SessionId::generate();
    dispatcher.open(&first).await;
    dispatcher.open(&second).await;
    let (_s1, mut rx1) = dispatcher.subscribe(&first).await.unwrap();
    let (_s2, mut rx2) = dispatcher.subscribe(&second).await.unwrap();

    dispatcher.publish(&first, 1).await;
    assert_eq!(rx1.recv().await, Some(1));
    assert!(rx2.try_recv().is_err());
}

// ---------------------------------------------------------------------------
// Test: observers never outlive their session
// ---------------------------------------------------------------------------

#[tokio::test]
async fn closing_session_drops_all_subscribers() {
    let dispatcher = SessionDispatcher::<u32>::new();
    let session = SessionId::generate();
    dispatcher.open(&session).await;
    let (_a, mut rx_a) = dispatcher.subscribe(&session).await.unwrap();
    let (_b, mut rx_b) = dispatcher.subscribe(&session).await.unwrap();

    dispatcher.publish(&session, 7).await;
    assert_eq!(dispatcher.close(&session).await, 2);

    // Already-delivered messages drain, then the channel ends.
    assert_eq!(rx_a.recv().await, Some(7));
    assert_eq!(rx_a.recv().await, None);
    assert_eq!(rx_b.recv().await, Some(7));
    assert_eq!(rx_b.recv().await, None);

    assert!(!dispatcher.is_open(&session).await);
    assert_eq!(dispatcher.publish(&session, 8).await, 0);
    assert!(dispatcher.subscribe(&session).await.is_err());
}

#[tokio::test]
async fn last_unsubscribe_closes_session() {
    let dispatcher = SessionDispatcher::<u32>::new();
    let session = SessionId::generate();
    dispatcher.open(&session).await;
    let (a, _rx_a) = dispatcher.subscribe(&session).await.unwrap();
    let (b, _rx_b) = dispatcher.subscribe(&session).await.unwrap();

    assert!(dispatcher.unsubscribe(&session, a).await);
    assert!(!dispatcher.unsubscribe(&session, a).await);
    assert_eq!(dispatcher.subscriber_count(&session).await, 1);
    assert!(dispatcher.is_open(&session).await);

    assert!(dispatcher.unsubscribe(&session, b).await);
    assert!(!dispatcher.is_open(&session).await);
    assert_eq!(dispatcher.session_count().await, 0);
}

#[tokio::test]
async fn dropped_receivers_are_pruned_on_publish() {
    let dispatcher = SessionDispatcher::<u32>::new();
    let session = SessionId::generate();
    dispatcher.open(&session).await;
    let (_a, rx_a) = dispatcher.subscribe(&session).await.unwrap();
    let (_b, mut rx_b) = dispatcher.subscribe(&session).await.unwrap();

    drop(rx_a);
    assert_eq!(dispatcher.publish(&session, 1).await, 1);
    assert_eq!(dispatcher.subscriber_count(&session).await, 1);
    assert_eq!(rx_b.recv().await, Some(1));

    drop(rx_b);
    assert_eq!(dispatcher.publish(&session, 2).await, 0);
    assert!(!dispatcher.is_open(&session).await);
}

#[tokio::test]
async fn close_all_ends_every_session() {
    let dispatcher = SessionDispatcher::<u32>::new();
    let mut receivers = Vec::new();
    for _ in 0..3 {
        let session = SessionId::generate();
        dispatcher.open(&session).await;
        receivers.push(dispatcher.subscribe(&session).await.unwrap().1);
    }

    dispatcher.close_all().await;
    assert_eq!(dispatcher.session_count().await, 0);
    for mut rx in receivers {
        assert_eq!(rx.recv().await, None);
    }
}
