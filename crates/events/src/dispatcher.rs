//! Per-session publish/subscribe.
//!
//! A [`SessionDispatcher`] maps each open session to its subscribers'
//! channel senders. Closing a session removes the entry and drops every
//! sender, so a subscriber never outlives the session it observes: its
//! receiver drains what was already delivered and then yields `None`.
//! A session whose last subscriber leaves is closed the same way.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};

use flowgen_core::SessionId;
use tokio::sync::{mpsc, RwLock};

/// Identifies one subscription within a session.
pub type SubscriberId = u64;

#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// The session was never opened, or is already closed.
    #[error("Session {0} is not open")]
    SessionNotOpen(SessionId),
}

struct Subscriber<M> {
    id: SubscriberId,
    sender: mpsc::UnboundedSender<M>,
}

/// Fans session messages out to that session's subscribers.
///
/// Thread-safe via interior `RwLock`; designed to be wrapped in `Arc`.
pub struct SessionDispatcher<M> {
    sessions: RwLock<HashMap<SessionId, Vec<Subscriber<M>>>>,
    next_id: AtomicU64,
}

impl<M: Clone> SessionDispatcher<M> {
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Open `session_id` for subscription. Opening an open session is a no-op.
    pub async fn open(&self, session_id: &SessionId) {
        self.sessions
            .write()
            .await
            .entry(session_id.clone())
            .or_default();
    }

    /// Register a subscriber on an open session.
    ///
    /// Returns the subscription id (for [`unsubscribe`](Self::unsubscribe))
    /// and the receiving half of its channel.
    pub async fn subscribe(
        &self,
        session_id: &SessionId,
    ) -> Result<(SubscriberId, mpsc::UnboundedReceiver<M>), DispatchError> {
        let mut sessions = self.sessions.write().await;
        let subscribers = sessions
            .get_mut(session_id)
            .ok_or_else(|| DispatchError::SessionNotOpen(session_id.clone()))?;

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (sender, rx) = mpsc::unbounded_channel();
        subscribers.push(Subscriber { id, sender });
        tracing::debug!(%session_id, subscriber_id = id, "Subscriber added");
        Ok((id, rx))
    }

    /// Remove one subscriber. Returns `false` if it was not registered.
    ///
    /// Removing the last subscriber closes the session.
    pub async fn unsubscribe(&self, session_id: &SessionId, subscriber_id: SubscriberId) -> bool {
        let mut sessions = self.sessions.write().await;
        let Some(subscribers) = sessions.get_mut(session_id) else {
            return false;
        };
        let before = subscribers.len();
        subscribers.retain(|s| s.id != subscriber_id);
        let removed = subscribers.len() < before;
        if removed {
            tracing::debug!(%session_id, subscriber_id, "Subscriber removed");
        }
        if subscribers.is_empty() {
            sessions.remove(session_id);
            tracing::debug!(%session_id, "Last subscriber left, session closed");
        }
        removed
    }

    /// Deliver `message` to every subscriber of `session_id`.
    ///
    /// Subscribers whose receiver was dropped are pruned; if none remain
    /// the session is closed. Returns the number of deliveries.
    pub async fn publish(&self, session_id: &SessionId, message: M) -> usize {
        let mut sessions = self.sessions.write().await;
        let Some(subscribers) = sessions.get_mut(session_id) else {
            return 0;
        };
        let had_subscribers = !subscribers.is_empty();

        subscribers.retain(|s| {
            let alive = s.sender.send(message.clone()).is_ok();
            if !alive {
                tracing::debug!(%session_id, subscriber_id = s.id, "Pruned dropped subscriber");
            }
            alive
        });
        let delivered = subscribers.len();

        if had_subscribers && delivered == 0 {
            sessions.remove(session_id);
            tracing::debug!(%session_id, "All subscribers gone, session closed");
        }
        delivered
    }

    /// Close a session, dropping every subscriber. Returns how many were dropped.
    pub async fn close(&self, session_id: &SessionId) -> usize {
        let dropped = self
            .sessions
            .write()
            .await
            .remove(session_id)
            .map_or(0, |subscribers| subscribers.len());
        tracing::debug!(%session_id, dropped, "Session closed");
        dropped
    }

    pub async fn is_open(&self, session_id: &SessionId) -> bool {
        self.sessions.read().await.contains_key(session_id)
    }

    /// Number of open sessions.
    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }

    /// Number of subscribers on `session_id` (zero when closed).
    pub async fn subscriber_count(&self, session_id: &SessionId) -> usize {
        self.sessions
            .read()
            .await
            .get(session_id)
            .map_or(0, Vec::len)
    }

    /// Close every session.
    pub async fn close_all(&self) {
        let mut sessions = self.sessions.write().await;
        let count = sessions.len();
        sessions.clear();
        tracing::info!(count, "Closed all stream sessions");
    }
}

impl<M: Clone> Default for SessionDispatcher<M> {
    fn default() -> Self {
        Self::new()
    }
}
