//! Per-resource-class admission control.
//!
//! [`QueueManager`] owns one [`ClassState`] per resource class: a count
//! of running jobs, the configured ceiling and a FIFO list of waiters.
//! All mutation happens under a single lock inside the manager, so
//! concurrent `enqueue` calls from independent callers cannot violate
//! `active <= max`.
//!
//! A finishing job hands its slot straight to the head of the wait list
//! instead of freeing it, which keeps admission strictly FIFO: a newly
//! arriving job can never overtake one that is already waiting.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::oneshot;

use crate::config::{ConcurrencyLimit, QueueConfig};

// ---------------------------------------------------------------------------
// Errors and status
// ---------------------------------------------------------------------------

/// Errors raised by the queue itself. Failures of the unit of work are
/// never turned into a `QueueError`; they are returned to the caller as-is.
#[derive(Debug, thiserror::Error)]
pub enum QueueError {
    /// No resource class with this name was configured.
    #[error("Unknown resource class: {0}")]
    UnknownResourceClass(String),

    /// The class wait list reached its configured depth limit.
    #[error("Resource class {resource_class} has {depth} jobs waiting; queue is full")]
    QueueFull { resource_class: String, depth: usize },

    /// The slot hand-off channel closed before a slot was granted.
    #[error("Submission queue closed")]
    Closed,
}

/// Snapshot of one resource class, as returned by [`QueueManager::queue_status`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ClassStatus {
    /// Jobs currently running.
    pub active: usize,
    /// Jobs waiting for a slot.
    pub waiting: usize,
    /// Configured ceiling, `None` when unbounded.
    pub max_concurrency: Option<usize>,
}

// ---------------------------------------------------------------------------
// Internal state
// ---------------------------------------------------------------------------

struct Waiter {
    ticket: u64,
    wake: oneshot::Sender<()>,
}

struct ClassState {
    limit: ConcurrencyLimit,
    active: usize,
    waiting: VecDeque<Waiter>,
}

impl ClassState {
    fn new(limit: ConcurrencyLimit) -> Self {
        Self {
            limit,
            active: 0,
            waiting: VecDeque::new(),
        }
    }

    /// Start as many waiters as the limit allows, in FIFO order.
    fn admit_waiters(&mut self) {
        while self.limit.admits(self.active) {
            let Some(waiter) = self.waiting.pop_front() else {
                break;
            };
            // A failed send means the waiter is already gone; try the next one.
            if waiter.wake.send(()).is_ok() {
                self.active += 1;
            }
        }
    }

    fn release(&mut self) {
        self.active = self.active.saturating_sub(1);
        self.admit_waiters();
    }

    fn status(&self) -> ClassStatus {
        ClassStatus {
            active: self.active,
            waiting: self.waiting.len(),
            max_concurrency: self.limit.max(),
        }
    }
}

struct Inner {
    classes: Mutex<HashMap<String, ClassState>>,
    max_waiting: Option<usize>,
    next_ticket: AtomicU64,
}

impl Inner {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, ClassState>> {
        // Critical sections never panic mid-update.
        self.classes.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn release(&self, resource_class: &str) {
        let mut classes = self.lock();
        if let Some(state) = classes.get_mut(resource_class) {
            state.release();
            tracing::debug!(
                resource_class,
                active = state.active,
                waiting = state.waiting.len(),
                "Job slot released",
            );
        }
    }
}

enum Admission {
    Immediate,
    Queued {
        ticket: u64,
        rx: oneshot::Receiver<()>,
    },
}

// ---------------------------------------------------------------------------
// Guards
// ---------------------------------------------------------------------------

/// A running slot. Dropping it (success, error, panic or cancellation of
/// the caller) frees the slot for the next waiter.
struct SlotGuard {
    inner: Arc<Inner>,
    resource_class: String,
}

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.inner.release(&self.resource_class);
    }
}

/// A queued caller. If the caller stops waiting, its entry is removed;
/// if a slot was already handed over, the slot is passed on.
struct PendingGuard {
    inner: Arc<Inner>,
    resource_class: String,
    ticket: u64,
    armed: bool,
}

impl PendingGuard {
    fn into_slot(mut self) -> SlotGuard {
        self.armed = false;
        SlotGuard {
            inner: Arc::clone(&self.inner),
            resource_class: std::mem::take(&mut self.resource_class),
        }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let mut classes = self.inner.lock();
        let Some(state) = classes.get_mut(&self.resource_class) else {
            return;
        };
        match state.waiting.iter().position(|w| w.ticket == self.ticket) {
            Some(pos) => {
                state.waiting.remove(pos);
                tracing::debug!(
                    resource_class = %self.resource_class,
                    "Queued job abandoned before start",
                );
            }
            // Already admitted: the slot is ours, give it away.
            None => state.release(),
        }
    }
}

// ---------------------------------------------------------------------------
// QueueManager
// ---------------------------------------------------------------------------

/// Rate-limited submission queue.
///
/// Cheap to clone; clones share the same per-class state. Independent
/// instances (e.g. one per test) share nothing.
#[derive(Clone)]
pub struct QueueManager {
    inner: Arc<Inner>,
}

impl QueueManager {
    /// Build a queue from a validated configuration.
    pub fn new(config: QueueConfig) -> Self {
        let classes = config
            .classes
            .into_iter()
            .map(|(name, limit)| (name, ClassState::new(limit)))
            .collect();
        Self {
            inner: Arc::new(Inner {
                classes: Mutex::new(classes),
                max_waiting: config.max_waiting,
                next_ticket: AtomicU64::new(0),
            }),
        }
    }

    /// Add a resource class, or change the limit of an existing one.
    ///
    /// Raising a limit immediately starts waiters that now fit; lowering
    /// it lets running jobs finish and only admits new ones below the
    /// new ceiling.
    pub fn register_class(&self, resource_class: impl Into<String>, limit: ConcurrencyLimit) {
        let resource_class = resource_class.into();
        let mut classes = self.inner.lock();
        let state = classes
            .entry(resource_class.clone())
            .or_insert_with(|| ClassState::new(limit));
        state.limit = limit;
        state.admit_waiters();
        tracing::info!(resource_class = %resource_class, %limit, "Resource class registered");
    }

    /// Run `work` inside a slot of `resource_class`.
    ///
    /// If the class is saturated the call waits, in submission order,
    /// until a running job settles. The returned value is exactly what
    /// `work` produced; a failing unit only affects its own caller and
    /// its slot is reassigned as soon as it settles.
    pub async fn enqueue<F, Fut, T>(&self, resource_class: &str, work: F) -> Result<T, QueueError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = T>,
    {
        let _slot = self.acquire(resource_class).await?;
        Ok(work().await)
    }

    /// Per-class `{active, waiting}` counters, sorted by class name.
    pub fn queue_status(&self) -> BTreeMap<String, ClassStatus> {
        self.inner
            .lock()
            .iter()
            .map(|(name, state)| (name.clone(), state.status()))
            .collect()
    }

    /// Counters for a single class.
    pub fn class_status(&self, resource_class: &str) -> Option<ClassStatus> {
        self.inner.lock().get(resource_class).map(ClassState::status)
    }

    /// Whether every class is idle with an empty wait list.
    pub fn is_idle(&self) -> bool {
        self.inner
            .lock()
            .values()
            .all(|state| state.active == 0 && state.waiting.is_empty())
    }

    // ---- private helpers ----

    async fn acquire(&self, resource_class: &str) -> Result<SlotGuard, QueueError> {
        let admission = self.admit_or_queue(resource_class)?;

        match admission {
            Admission::Immediate => {
                tracing::debug!(resource_class, "Job admitted");
                Ok(SlotGuard {
                    inner: Arc::clone(&self.inner),
                    resource_class: resource_class.to_string(),
                })
            }
            Admission::Queued { ticket, rx } => {
                let pending = PendingGuard {
                    inner: Arc::clone(&self.inner),
                    resource_class: resource_class.to_string(),
                    ticket,
                    armed: true,
                };
                tracing::debug!(resource_class, ticket, "Job queued");
                match rx.await {
                    Ok(()) => {
                        tracing::debug!(resource_class, ticket, "Queued job admitted");
                        Ok(pending.into_slot())
                    }
                    Err(_) => {
                        let mut pending = pending;
                        pending.armed = false;
                        Err(QueueError::Closed)
                    }
                }
            }
        }
    }

    fn admit_or_queue(&self, resource_class: &str) -> Result<Admission, QueueError> {
        let mut classes = self.inner.lock();
        let state = classes
            .get_mut(resource_class)
            .ok_or_else(|| QueueError::UnknownResourceClass(resource_class.to_string()))?;

        if state.limit.admits(state.active) && state.waiting.is_empty() {
            state.active += 1;
            return Ok(Admission::Immediate);
        }

        if let Some(max) = self.inner.max_waiting {
            if state.waiting.len() >= max {
                tracing::warn!(resource_class, depth = max, "Wait queue full, rejecting job");
                return Err(QueueError::QueueFull {
                    resource_class: resource_class.to_string(),
                    depth: max,
                });
            }
        }

        let ticket = self.inner.next_ticket.fetch_add(1, Ordering::Relaxed);
        let (wake, rx) = oneshot::channel();
        state.waiting.push_back(Waiter { ticket, wake });
        Ok(Admission::Queued { ticket, rx })
    }
}

impl Default for QueueManager {
    fn default() -> Self {
        Self::new(QueueConfig::default())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    fn queue(limit: usize) -> QueueManager {
        QueueManager::new(
            QueueConfig::new().with_class("fast", ConcurrencyLimit::bounded(limit).unwrap()),
        )
    }

    #[tokio::test]
    async fn enqueue_returns_unit_outcome() {
        let q = queue(1);
        let ok: Result<u32, String> = q.enqueue("fast", || async { Ok(7) }).await.unwrap();
        assert_eq!(ok, Ok(7));

        let err: Result<u32, String> = q
            .enqueue("fast", || async { Err("boom".to_string()) })
            .await
            .unwrap();
        assert_eq!(err, Err("boom".to_string()));
        assert!(q.is_idle());
    }

    #[tokio::test]
    async fn unknown_class_rejected() {
        let q = queue(1);
        let result = q.enqueue("slow", || async {}).await;
        assert_matches!(result, Err(QueueError::UnknownResourceClass(name)) if name == "slow");
    }

    #[tokio::test]
    async fn unbounded_class_never_waits() {
        let q = QueueManager::new(QueueConfig::new().with_class("local", ConcurrencyLimit::Unbounded));
        let (tx, rx) = tokio::sync::oneshot::channel::<()>();
        let blocker = tokio::spawn({
            let q = q.clone();
            async move { q.enqueue("local", move || async move { rx.await.ok() }).await }
        });
        tokio::task::yield_now().await;

        // Second job runs to completion while the first is still holding a slot.
        q.enqueue("local", || async {}).await.unwrap();
        let status = q.class_status("local").unwrap();
        assert_eq!(status.active, 1);
        assert_eq!(status.waiting, 0);
        assert_eq!(status.max_concurrency, None);

        tx.send(()).unwrap();
        blocker.await.unwrap().unwrap();
        assert!(q.is_idle());
    }

    #[tokio::test]
    async fn registering_class_at_runtime() {
        let q = QueueManager::default();
        assert!(q.queue_status().is_empty());
        q.register_class("pro", ConcurrencyLimit::bounded(2).unwrap());
        assert_eq!(q.class_status("pro").unwrap().max_concurrency, Some(2));
        assert_eq!(q.enqueue("pro", || async { 1 }).await.unwrap(), 1);
    }
}
