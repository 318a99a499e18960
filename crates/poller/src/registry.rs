//! Owner-scoped set of running pollers.
//!
//! The registry guarantees at most one polling loop per task id and
//! drops its bookkeeping as soon as a loop stops, whatever the reason.
//! Every loop hangs off a master [`CancellationToken`], so shutting the
//! registry down stops everything it started.
//!
//! A loop that ends on its own and a call to [`PollerRegistry::cancel`]
//! race for the same entry. Whichever removes it first decides the end:
//! either the observer's `on_finish` runs, or `cancel` returns the kind,
//! never both.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use flowgen_core::{Task, TaskId, TaskKind};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::poller::{PollOutcome, TaskObserver, TaskPoller};

/// How long [`PollerRegistry::shutdown`] waits for each loop to exit.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// A loop for this task is already running.
    #[error("Task {0} is already being polled")]
    AlreadyPolling(TaskId),

    /// The registry was shut down and accepts no new work.
    #[error("Poller registry is shut down")]
    ShutDown,
}

struct Entry {
    /// Distinguishes a loop from a later one started for the same id.
    generation: u64,
    kind: TaskKind,
    cancel: CancellationToken,
    handle: JoinHandle<PollOutcome>,
}

type Entries = Arc<Mutex<HashMap<TaskId, Entry>>>;

fn lock(entries: &Mutex<HashMap<TaskId, Entry>>) -> MutexGuard<'_, HashMap<TaskId, Entry>> {
    entries.lock().unwrap_or_else(|e| e.into_inner())
}

/// Tracks one polling loop per task for a single owner.
pub struct PollerRegistry {
    poller: TaskPoller,
    entries: Entries,
    next_generation: AtomicU64,
    /// Master cancellation token, cancelled during shutdown.
    cancel: CancellationToken,
}

impl PollerRegistry {
    pub fn new(poller: TaskPoller) -> Self {
        Self {
            poller,
            entries: Arc::new(Mutex::new(HashMap::new())),
            next_generation: AtomicU64::new(0),
            cancel: CancellationToken::new(),
        }
    }

    pub fn poller(&self) -> &TaskPoller {
        &self.poller
    }

    /// Start polling `task_id`. Fails if a loop for it is already running.
    ///
    /// The observer receives every snapshot, including the final one for
    /// a terminal or lost task. Cancellation is silent.
    pub fn watch(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        observer: impl TaskObserver,
    ) -> Result<(), RegistryError> {
        if self.cancel.is_cancelled() {
            return Err(RegistryError::ShutDown);
        }

        let mut entries = lock(&self.entries);
        if entries.contains_key(&task_id) {
            return Err(RegistryError::AlreadyPolling(task_id));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let cancel = self.cancel.child_token();
        let task = self.poller.new_task(task_id.clone(), kind);

        // The entry is inserted before the lock is released, so the loop
        // can never try to remove itself before it is registered.
        let handle = tokio::spawn({
            let poller = self.poller.clone();
            let entries = Arc::clone(&self.entries);
            let cancel = cancel.clone();
            let task_id = task_id.clone();
            async move {
                let observer = Settling {
                    inner: observer,
                    task_id: task_id.clone(),
                    generation,
                    entries: Arc::clone(&entries),
                };
                let outcome = poller.poll(task, &observer, &cancel).await;
                let mut entries = lock(&entries);
                if entries.get(&task_id).is_some_and(|e| e.generation == generation) {
                    entries.remove(&task_id);
                }
                outcome
            }
        });

        entries.insert(
            task_id,
            Entry {
                generation,
                kind,
                cancel,
                handle,
            },
        );
        Ok(())
    }

    /// Stop polling `task_id`, returning its kind, or `None` if it was
    /// not being polled or its loop already settled on a final outcome.
    pub fn cancel(&self, task_id: &TaskId) -> Option<TaskKind> {
        let entry = lock(&self.entries).remove(task_id)?;
        entry.cancel.cancel();
        tracing::debug!(%task_id, "Poller cancelled");
        Some(entry.kind)
    }

    /// Stop every loop without waiting for them.
    pub fn cancel_all(&self) {
        for (task_id, entry) in lock(&self.entries).drain() {
            entry.cancel.cancel();
            tracing::debug!(%task_id, "Poller cancelled");
        }
    }

    /// Whether a loop for `task_id` is running.
    pub fn is_polling(&self, task_id: &TaskId) -> bool {
        lock(&self.entries).contains_key(task_id)
    }

    /// Number of running loops.
    pub fn active_count(&self) -> usize {
        lock(&self.entries).len()
    }

    /// Cancel everything and wait for each loop to exit.
    ///
    /// After shutdown [`watch`](Self::watch) returns
    /// [`RegistryError::ShutDown`].
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down poller registry");
        self.cancel.cancel();

        let drained: Vec<_> = lock(&self.entries).drain().collect();
        for (task_id, entry) in drained {
            entry.cancel.cancel();
            if tokio::time::timeout(SHUTDOWN_GRACE, entry.handle).await.is_err() {
                tracing::warn!(%task_id, "Poller did not stop within grace period");
            }
        }

        tracing::info!("Poller registry shut down complete");
    }
}

impl Drop for PollerRegistry {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---- private helpers ----

/// Claims the registry entry before forwarding the final outcome, so a
/// concurrent cancel cannot report the same loop as cancelled.
struct Settling<O> {
    inner: O,
    task_id: TaskId,
    generation: u64,
    entries: Entries,
}

impl<O: TaskObserver> TaskObserver for Settling<O> {
    fn on_update(&self, task: &Task) {
        self.inner.on_update(task);
    }

    fn on_finish(&self, outcome: &PollOutcome) {
        let claimed = {
            let mut entries = lock(&self.entries);
            let owned = entries
                .get(&self.task_id)
                .is_some_and(|e| e.generation == self.generation);
            if owned {
                entries.remove(&self.task_id);
            }
            owned
        };

        if claimed {
            self.inner.on_finish(outcome);
        } else {
            tracing::debug!(
                task_id = %self.task_id,
                ?outcome,
                "Poller already cancelled, dropping final outcome",
            );
        }
    }
}
