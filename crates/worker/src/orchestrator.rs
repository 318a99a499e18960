//! Composition of queue, poller registry, event bus and stream client.
//!
//! A submission runs task creation inside a resource-class slot, so the
//! slot is held only while the upstream accepts the task. Tracking then
//! continues outside the queue through the poller registry, whose
//! observers translate task snapshots into [`TaskEvent`]s.

use std::collections::BTreeMap;
use std::sync::Arc;

use flowgen_core::types::TASK_LOST_MESSAGE;
use flowgen_core::{SessionId, Task, TaskId, TaskKind};
use flowgen_events::{
    DispatchError, SessionDispatcher, SubscriberId, TaskEvent, TaskEventBus, TaskEventKind,
};
use flowgen_poller::{
    PollOutcome, PollerRegistry, RegistryError, TaskApi, TaskApiError, TaskObserver, TaskPoller,
};
use flowgen_queue::{ClassStatus, QueueError, QueueManager};
use flowgen_stream::{SessionUpdate, StreamClient, StreamError, StreamSession};
use tokio::sync::{broadcast, mpsc};
use tokio_util::sync::CancellationToken;

use crate::config::WorkerConfig;

#[derive(Debug, thiserror::Error)]
pub enum OrchestratorError {
    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Api(#[from] TaskApiError),

    #[error(transparent)]
    Registry(#[from] RegistryError),
}

// ---------------------------------------------------------------------------
// BusObserver
// ---------------------------------------------------------------------------

/// Publishes one task's snapshots on the event bus.
struct BusObserver {
    task_id: TaskId,
    kind: TaskKind,
    bus: Arc<TaskEventBus>,
}

impl BusObserver {
    fn publish(&self, event: TaskEventKind) {
        self.bus
            .publish(TaskEvent::new(self.task_id.clone(), self.kind, event));
    }
}

impl TaskObserver for BusObserver {
    fn on_update(&self, task: &Task) {
        // Terminal snapshots are reported by on_finish.
        if !task.is_terminal() {
            self.publish(TaskEventKind::Progress {
                status: task.status,
                progress: task.progress,
            });
        }
    }

    fn on_finish(&self, outcome: &PollOutcome) {
        let event = match outcome {
            PollOutcome::Completed(result) => TaskEventKind::Completed {
                result: result.clone(),
            },
            PollOutcome::Failed(error) => TaskEventKind::Failed {
                error: error.clone(),
            },
            PollOutcome::Lost => TaskEventKind::Lost {
                error: TASK_LOST_MESSAGE.to_string(),
            },
            PollOutcome::Cancelled => TaskEventKind::Cancelled,
        };
        self.publish(event);
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Single entry point for submitting, tracking and streaming generation work.
pub struct Orchestrator {
    api: TaskApi,
    queue: QueueManager,
    pollers: PollerRegistry,
    events: Arc<TaskEventBus>,
    streams: StreamClient,
    sessions: Arc<SessionDispatcher<SessionUpdate>>,
}

impl Orchestrator {
    pub fn new(config: WorkerConfig) -> Self {
        // One connection pool for every backend call.
        let http = reqwest::Client::new();
        let api = TaskApi::with_client(http.clone(), &config.api_url);

        let mut streams = StreamClient::with_client(http, &config.api_url, &config.stream_path);
        if let Some(abort_path) = &config.stream_abort_path {
            streams = streams.with_abort_path(abort_path);
        }

        let poller = TaskPoller::new(Arc::new(api.clone()), config.poll_intervals);

        Self {
            api,
            queue: QueueManager::new(config.queue),
            pollers: PollerRegistry::new(poller),
            events: Arc::new(TaskEventBus::default()),
            streams,
            sessions: Arc::new(SessionDispatcher::new()),
        }
    }

    /// Create a task inside a `resource_class` slot, then start tracking it.
    ///
    /// Waits for a slot when the class is saturated. Lifecycle events for
    /// the new task are published on [`subscribe`](Self::subscribe).
    pub async fn submit(
        &self,
        resource_class: &str,
        kind: TaskKind,
        input: serde_json::Value,
    ) -> Result<TaskId, OrchestratorError> {
        let api = self.api.clone();
        let task_id = self
            .queue
            .enqueue(resource_class, move || async move {
                api.create_task(kind, &input).await
            })
            .await??;

        self.events.publish(TaskEvent::new(
            task_id.clone(),
            kind,
            TaskEventKind::Submitted {
                resource_class: resource_class.to_string(),
            },
        ));
        self.watch(task_id.clone(), kind)?;
        Ok(task_id)
    }

    /// Start tracking a task that was created elsewhere.
    pub fn watch(&self, task_id: TaskId, kind: TaskKind) -> Result<(), RegistryError> {
        let observer = BusObserver {
            task_id: task_id.clone(),
            kind,
            bus: Arc::clone(&self.events),
        };
        self.pollers.watch(task_id, kind, observer)
    }

    /// Stop tracking locally. Publishes `Cancelled`; the upstream task
    /// keeps running. Returns `false` if the task was not tracked or has
    /// already reported its final outcome.
    pub fn unwatch(&self, task_id: &TaskId) -> bool {
        let Some(kind) = self.pollers.cancel(task_id) else {
            return false;
        };
        self.events
            .publish(TaskEvent::new(task_id.clone(), kind, TaskEventKind::Cancelled));
        true
    }

    /// Stop tracking and ask the upstream to stop the task.
    ///
    /// Returns `Ok(false)` if the task was not tracked, in which case the
    /// upstream is not contacted.
    pub async fn cancel(&self, task_id: &TaskId) -> Result<bool, TaskApiError> {
        if !self.unwatch(task_id) {
            return Ok(false);
        }
        self.api.cancel_task(task_id).await?;
        tracing::info!(%task_id, "Task cancelled upstream");
        Ok(true)
    }

    /// Receive every task lifecycle event from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEvent> {
        self.events.subscribe()
    }

    pub fn queue_status(&self) -> BTreeMap<String, ClassStatus> {
        self.queue.queue_status()
    }

    pub fn is_tracking(&self, task_id: &TaskId) -> bool {
        self.pollers.is_polling(task_id)
    }

    pub fn tracked_count(&self) -> usize {
        self.pollers.active_count()
    }

    /// Open a stream session and subscribe to it before it starts.
    pub async fn subscribe_session(
        &self,
        session_id: &SessionId,
    ) -> Result<(SubscriberId, mpsc::UnboundedReceiver<SessionUpdate>), DispatchError> {
        self.sessions.open(session_id).await;
        self.sessions.subscribe(session_id).await
    }

    pub async fn unsubscribe_session(&self, session_id: &SessionId, subscriber: SubscriberId) -> bool {
        self.sessions.unsubscribe(session_id, subscriber).await
    }

    /// Run one streaming request, forwarding updates to the session's
    /// subscribers. Cancelling `cancel` aborts the stream.
    pub async fn stream(
        &self,
        session_id: SessionId,
        request: &serde_json::Value,
        cancel: &CancellationToken,
    ) -> Result<StreamSession, StreamError> {
        self.streams
            .run(session_id, request, &self.sessions, cancel)
            .await
    }

    /// Stop every poller and end every stream session.
    pub async fn shutdown(&self) {
        tracing::info!("Shutting down orchestrator");
        self.pollers.shutdown().await;
        self.sessions.close_all().await;
        tracing::info!("Orchestrator shut down complete");
    }
}
