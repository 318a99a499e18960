//! Cancellable per-task polling loop.
//!
//! A poller is either *active* (ticking) or *stopped*. It stops when:
//!
//! 1. the status endpoint reports `completed` or `failed`. The final
//!    task is delivered to the observer once, then the loop exits.
//! 2. the status endpoint reports the task as not found. The task is
//!    marked lost and delivered once.
//! 3. the owner cancels. The loop exits without notifying anyone.
//!
//! Any other fetch error is logged and retried on the next tick, with
//! the interval unchanged. The first request goes out immediately.

use std::sync::Arc;
use std::time::Duration;

use flowgen_core::{PollIntervals, Task, TaskId, TaskKind, TaskStatus};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;

use crate::source::TaskStatusSource;

/// Receives every task snapshot produced by a poller.
pub trait TaskObserver: Send + Sync + 'static {
    fn on_update(&self, task: &Task);

    /// Called once when the loop stops on its own (terminal status or
    /// lost task), after the final [`on_update`](Self::on_update).
    /// Never called on cancellation.
    fn on_finish(&self, _outcome: &PollOutcome) {}
}

impl<F> TaskObserver for F
where
    F: Fn(&Task) + Send + Sync + 'static,
{
    fn on_update(&self, task: &Task) {
        self(task)
    }
}

/// How a polling loop ended.
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome {
    /// The task completed, carrying the provider result if any.
    Completed(Option<serde_json::Value>),
    /// The provider reported failure; the message is surfaced verbatim.
    Failed(String),
    /// The backend no longer knows the task.
    Lost,
    /// The owner stopped polling.
    Cancelled,
}

impl PollOutcome {
    fn from_terminal(task: &Task) -> Self {
        match task.status {
            TaskStatus::Completed => PollOutcome::Completed(task.result.clone()),
            _ => PollOutcome::Failed(task.error.clone().unwrap_or_default()),
        }
    }
}

// ---------------------------------------------------------------------------
// PollHandle
// ---------------------------------------------------------------------------

/// Handle to a spawned polling loop.
///
/// Dropping the handle cancels the loop, so a poller never outlives the
/// context that started it.
pub struct PollHandle {
    task_id: TaskId,
    cancel: CancellationToken,
    join: Option<JoinHandle<PollOutcome>>,
}

impl PollHandle {
    pub fn task_id(&self) -> &TaskId {
        &self.task_id
    }

    /// Stop polling. Takes effect before the next request is issued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Whether the loop has exited.
    pub fn is_finished(&self) -> bool {
        self.join.as_ref().map_or(true, JoinHandle::is_finished)
    }

    /// Wait for the loop to exit and return how it ended.
    pub async fn wait(mut self) -> PollOutcome {
        let Some(join) = self.join.take() else {
            return PollOutcome::Cancelled;
        };
        match join.await {
            Ok(outcome) => outcome,
            Err(e) if e.is_cancelled() => PollOutcome::Cancelled,
            Err(e) => {
                tracing::error!(task_id = %self.task_id, error = %e, "Poller task panicked");
                PollOutcome::Failed(format!("Poller crashed: {e}"))
            }
        }
    }
}

impl Drop for PollHandle {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

// ---------------------------------------------------------------------------
// TaskPoller
// ---------------------------------------------------------------------------

/// Starts polling loops against one status source.
#[derive(Clone)]
pub struct TaskPoller {
    source: Arc<dyn TaskStatusSource>,
    intervals: PollIntervals,
}

impl TaskPoller {
    pub fn new(source: Arc<dyn TaskStatusSource>, intervals: PollIntervals) -> Self {
        Self { source, intervals }
    }

    /// Interval that will be used for a task of `kind`.
    pub fn interval_for(&self, kind: TaskKind) -> Duration {
        self.intervals.for_kind(kind)
    }

    /// A fresh `Pending` task with the interval for its kind.
    pub fn new_task(&self, task_id: TaskId, kind: TaskKind) -> Task {
        let interval_ms = u64::try_from(self.interval_for(kind).as_millis()).unwrap_or(u64::MAX);
        Task::new(task_id, kind, interval_ms)
    }

    /// Spawn a polling loop for `task_id` on the current runtime.
    pub fn spawn(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        observer: impl TaskObserver,
    ) -> PollHandle {
        self.spawn_with_token(task_id, kind, observer, CancellationToken::new())
    }

    /// Like [`spawn`](Self::spawn), stopping when `cancel` fires.
    pub fn spawn_with_token(
        &self,
        task_id: TaskId,
        kind: TaskKind,
        observer: impl TaskObserver,
        cancel: CancellationToken,
    ) -> PollHandle {
        let task = self.new_task(task_id.clone(), kind);
        let poller = self.clone();
        let loop_cancel = cancel.clone();
        let join = tokio::spawn(async move { poller.poll(task, &observer, &loop_cancel).await });

        PollHandle {
            task_id,
            cancel,
            join: Some(join),
        }
    }

    /// Poll `task` in the current task until it stops.
    pub async fn poll(
        &self,
        mut task: Task,
        observer: &dyn TaskObserver,
        cancel: &CancellationToken,
    ) -> PollOutcome {
        if task.is_terminal() {
            return PollOutcome::from_terminal(&task);
        }

        let period = Duration::from_millis(task.interval_ms.max(1));
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            task_id = %task.task_id,
            kind = %task.kind,
            interval_ms = task.interval_ms,
            "Polling started",
        );

        loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return stopped(&task),
                _ = ticker.tick() => {}
            }

            let fetched = tokio::select! {
                biased;
                _ = cancel.cancelled() => return stopped(&task),
                result = self.source.fetch_status(&task.task_id) => result,
            };

            match fetched {
                Ok(report) => {
                    if !task.apply_report(report) {
                        return PollOutcome::from_terminal(&task);
                    }
                    observer.on_update(&task);
                    if task.is_terminal() {
                        tracing::info!(
                            task_id = %task.task_id,
                            status = ?task.status,
                            error = task.error.as_deref(),
                            "Task reached terminal status",
                        );
                        let outcome = PollOutcome::from_terminal(&task);
                        observer.on_finish(&outcome);
                        return outcome;
                    }
                }
                Err(e) if e.is_not_found() => {
                    tracing::error!(
                        task_id = %task.task_id,
                        error = %e,
                        "Task missing from backend, stopping poller",
                    );
                    task.mark_lost();
                    observer.on_update(&task);
                    observer.on_finish(&PollOutcome::Lost);
                    return PollOutcome::Lost;
                }
                Err(e) => {
                    tracing::warn!(
                        task_id = %task.task_id,
                        error = %e,
                        "Status poll failed, retrying on next tick",
                    );
                }
            }
        }
    }
}

fn stopped(task: &Task) -> PollOutcome {
    tracing::info!(task_id = %task.task_id, "Polling cancelled");
    PollOutcome::Cancelled
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use flowgen_core::TaskStatusReport;

    use crate::error::TaskApiError;

    struct AlwaysDone;

    #[async_trait]
    impl TaskStatusSource for AlwaysDone {
        async fn fetch_status(&self, _: &TaskId) -> Result<TaskStatusReport, TaskApiError> {
            Ok(TaskStatusReport::new(TaskStatus::Completed))
        }
    }

    #[test]
    fn new_task_uses_kind_interval() {
        let poller = TaskPoller::new(Arc::new(AlwaysDone), PollIntervals::default());
        let task = poller.new_task("t".into(), TaskKind::Video);
        assert_eq!(task.interval_ms, 10_000);
        assert_eq!(task.status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn already_terminal_task_is_never_polled() {
        let poller = TaskPoller::new(Arc::new(AlwaysDone), PollIntervals::default());
        let mut task = poller.new_task("t".into(), TaskKind::Image);
        task.mark_lost();
        let updates = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let observer = {
            let updates = Arc::clone(&updates);
            move |_: &Task| {
                updates.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
        };
        let outcome = poller.poll(task, &observer, &CancellationToken::new()).await;
        assert!(matches!(outcome, PollOutcome::Failed(_)));
        assert_eq!(updates.load(std::sync::atomic::Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn dropping_handle_cancels_loop() {
        let poller = TaskPoller::new(Arc::new(AlwaysDone), PollIntervals::default());
        let token = CancellationToken::new();
        let handle = poller.spawn_with_token("t".into(), TaskKind::Image, |_: &Task| {}, token.clone());
        drop(handle);
        assert!(token.is_cancelled());
    }
}
