//! Long-lived pool workers.
//!
//! Each worker pulls tasks from the shared backlog one at a time. A task's
//! `run` is spawned on its own tokio task so that a panic is contained there
//! and reported as an error event; the worker itself keeps going.

use std::any::Any;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::queue::{Queued, Shared};
use crate::task::{Cancelled, TaskContext, TaskEventKind, WorkerId};

/// Lifecycle of a worker
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// Waiting for work
    Idle,
    Running,
    /// Its last task failed; back to `Idle` once the failure is reported
    Faulted,
    /// Shutdown requested, finishing the current task
    Stopping,
    Terminated,
}

pub(crate) struct Worker {
    id: WorkerId,
    shared: Arc<Shared>,
}

impl Worker {
    pub(crate) fn new(id: WorkerId, shared: Arc<Shared>) -> Self {
        Self { id, shared }
    }

    pub(crate) async fn run(self) {
        debug!("Worker {} started", self.id);

        while let Some(queued) = self.shared.next_task(self.id).await {
            self.execute(queued).await;
        }

        self.shared.set_state(self.id, WorkerState::Terminated);
        debug!("Worker {} terminated", self.id);
    }

    async fn execute(&self, queued: Queued) {
        let Queued {
            id,
            description,
            task,
            cancel,
        } = queued;

        self.shared
            .emit(id, TaskEventKind::Started { worker: self.id });
        info!("⚙️ Worker {} running task {}: {}", self.id, id, description);

        let ctx = TaskContext::new(
            id,
            self.shared.events(),
            cancel.clone(),
            self.shared.locks(),
        );
        let outcome = tokio::spawn(async move { task.run(&ctx).await }).await;

        let kind = match outcome {
            Ok(Ok(output)) => {
                info!("✅ Task {} finished: {}", id, description);
                TaskEventKind::Finished(output)
            }
            Ok(Err(e)) if cancel.is_cancelled() || is_cancellation(&e) => {
                info!("Task {} cancelled: {}", id, description);
                TaskEventKind::Cancelled
            }
            Ok(Err(e)) => {
                self.shared.set_state(self.id, WorkerState::Faulted);
                error!("Task {} failed: {}: {:#}", id, description, e);
                TaskEventKind::Error(format!("{:#}", e))
            }
            Err(join) if join.is_panic() => {
                self.shared.set_state(self.id, WorkerState::Faulted);
                let reason = panic_message(join.into_panic());
                error!("Task {} panicked: {}: {}", id, description, reason);
                TaskEventKind::Error(format!("task panicked: {}", reason))
            }
            Err(join) => {
                warn!("Task {} was aborted: {}", id, join);
                TaskEventKind::Cancelled
            }
        };

        // Free the slot before reporting so observers never see a finished
        // task still attached to a worker
        self.shared.release(self.id);
        self.shared.emit(id, kind);

        if self.shared.is_shutting_down() {
            debug!("Worker {} stopping after task {}", self.id, id);
        }
    }
}

fn is_cancellation(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| cause.is::<Cancelled>())
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
