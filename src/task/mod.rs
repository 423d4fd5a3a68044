//! The unit of work run by the queue and the events it reports.
//!
//! A [`Task`] never touches caller-owned state. Intermediate notifications
//! (progress, messages, discovered builds) go through the [`TaskContext`] it
//! is handed, which forwards [`TaskEvent`]s onto an unbounded channel drained
//! by whoever owns the queue. The final output is returned from `run` and
//! sent on the same channel by the worker.

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::library::BuildInfo;
use crate::locks::PathLocks;

/// Identity of one appended task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TaskId(Uuid);

impl TaskId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form is enough for logs
        write!(f, "{}", &self.0.simple().to_string()[..8])
    }
}

/// Index of a worker in the pool
pub type WorkerId = usize;

/// Severity attached to a task message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
    Error,
}

/// Lifecycle of a task as seen from the outside
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Pending,
    Running,
    Finished,
    Failed,
    Cancelled,
    Discarded,
}

/// Payload carried by a task's `Finished` event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TaskOutput {
    Unit,
    Path(PathBuf),
    Removal(RemovalStatus),
}

/// Outcome code reported by removal tasks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RemovalStatus {
    Removed,
    Failed,
}

/// One notification about a task
#[derive(Debug, Clone)]
pub struct TaskEvent {
    pub task: TaskId,
    pub kind: TaskEventKind,
}

#[derive(Debug, Clone)]
pub enum TaskEventKind {
    /// Accepted into the backlog
    Queued { description: String },
    Started { worker: WorkerId },
    Progress { current: u64, total: u64 },
    Message { text: String, severity: Severity },
    /// A recognized build directory
    Found(PathBuf),
    /// A directory that does not look like a build
    Unrecognized(PathBuf),
    /// A remote build discovered by a scrape
    Link(BuildInfo),
    /// Domain-level failure signal, sent before the error itself
    Failure,
    Finished(TaskOutput),
    Error(String),
    Cancelled,
    /// Never started; dropped from the backlog at shutdown
    Discarded,
}

impl TaskEventKind {
    /// Whether this is the last event a task will ever produce
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Finished(_) | Self::Error(_) | Self::Cancelled | Self::Discarded
        )
    }

    /// The task state this event moves the task into, if any
    pub fn state(&self) -> Option<TaskState> {
        match self {
            Self::Queued { .. } => Some(TaskState::Pending),
            Self::Started { .. } => Some(TaskState::Running),
            Self::Finished(_) => Some(TaskState::Finished),
            Self::Error(_) => Some(TaskState::Failed),
            Self::Cancelled => Some(TaskState::Cancelled),
            Self::Discarded => Some(TaskState::Discarded),
            _ => None,
        }
    }
}

/// Receiving end of the event channel, owned by the caller of the queue
pub type TaskEvents = mpsc::UnboundedReceiver<TaskEvent>;

/// Sending end shared by the queue, its workers and running tasks
pub type EventSender = mpsc::UnboundedSender<TaskEvent>;

/// A deferred unit of work
///
/// Inputs are bound at construction; `run` only borrows the task, so they
/// cannot change once it has been appended.
#[async_trait]
pub trait Task: Send + Sync + 'static {
    /// Stable label used in logs and "still running" prompts
    fn describe(&self) -> String;

    /// Do the work, reporting intermediate events through `ctx`
    ///
    /// The worker turns `Ok` into [`TaskEventKind::Finished`] and `Err` into
    /// [`TaskEventKind::Error`], so every started task ends with exactly one
    /// terminal event.
    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput>;
}

/// Everything a running task may use to talk to the outside world
#[derive(Clone)]
pub struct TaskContext {
    id: TaskId,
    events: EventSender,
    cancel: CancellationToken,
    locks: Arc<PathLocks>,
}

impl TaskContext {
    pub fn new(
        id: TaskId,
        events: EventSender,
        cancel: CancellationToken,
        locks: Arc<PathLocks>,
    ) -> Self {
        Self {
            id,
            events,
            cancel,
            locks,
        }
    }

    /// A context that is not attached to any queue, for running a task inline
    pub fn detached(events: EventSender) -> Self {
        Self::new(
            TaskId::new(),
            events,
            CancellationToken::new(),
            Arc::new(PathLocks::new()),
        )
    }

    pub fn id(&self) -> TaskId {
        self.id
    }

    pub fn locks(&self) -> &PathLocks {
        &self.locks
    }

    pub fn cancel_token(&self) -> &CancellationToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Bail out of a long loop if the task has been cancelled
    pub fn check_cancelled(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(anyhow!(Cancelled))
        } else {
            Ok(())
        }
    }

    pub fn emit(&self, kind: TaskEventKind) {
        // The receiver going away only means nobody is listening anymore
        let _ = self.events.send(TaskEvent {
            task: self.id,
            kind,
        });
    }

    pub fn progress(&self, current: u64, total: u64) {
        self.emit(TaskEventKind::Progress { current, total });
    }

    pub fn message(&self, text: impl Into<String>, severity: Severity) {
        self.emit(TaskEventKind::Message {
            text: text.into(),
            severity,
        });
    }

    pub fn found(&self, path: &Path) {
        self.emit(TaskEventKind::Found(path.to_path_buf()));
    }

    pub fn unrecognized(&self, path: &Path) {
        self.emit(TaskEventKind::Unrecognized(path.to_path_buf()));
    }

    pub fn link(&self, build: BuildInfo) {
        self.emit(TaskEventKind::Link(build));
    }

    pub fn failure(&self) {
        self.emit(TaskEventKind::Failure);
    }
}

/// Error returned by a task that noticed its cancellation token
#[derive(Debug, Clone, Copy, thiserror::Error)]
#[error("task was cancelled")]
pub struct Cancelled;
