//! Fixed-size worker pool with a FIFO backlog.
//!
//! The queue is the only way work enters the pool. Tasks wait in the backlog
//! until a worker asks for one; the oldest pending task always goes first.
//! Shutdown is cooperative: workers finish what they are running, the backlog
//! is discarded, and workers that do not stop in time are detached.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::sync::{mpsc, Notify};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::locks::PathLocks;
use crate::task::{EventSender, Task, TaskEvent, TaskEventKind, TaskEvents, TaskId, WorkerId};
use crate::worker::{Worker, WorkerState};

/// Misuse of the queue's contract
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum QueueError {
    #[error("task queue has already been started")]
    AlreadyStarted,
    #[error("task queue has been stopped")]
    Stopped,
    #[error("task backlog is full ({limit} pending tasks)")]
    BacklogFull { limit: usize },
}

/// Pool sizing
#[derive(Debug, Clone)]
pub struct QueueConfig {
    pub worker_count: usize,
    /// `None` keeps the backlog unbounded
    pub max_backlog: Option<usize>,
}

impl QueueConfig {
    pub fn with_workers(worker_count: usize) -> Self {
        Self {
            worker_count,
            max_backlog: None,
        }
    }
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self::with_workers(Config::default_worker_count())
    }
}

impl From<&Config> for QueueConfig {
    fn from(config: &Config) -> Self {
        Self {
            worker_count: config.worker_count,
            max_backlog: config.max_backlog,
        }
    }
}

/// What `fullstop` did
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Tasks dropped from the backlog without being started
    pub discarded: Vec<TaskId>,
    /// Workers that exited within the timeout
    pub stopped_workers: usize,
    /// Workers still running a task when the timeout elapsed
    pub detached: Vec<(WorkerId, String)>,
}

/// A task waiting for, or held by, a worker
pub(crate) struct Queued {
    pub id: TaskId,
    pub description: String,
    pub task: Box<dyn Task>,
    pub cancel: CancellationToken,
}

struct Busy {
    task: TaskId,
    description: String,
    cancel: CancellationToken,
}

/// State shared between the queue handle and its workers
pub(crate) struct Shared {
    backlog: Mutex<VecDeque<Queued>>,
    busy: Mutex<HashMap<WorkerId, Busy>>,
    states: Mutex<Vec<WorkerState>>,
    wakeup: Notify,
    shutdown: CancellationToken,
    events: EventSender,
    locks: Arc<PathLocks>,
}

/// No code panics while holding these locks, so poisoning is ignored
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Shared {
    pub(crate) fn emit(&self, task: TaskId, kind: TaskEventKind) {
        let _ = self.events.send(TaskEvent { task, kind });
    }

    pub(crate) fn events(&self) -> EventSender {
        self.events.clone()
    }

    pub(crate) fn locks(&self) -> Arc<PathLocks> {
        self.locks.clone()
    }

    pub(crate) fn is_shutting_down(&self) -> bool {
        self.shutdown.is_cancelled()
    }

    pub(crate) fn set_state(&self, worker: WorkerId, state: WorkerState) {
        if let Some(slot) = lock(&self.states).get_mut(worker) {
            *slot = state;
        }
    }

    /// Wait for the oldest pending task, or `None` once shutdown starts
    ///
    /// The popped task is registered as the worker's current task before the
    /// backlog lock is released, so `cancel` always finds it in one place or
    /// the other.
    pub(crate) async fn next_task(&self, worker: WorkerId) -> Option<Queued> {
        loop {
            if self.shutdown.is_cancelled() {
                return None;
            }

            let notified = self.wakeup.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut backlog = lock(&self.backlog);
                if let Some(queued) = backlog.pop_front() {
                    lock(&self.busy).insert(
                        worker,
                        Busy {
                            task: queued.id,
                            description: queued.description.clone(),
                            cancel: queued.cancel.clone(),
                        },
                    );
                    self.set_state(worker, WorkerState::Running);
                    return Some(queued);
                }
            }

            tokio::select! {
                _ = &mut notified => {}
                _ = self.shutdown.cancelled() => return None,
            }
        }
    }

    pub(crate) fn release(&self, worker: WorkerId) {
        lock(&self.busy).remove(&worker);
        let state = if self.shutdown.is_cancelled() {
            WorkerState::Stopping
        } else {
            WorkerState::Idle
        };
        self.set_state(worker, state);
    }
}

/// Handle to the worker pool
///
/// Appending is allowed before `start`; tasks simply wait in the backlog.
pub struct TaskQueue {
    shared: Arc<Shared>,
    worker_count: usize,
    max_backlog: Option<usize>,
    handles: Mutex<Vec<(WorkerId, JoinHandle<()>)>>,
    started: AtomicBool,
    stopped: AtomicBool,
}

impl TaskQueue {
    /// Create the queue and the channel its events are delivered on
    pub fn new(config: QueueConfig) -> (Self, TaskEvents) {
        let (events, receiver) = mpsc::unbounded_channel();
        let worker_count = config.worker_count.max(1);

        let shared = Arc::new(Shared {
            backlog: Mutex::new(VecDeque::new()),
            busy: Mutex::new(HashMap::new()),
            states: Mutex::new(vec![WorkerState::Idle; worker_count]),
            wakeup: Notify::new(),
            shutdown: CancellationToken::new(),
            events,
            locks: Arc::new(PathLocks::new()),
        });

        let queue = Self {
            shared,
            worker_count,
            max_backlog: config.max_backlog,
            handles: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
            stopped: AtomicBool::new(false),
        };
        (queue, receiver)
    }

    /// Spawn the workers; must be called from within a tokio runtime
    pub fn start(&self) -> Result<(), QueueError> {
        if self.stopped.load(Ordering::SeqCst) {
            return Err(QueueError::Stopped);
        }
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(QueueError::AlreadyStarted);
        }

        let mut handles = lock(&self.handles);
        for id in 0..self.worker_count {
            let worker = Worker::new(id, self.shared.clone());
            handles.push((id, tokio::spawn(worker.run())));
        }
        info!("🚀 Started task queue with {} workers", self.worker_count);
        Ok(())
    }

    /// Hand a task to the pool; it will be run by exactly one worker
    pub fn append<T: Task>(&self, task: T) -> Result<TaskId, QueueError> {
        self.append_boxed(Box::new(task))
    }

    pub fn append_boxed(&self, task: Box<dyn Task>) -> Result<TaskId, QueueError> {
        let id = TaskId::new();
        let description = task.describe();
        {
            // fullstop flips `stopped` and drains under this same lock
            let mut backlog = lock(&self.shared.backlog);
            if self.stopped.load(Ordering::SeqCst) {
                return Err(QueueError::Stopped);
            }
            if let Some(limit) = self.max_backlog {
                if backlog.len() >= limit {
                    return Err(QueueError::BacklogFull { limit });
                }
            }
            // Queued goes out before any worker can see the task
            self.shared.emit(
                id,
                TaskEventKind::Queued {
                    description: description.clone(),
                },
            );
            backlog.push_back(Queued {
                id,
                description: description.clone(),
                task,
                cancel: CancellationToken::new(),
            });
        }

        debug!("➕ Queued task {}: {}", id, description);
        self.shared.wakeup.notify_one();
        Ok(id)
    }

    /// Snapshot of busy workers and the task each one is running
    pub fn get_busy_threads(&self) -> HashMap<WorkerId, String> {
        lock(&self.shared.busy)
            .iter()
            .map(|(worker, busy)| (*worker, busy.description.clone()))
            .collect()
    }

    /// The worker currently running `task`, if any
    pub fn thread_with_task(&self, task: TaskId) -> Option<WorkerId> {
        lock(&self.shared.busy)
            .iter()
            .find(|(_, busy)| busy.task == task)
            .map(|(worker, _)| *worker)
    }

    /// Cancel one task
    ///
    /// A pending task is taken out of the backlog and reported `Cancelled`
    /// right away. A running task gets its cancellation token triggered and is
    /// reported when it returns. Returns `false` for unknown or finished tasks.
    pub fn cancel(&self, task: TaskId) -> bool {
        let mut backlog = lock(&self.shared.backlog);
        if let Some(pos) = backlog.iter().position(|q| q.id == task) {
            backlog.remove(pos);
            self.shared.emit(task, TaskEventKind::Cancelled);
            debug!("Cancelled pending task {}", task);
            return true;
        }

        let busy = lock(&self.shared.busy);
        match busy.values().find(|b| b.task == task) {
            Some(running) => {
                running.cancel.cancel();
                debug!("Requested cancellation of running task {}", task);
                true
            }
            None => false,
        }
    }

    /// Number of tasks waiting for a worker
    pub fn backlog_len(&self) -> usize {
        lock(&self.shared.backlog).len()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    pub fn worker_states(&self) -> Vec<WorkerState> {
        lock(&self.shared.states).clone()
    }

    /// The advisory lock registry shared with every task
    pub fn path_locks(&self) -> Arc<PathLocks> {
        self.shared.locks()
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::SeqCst)
    }

    /// Stop the pool
    ///
    /// No new task starts after this is called. Pending tasks are reported
    /// `Discarded`. Running tasks are given up to `timeout` to finish; workers
    /// still busy after that are detached and listed in the report. Calling
    /// this a second time does nothing.
    pub async fn fullstop(&self, timeout: Duration) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let discarded: Vec<Queued> = {
            let mut backlog = lock(&self.shared.backlog);
            if self.stopped.swap(true, Ordering::SeqCst) {
                return report;
            }
            backlog.drain(..).collect()
        };

        self.shared.shutdown.cancel();
        {
            let states = lock(&self.shared.states).clone();
            for (worker, state) in states.into_iter().enumerate() {
                if state == WorkerState::Running {
                    self.shared.set_state(worker, WorkerState::Stopping);
                }
            }
        }

        for queued in discarded {
            debug!("Discarding unstarted task {}: {}", queued.id, queued.description);
            self.shared.emit(queued.id, TaskEventKind::Discarded);
            report.discarded.push(queued.id);
        }

        let handles: Vec<_> = lock(&self.handles).drain(..).collect();
        let deadline = tokio::time::Instant::now() + timeout;
        for (worker, mut handle) in handles {
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(_) => report.stopped_workers += 1,
                Err(_) => {
                    let description = lock(&self.shared.busy)
                        .get(&worker)
                        .map(|b| b.description.clone())
                        .unwrap_or_default();
                    warn!(
                        "Worker {} did not stop in time, detaching it: {}",
                        worker, description
                    );
                    report.detached.push((worker, description));
                }
            }
        }

        info!(
            "🛑 Task queue stopped: {} workers stopped, {} detached, {} tasks discarded",
            report.stopped_workers,
            report.detached.len(),
            report.discarded.len()
        );
        report
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        // Let idle workers exit if the owner never called fullstop
        self.shared.shutdown.cancel();
    }
}
