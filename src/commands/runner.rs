use anyhow::{anyhow, Result};
use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::{HashMap, HashSet};
use std::path::PathBuf;
use std::time::Duration;
use tokio::signal;
use tracing::{debug, error, info, warn};

use crate::config::Config;
use crate::library::BuildInfo;
use crate::queue::{QueueConfig, TaskQueue};
use crate::task::{Severity, Task, TaskEventKind, TaskEvents, TaskId, TaskOutput};

/// How long running tasks get to wind down when a command exits
const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(10);

/// Everything a batch of tasks reported
#[derive(Debug, Default)]
pub struct Outcome {
    pub outputs: HashMap<TaskId, TaskOutput>,
    pub errors: Vec<(TaskId, String)>,
    pub cancelled: Vec<TaskId>,
    pub found: Vec<PathBuf>,
    pub unrecognized: Vec<PathBuf>,
    pub links: Vec<BuildInfo>,
}

impl Outcome {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty() && self.cancelled.is_empty()
    }

    /// Turn failed or cancelled tasks into a command error
    pub fn into_result(self, what: &str) -> Result<Self> {
        if !self.errors.is_empty() {
            return Err(anyhow!("{} {} task(s) failed", self.errors.len(), what));
        }
        if !self.cancelled.is_empty() {
            return Err(anyhow!("{} {} task(s) cancelled", self.cancelled.len(), what));
        }
        Ok(self)
    }
}

/// Run `tasks` on a fresh queue sized from `config` and wait for all of them
pub async fn run_tasks(config: &Config, tasks: Vec<Box<dyn Task>>) -> Result<Outcome> {
    let (queue, mut events) = TaskQueue::new(QueueConfig::from(config));

    let mut ids = Vec::with_capacity(tasks.len());
    for task in tasks {
        ids.push(queue.append_boxed(task)?);
    }
    queue.start()?;

    let outcome = drain(&mut events, &ids, &|id| {
        queue.cancel(id);
    })
    .await;

    let report = queue.fullstop(SHUTDOWN_TIMEOUT).await;
    for (worker, description) in &report.detached {
        warn!("Worker {} was still busy at exit: {}", worker, description);
    }
    outcome
}

/// Consume events until every task in `ids` has ended
///
/// Ctrl-C asks `cancel` to stop every task that has not ended yet; the
/// cancellations still arrive as events and are collected like any other.
pub async fn drain(
    events: &mut TaskEvents,
    ids: &[TaskId],
    cancel: &dyn Fn(TaskId),
) -> Result<Outcome> {
    let mut pending: HashSet<TaskId> = ids.iter().copied().collect();
    let mut outcome = Outcome::default();
    let bars = MultiProgress::new();
    let mut progress: HashMap<TaskId, ProgressBar> = HashMap::new();
    let mut descriptions: HashMap<TaskId, String> = HashMap::new();

    tokio::pin! {
        let interrupt = signal::ctrl_c();
    }
    let mut interrupted = false;

    while !pending.is_empty() {
        let event = tokio::select! {
            _ = &mut interrupt, if !interrupted => {
                interrupted = true;
                info!("🛑 Interrupted, cancelling {} task(s)", pending.len());
                for id in &pending {
                    cancel(*id);
                }
                continue;
            }
            event = events.recv() => event,
        };
        let Some(event) = event else {
            return Err(anyhow!("Event channel closed with {} task(s) outstanding", pending.len()));
        };

        let id = event.task;
        match event.kind {
            TaskEventKind::Queued { description } => {
                debug!("Queued {}: {}", id, description);
                descriptions.insert(id, description);
            }
            TaskEventKind::Started { worker } => {
                debug!("Task {} started on worker {}", id, worker);
            }
            TaskEventKind::Progress { current, total } => {
                if total == 0 {
                    continue;
                }
                let bar = progress.entry(id).or_insert_with(|| {
                    let bar = bars.add(ProgressBar::new(total));
                    bar.set_style(progress_style());
                    if let Some(description) = descriptions.get(&id) {
                        bar.set_message(description.clone());
                    }
                    bar
                });
                bar.set_length(total);
                bar.set_position(current);
            }
            TaskEventKind::Message { text, severity } => match severity {
                Severity::Info => info!("{}", text),
                Severity::Warning => warn!("⚠️ {}", text),
                Severity::Error => error!("{}", text),
            },
            TaskEventKind::Found(path) => outcome.found.push(path),
            TaskEventKind::Unrecognized(path) => outcome.unrecognized.push(path),
            TaskEventKind::Link(build) => outcome.links.push(build),
            TaskEventKind::Failure => debug!("Task {} reported a failure", id),
            TaskEventKind::Finished(output) => {
                finish_bar(&mut progress, id);
                outcome.outputs.insert(id, output);
                pending.remove(&id);
            }
            TaskEventKind::Error(message) => {
                finish_bar(&mut progress, id);
                error!("❌ {}", message);
                outcome.errors.push((id, message));
                pending.remove(&id);
            }
            TaskEventKind::Cancelled | TaskEventKind::Discarded => {
                finish_bar(&mut progress, id);
                outcome.cancelled.push(id);
                pending.remove(&id);
            }
        }
    }

    Ok(outcome)
}

fn progress_style() -> ProgressStyle {
    ProgressStyle::with_template("{msg} [{bar:30}] {bytes}/{total_bytes} ({eta})")
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("=> ")
}

fn finish_bar(progress: &mut HashMap<TaskId, ProgressBar>, id: TaskId) {
    if let Some(bar) = progress.remove(&id) {
        bar.finish_and_clear();
    }
}
