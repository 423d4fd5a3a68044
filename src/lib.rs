pub mod commands;
pub mod config;
pub mod library;
pub mod locks;
pub mod net;
pub mod queue;
pub mod scrape;
pub mod task;
pub mod tasks;
pub mod worker;

pub use config::Config;
pub use queue::{QueueConfig, QueueError, ShutdownReport, TaskQueue};
pub use task::{Task, TaskContext, TaskEvent, TaskEventKind, TaskId, TaskOutput};
