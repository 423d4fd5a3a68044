use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::task::{RemovalStatus, Task, TaskOutput};
use crate::tasks::{DeleteAction, RemoveTask};

/// Command to delete or trash installed builds
pub struct RemoveCommand {
    config: Config,
    builds: Vec<PathBuf>,
    action: DeleteAction,
}

impl RemoveCommand {
    /// `action` falls back to the configured default delete action
    pub fn new(config: Config, builds: Vec<PathBuf>, action: Option<DeleteAction>) -> Self {
        let action = action.unwrap_or(config.delete_action);
        Self {
            config,
            builds,
            action,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        let tasks: Vec<Box<dyn Task>> = self
            .builds
            .iter()
            .map(|build| {
                Box::new(RemoveTask::new(
                    build.clone(),
                    self.action,
                    &self.config.library_folder,
                )) as Box<dyn Task>
            })
            .collect();

        let outcome = run_tasks(&self.config, tasks).await?.into_result("remove")?;
        let failed = outcome
            .outputs
            .values()
            .filter(|o| **o == TaskOutput::Removal(RemovalStatus::Failed))
            .count();

        if failed > 0 {
            warn!("⚠️ {} build(s) could not be removed", failed);
            return Err(anyhow!("Failed to remove {} build(s)", failed));
        }

        info!("✅ Removed {} build(s) ({}).", self.builds.len(), self.action);
        Ok(())
    }
}
