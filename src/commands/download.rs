use anyhow::Result;
use tracing::info;

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::task::{Task, TaskOutput};
use crate::tasks::DownloadTask;

/// Command to fetch build archives into the library's staging folder
pub struct DownloadCommand {
    config: Config,
    urls: Vec<String>,
}

impl DownloadCommand {
    pub fn new(config: Config, urls: Vec<String>) -> Self {
        Self { config, urls }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        let mut tasks: Vec<Box<dyn Task>> = Vec::with_capacity(self.urls.len());
        for url in &self.urls {
            let task =
                DownloadTask::new(url, &self.config.library_folder, self.config.network.clone())?;
            info!("➕ Queueing download: {}", url);
            tasks.push(Box::new(task));
        }

        let outcome = run_tasks(&self.config, tasks).await?;
        for output in outcome.outputs.values() {
            if let TaskOutput::Path(path) = output {
                info!("⬇️ Downloaded {}", path.display());
            }
        }

        let outcome = outcome.into_result("download")?;
        info!("✅ {} download(s) complete.", outcome.outputs.len());
        Ok(())
    }
}
