use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::info;

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::library::Branch;
use crate::task::{Task, TaskOutput};
use crate::tasks::ExtractTask;

/// Command to install downloaded archives into a branch folder
pub struct ExtractCommand {
    config: Config,
    archives: Vec<PathBuf>,
    branch: Branch,
}

impl ExtractCommand {
    pub fn new(config: Config, archives: Vec<PathBuf>, branch: Branch) -> Self {
        Self {
            config,
            archives,
            branch,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        let destination = self.config.library_folder.join(self.branch.folder_name());
        let mut tasks: Vec<Box<dyn Task>> = Vec::with_capacity(self.archives.len());
        for archive in &self.archives {
            if !archive.is_file() {
                return Err(anyhow!("Archive does not exist: {:?}", archive));
            }
            info!("➕ Queueing extraction: {}", archive.display());
            tasks.push(Box::new(ExtractTask::new(archive.clone(), destination.clone())));
        }

        let outcome = run_tasks(&self.config, tasks).await?.into_result("extract")?;
        for output in outcome.outputs.values() {
            if let TaskOutput::Path(path) = output {
                info!("📦 Installed {}", path.display());
            }
        }
        info!("✅ {} archive(s) extracted.", outcome.outputs.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    fn config(library: PathBuf) -> Config {
        Config {
            library_folder: library,
            worker_count: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_extract_missing_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let extract_cmd = ExtractCommand::new(
            config(temp_dir.path().to_path_buf()),
            vec![temp_dir.path().join(".temp/nope.zip")],
            Branch::Stable,
        );
        assert!(extract_cmd.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_extract_corrupt_archive_fails() {
        let temp_dir = TempDir::new().unwrap();
        let archive = temp_dir.path().join("broken.tar.gz");
        fs::write(&archive, "definitely not gzip").unwrap();

        let extract_cmd = ExtractCommand::new(
            config(temp_dir.path().to_path_buf()),
            vec![archive],
            Branch::Daily,
        );
        assert!(extract_cmd.execute().await.is_err());
    }
}
