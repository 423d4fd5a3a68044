use anyhow::Result;
use std::path::PathBuf;
use tracing::{info, warn};

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::task::{RemovalStatus, Task, TaskOutput};
use crate::tasks::{DeleteAction, RemoveTask};

/// Command to purge unfinished downloads and trashed builds
pub struct CleanCommand {
    config: Config,
}

impl CleanCommand {
    pub fn new(config: Config) -> Self {
        Self { config }
    }

    fn targets(&self) -> Vec<PathBuf> {
        [
            self.config.temp_folder(),
            self.config.library_folder.join(".trash"),
        ]
        .into_iter()
        .filter(|p| p.exists())
        .collect()
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        info!("🧹 Cleaning up temporary files...");

        let targets = self.targets();
        if targets.is_empty() {
            info!("✅ Nothing to clean.");
            return Ok(());
        }

        let tasks: Vec<Box<dyn Task>> = targets
            .iter()
            .map(|path| {
                Box::new(RemoveTask::new(
                    path.clone(),
                    DeleteAction::Permanent,
                    &self.config.library_folder,
                )) as Box<dyn Task>
            })
            .collect();

        let outcome = run_tasks(&self.config, tasks).await?.into_result("clean")?;
        let failed = outcome
            .outputs
            .values()
            .filter(|o| **o == TaskOutput::Removal(RemovalStatus::Failed))
            .count();
        if failed > 0 {
            warn!("⚠️ {} folder(s) could not be fully removed", failed);
            anyhow::bail!("Cleanup incomplete");
        }

        info!("✅ Cleanup complete.");
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
            worker_count: 2,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_clean_empty_directory() {
        let temp_dir = TempDir::new().unwrap();
        let clean_cmd = CleanCommand::new(config(temp_dir.path().to_path_buf()));

        let result = clean_cmd.execute().await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn test_clean_removes_staging_and_trash() {
        let temp_dir = TempDir::new().unwrap();
        let library = temp_dir.path();
        fs::create_dir_all(library.join(".temp")).unwrap();
        fs::write(library.join(".temp/partial.tar.xz"), "half").unwrap();
        fs::create_dir_all(library.join(".trash/old-build-1234abcd")).unwrap();
        fs::create_dir_all(library.join("stable/blender-4.1.0")).unwrap();

        CleanCommand::new(config(library.to_path_buf()))
            .execute()
            .await
            .unwrap();

        assert!(!library.join(".temp").exists());
        assert!(!library.join(".trash").exists());
        assert!(library.join("stable/blender-4.1.0").exists());
    }

    #[tokio::test]
    async fn test_clean_nonexistent_directory() {
        let clean_cmd = CleanCommand::new(config(PathBuf::from("/nonexistent/path")));

        let result = clean_cmd.execute().await;
        assert!(result.is_err());
    }
}
