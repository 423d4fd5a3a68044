use anyhow::{anyhow, Result};
use std::path::PathBuf;
use tracing::info;

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::task::{Task, TaskOutput};
use crate::tasks::RenameTask;

/// Command to give a build folder a new display name
pub struct RenameCommand {
    config: Config,
    build: PathBuf,
    name: String,
}

impl RenameCommand {
    pub fn new(config: Config, build: PathBuf, name: String) -> Self {
        Self {
            config,
            build,
            name,
        }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        let task = RenameTask::new(self.build.clone(), &self.name);
        let outcome = run_tasks(&self.config, vec![Box::new(task) as Box<dyn Task>])
            .await?
            .into_result("rename")?;

        match outcome.outputs.values().next() {
            Some(TaskOutput::Path(path)) => {
                info!("✅ Renamed {:?} to {:?}", self.build, path);
                Ok(())
            }
            other => Err(anyhow!("Unexpected rename result: {:?}", other)),
        }
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
    async fn test_rename_build() {
        let temp_dir = TempDir::new().unwrap();
        let build = temp_dir.path().join("custom/My Branch");
        fs::create_dir_all(&build).unwrap();

        RenameCommand::new(
            config(temp_dir.path().to_path_buf()),
            build.clone(),
            "Test Build".to_string(),
        )
        .execute()
        .await
        .unwrap();

        assert!(!build.exists());
        assert!(temp_dir.path().join("custom/test-build").is_dir());
    }

    #[tokio::test]
    async fn test_rename_missing_build_fails() {
        let temp_dir = TempDir::new().unwrap();
        let rename_cmd = RenameCommand::new(
            config(temp_dir.path().to_path_buf()),
            temp_dir.path().join("custom/nope"),
            "Anything".to_string(),
        );

        assert!(rename_cmd.execute().await.is_err());
    }
}
