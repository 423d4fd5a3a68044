use anyhow::Result;
use tracing::{info, warn};

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::library::Branch;
use crate::task::Task;
use crate::tasks::LibraryScanTask;

/// Command to list the builds installed in the library
pub struct ScanCommand {
    config: Config,
    branches: Vec<Branch>,
}

impl ScanCommand {
    pub fn new(config: Config, branches: Vec<Branch>) -> Self {
        let branches = if branches.is_empty() {
            Branch::ALL.to_vec()
        } else {
            branches
        };
        Self { config, branches }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        info!("🔎 Scanning library: {:?}", self.config.library_folder);

        let task = LibraryScanTask::with_branches(&self.config.library_folder, &self.branches);
        let outcome = run_tasks(&self.config, vec![Box::new(task) as Box<dyn Task>])
            .await?
            .into_result("scan")?;

        for build in &outcome.found {
            info!("📦 {}", build.display());
        }
        for folder in &outcome.unrecognized {
            warn!("⚠️ Not a recognized build: {}", folder.display());
        }

        info!(
            "✅ Scan complete. {} builds, {} unrecognized folders.",
            outcome.found.len(),
            outcome.unrecognized.len()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::library::BUILD_INFO_MARKER;
    use std::fs;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn config(library: PathBuf) -> Config {
        Config {
            library_folder: library,
            worker_count: 1,
            ..Config::default()
        }
    }

    #[tokio::test]
    async fn test_scan_library() {
        let temp_dir = TempDir::new().unwrap();
        let build = temp_dir.path().join("stable/blender-4.1.0");
        fs::create_dir_all(&build).unwrap();
        fs::write(build.join(BUILD_INFO_MARKER), "{}").unwrap();

        let scan_cmd = ScanCommand::new(config(temp_dir.path().to_path_buf()), Vec::new());
        assert!(scan_cmd.execute().await.is_ok());
    }

    #[tokio::test]
    async fn test_scan_nonexistent_directory() {
        let scan_cmd = ScanCommand::new(config(PathBuf::from("/nonexistent/path")), Vec::new());
        assert!(scan_cmd.execute().await.is_err());
    }

    #[tokio::test]
    async fn test_scan_file_instead_of_directory() {
        let temp_dir = TempDir::new().unwrap();
        let file = temp_dir.path().join("library.txt");
        fs::write(&file, "").unwrap();

        let scan_cmd = ScanCommand::new(config(file), vec![Branch::Daily]);
        assert!(scan_cmd.execute().await.is_err());
    }
}
