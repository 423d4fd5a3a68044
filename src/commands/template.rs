use anyhow::Result;
use std::path::PathBuf;
use tracing::info;

use crate::commands::ensure_library;
use crate::commands::runner::run_tasks;
use crate::config::Config;
use crate::task::Task;
use crate::tasks::TemplateInstallTask;

/// Command to copy the library template into builds
pub struct TemplateCommand {
    config: Config,
    builds: Vec<PathBuf>,
}

impl TemplateCommand {
    pub fn new(config: Config, builds: Vec<PathBuf>) -> Self {
        Self { config, builds }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        info!(
            "📋 Installing template from {:?}",
            self.config.library_folder.join("template")
        );

        let tasks: Vec<Box<dyn Task>> = self
            .builds
            .iter()
            .map(|build| {
                Box::new(TemplateInstallTask::new(
                    build.clone(),
                    &self.config.library_folder,
                )) as Box<dyn Task>
            })
            .collect();

        run_tasks(&self.config, tasks).await?.into_result("template")?;
        info!("✅ Template installed into {} build(s).", self.builds.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_template_into_build() {
        let temp_dir = TempDir::new().unwrap();
        let library = temp_dir.path();
        fs::create_dir_all(library.join("template/scripts")).unwrap();
        fs::write(library.join("template/scripts/startup.py"), "print()").unwrap();
        let build = library.join("stable/blender-4.1.0");
        fs::create_dir_all(build.join("4.1")).unwrap();

        let config = Config {
            library_folder: library.to_path_buf(),
            worker_count: 1,
            ..Config::default()
        };
        TemplateCommand::new(config, vec![build.clone()])
            .execute()
            .await
            .unwrap();

        assert!(build.join("4.1/scripts/startup.py").is_file());
    }

    #[tokio::test]
    async fn test_template_nonexistent_directory() {
        let config = Config {
            library_folder: PathBuf::from("/nonexistent/path"),
            ..Config::default()
        };
        let template_cmd = TemplateCommand::new(config, Vec::new());
        assert!(template_cmd.execute().await.is_err());
    }
}
