use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::task::{Severity, Task, TaskContext, TaskOutput};

/// Copy the library's `template` folder into a build's version config folder
pub struct TemplateInstallTask {
    build: PathBuf,
    template: PathBuf,
}

impl TemplateInstallTask {
    pub fn new(build: PathBuf, library_folder: &Path) -> Self {
        Self {
            build,
            template: library_folder.join("template"),
        }
    }
}

/// First child folder named like a version (`4.1`, `3.6.2`, ...)
fn version_folder(build: &Path) -> Result<Option<PathBuf>> {
    let pattern = Regex::new(r"^\d+\.\d+")?;
    let found = WalkDir::new(build)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .find(|e| pattern.is_match(&e.file_name().to_string_lossy()))
        .map(|e| e.into_path());
    Ok(found)
}

/// Recursively copy `src` into `dst`, overwriting files that already exist
///
/// Returns the number of files copied.
pub fn copy_tree(src: &Path, dst: &Path, cancelled: &dyn Fn() -> bool) -> Result<usize> {
    let mut copied = 0;
    for entry in WalkDir::new(src).follow_links(false) {
        if cancelled() {
            anyhow::bail!(crate::task::Cancelled);
        }
        let entry = entry?;
        let relative = entry.path().strip_prefix(src)?;
        let target = dst.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)
                .with_context(|| format!("Failed to create {:?}", target))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target)
                .with_context(|| format!("Failed to copy {:?} to {:?}", entry.path(), target))?;
            copied += 1;
        }
    }
    Ok(copied)
}

#[async_trait]
impl Task for TemplateInstallTask {
    fn describe(&self) -> String {
        format!("Install template to {:?}", self.build)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let _lock = ctx.locks().write(&self.build).await;

        tokio::fs::create_dir_all(&self.template)
            .await
            .with_context(|| format!("Failed to create template folder {:?}", self.template))?;

        let build = self.build.clone();
        let template = self.template.clone();
        let token = ctx.cancel_token().clone();
        let copied = tokio::task::spawn_blocking(move || -> Result<Option<(PathBuf, usize)>> {
            let Some(target) = version_folder(&build)? else {
                return Ok(None);
            };
            let copied = copy_tree(&template, &target, &|| token.is_cancelled())?;
            Ok(Some((target, copied)))
        })
        .await??;

        match copied {
            Some((target, count)) => {
                info!("📋 Installed template ({} files) into {:?}", count, target);
            }
            None => {
                debug!("No version folder in {:?}", self.build);
                ctx.message(
                    format!("No version folder found in {:?}, template not installed", self.build),
                    Severity::Warning,
                );
            }
        }

        Ok(TaskOutput::Unit)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskEventKind;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_template_is_copied_into_version_folder() {
        let temp_dir = TempDir::new().unwrap();
        let library = temp_dir.path();
        fs::create_dir_all(library.join("template/config")).unwrap();
        fs::write(library.join("template/config/userpref.blend"), "prefs").unwrap();

        let build = library.join("stable/blender-4.1.0");
        fs::create_dir_all(build.join("4.1/config")).unwrap();
        fs::create_dir_all(build.join("lib")).unwrap();
        fs::write(build.join("4.1/config/userpref.blend"), "old").unwrap();

        let task = TemplateInstallTask::new(build.clone(), library);
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        assert_eq!(task.run(&ctx).await.unwrap(), TaskOutput::Unit);
        drop(ctx);

        assert_eq!(
            fs::read_to_string(build.join("4.1/config/userpref.blend")).unwrap(),
            "prefs"
        );
        assert!(!build.join("lib/config").exists());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_missing_version_folder_is_not_an_error() {
        let temp_dir = TempDir::new().unwrap();
        let build = temp_dir.path().join("custom/odd-build");
        fs::create_dir_all(&build).unwrap();

        let task = TemplateInstallTask::new(build, temp_dir.path());
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        task.run(&ctx).await.unwrap();

        assert!(temp_dir.path().join("template").is_dir());
        assert!(matches!(
            rx.recv().await.unwrap().kind,
            TaskEventKind::Message {
                severity: Severity::Warning,
                ..
            }
        ));
    }

    #[test]
    fn test_copy_tree_stops_when_cancelled() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("src");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("a"), "").unwrap();

        let err = copy_tree(&src, &temp_dir.path().join("dst"), &|| true).unwrap_err();
        assert!(err.is::<crate::task::Cancelled>());
    }
}
