use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tokio::fs as async_fs;
use tracing::info;

use crate::library::slugify;
use crate::task::{Task, TaskContext, TaskOutput};

/// Rename a build folder after a display name, within its parent
pub struct RenameTask {
    src: PathBuf,
    display_name: String,
}

impl RenameTask {
    pub fn new(src: PathBuf, display_name: impl Into<String>) -> Self {
        Self {
            src,
            display_name: display_name.into(),
        }
    }

    /// The path the folder will end up at
    pub fn destination(&self) -> Result<PathBuf> {
        let slug = slugify(self.display_name.trim());
        if slug.is_empty() || slug == "." || slug == ".." || slug.contains(['/', '\\']) {
            return Err(anyhow!("Not a usable folder name: {:?}", self.display_name));
        }
        let parent = self
            .src
            .parent()
            .ok_or_else(|| anyhow!("{:?} has no parent folder", self.src))?;
        Ok(parent.join(slug))
    }

    async fn rename(&self, dst: &Path) -> Result<()> {
        if dst == self.src {
            // Already named after its slug
            if !async_fs::try_exists(&self.src).await? {
                return Err(anyhow!("{:?} does not exist", self.src));
            }
            return Ok(());
        }
        if async_fs::try_exists(dst).await? && !same_entry(&self.src, dst).await {
            return Err(anyhow!("{:?} already exists", dst));
        }
        async_fs::rename(&self.src, dst)
            .await
            .with_context(|| format!("Failed to rename {:?} to {:?}", self.src, dst))
    }
}

/// Whether two paths resolve to one entry, as a case-only change does on a
/// case-insensitive file system
async fn same_entry(a: &Path, b: &Path) -> bool {
    match (async_fs::canonicalize(a).await, async_fs::canonicalize(b).await) {
        (Ok(a), Ok(b)) => a == b,
        _ => false,
    }
}

#[async_trait]
impl Task for RenameTask {
    fn describe(&self) -> String {
        format!("Rename {:?} to {}", self.src, self.display_name)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let dst = match self.destination() {
            Ok(dst) => dst,
            Err(e) => {
                ctx.failure();
                return Err(e);
            }
        };

        let _locks = ctx.locks().write_all(&[self.src.as_path(), dst.as_path()]).await;

        // Both the failure signal and the error go out so the caller's
        // state reset and its error path each fire
        if let Err(e) = self.rename(&dst).await {
            ctx.failure();
            return Err(e);
        }

        info!("✏️ Renamed {:?} to {:?}", self.src, dst);
        Ok(TaskOutput::Path(dst))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskEventKind;
    use std::fs;
    use tempfile::TempDir;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_rename_to_slug() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("custom/My Branch");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("blender"), "").unwrap();

        let task = RenameTask::new(src.clone(), "Test Build");
        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        let output = task.run(&ctx).await.unwrap();
        drop(ctx);

        let expected = temp_dir.path().join("custom/test-build");
        assert_eq!(output, TaskOutput::Path(expected.clone()));
        assert!(expected.join("blender").exists());
        assert!(!src.exists());
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_failed_rename_reports_failure_and_error() {
        let temp_dir = TempDir::new().unwrap();
        let task = RenameTask::new(temp_dir.path().join("custom/missing"), "Anything");

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        assert!(task.run(&ctx).await.is_err());
        drop(ctx);

        let event = rx.recv().await.unwrap();
        assert!(matches!(event.kind, TaskEventKind::Failure));
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_rename_refuses_to_overwrite() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("custom/one");
        let taken = temp_dir.path().join("custom/two");
        fs::create_dir_all(&src).unwrap();
        fs::create_dir_all(&taken).unwrap();

        let (tx, _rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        assert!(RenameTask::new(src.clone(), "Two").run(&ctx).await.is_err());
        assert!(src.exists());
    }

    #[tokio::test]
    async fn test_rename_to_current_slug_is_a_no_op() {
        let temp_dir = TempDir::new().unwrap();
        let src = temp_dir.path().join("custom/test-build");
        fs::create_dir_all(&src).unwrap();
        fs::write(src.join("blender"), "").unwrap();

        let (tx, mut rx) = mpsc::unbounded_channel();
        let ctx = TaskContext::detached(tx);
        let output = RenameTask::new(src.clone(), "Test Build")
            .run(&ctx)
            .await
            .unwrap();
        drop(ctx);

        assert_eq!(output, TaskOutput::Path(src.clone()));
        assert!(src.join("blender").exists());
        assert!(rx.recv().await.is_none());
    }

    #[test]
    fn test_destination_rejects_path_separators() {
        let task = RenameTask::new(PathBuf::from("/lib/custom/a"), "../escape");
        assert!(task.destination().is_err());
        let task = RenameTask::new(PathBuf::from("/lib/custom/a"), "  ");
        assert!(task.destination().is_err());
    }
}
