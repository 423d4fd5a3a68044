use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tokio::fs as async_fs;
use tracing::{error, info};
use uuid::Uuid;

use crate::task::{RemovalStatus, Task, TaskContext, TaskOutput};

/// What "remove" means for a build directory
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteAction {
    /// Move into the library's `.trash` folder
    Trash,
    /// Delete the tree for good
    Permanent,
}

impl FromStr for DeleteAction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "trash" => Ok(Self::Trash),
            "permanent" | "delete" => Ok(Self::Permanent),
            other => Err(anyhow!("Unknown delete action: {}", other)),
        }
    }
}

impl fmt::Display for DeleteAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Trash => f.write_str("trash"),
            Self::Permanent => f.write_str("permanent"),
        }
    }
}

/// Delete, or move to trash, one directory tree
///
/// Reports `Removed` only when the whole tree is gone; anything short of
/// that, including a partly deleted tree, is `Failed`.
pub struct RemoveTask {
    path: PathBuf,
    action: DeleteAction,
    trash_folder: PathBuf,
    remove_tree: fn(&Path) -> std::io::Result<()>,
}

impl RemoveTask {
    pub fn new(path: PathBuf, action: DeleteAction, library_folder: &Path) -> Self {
        Self {
            path,
            action,
            trash_folder: library_folder.join(".trash"),
            remove_tree: |path| std::fs::remove_dir_all(path),
        }
    }

    /// Swap the recursive delete used for permanent removal of a directory
    #[cfg(test)]
    fn with_tree_remover(mut self, remove_tree: fn(&Path) -> std::io::Result<()>) -> Self {
        self.remove_tree = remove_tree;
        self
    }

    async fn remove(&self) -> Result<()> {
        let metadata = async_fs::symlink_metadata(&self.path)
            .await
            .with_context(|| format!("Cannot remove {:?}", self.path))?;

        match self.action {
            DeleteAction::Permanent => {
                if metadata.is_dir() {
                    let path = self.path.clone();
                    let remove_tree = self.remove_tree;
                    tokio::task::spawn_blocking(move || remove_tree(&path))
                        .await?
                        .with_context(|| format!("Failed to delete {:?}", self.path))?;
                } else {
                    async_fs::remove_file(&self.path).await?;
                }
            }
            DeleteAction::Trash => {
                async_fs::create_dir_all(&self.trash_folder).await?;
                let name = self
                    .path
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_else(|| "build".to_string());
                let id = Uuid::new_v4().simple().to_string();
                let target = self.trash_folder.join(format!("{}-{}", name, &id[..8]));
                async_fs::rename(&self.path, &target)
                    .await
                    .with_context(|| format!("Failed to move {:?} to trash", self.path))?;
            }
        }

        if async_fs::try_exists(&self.path).await.unwrap_or(true) {
            return Err(anyhow!("{:?} still exists after removal", self.path));
        }
        Ok(())
    }
}

#[async_trait]
impl Task for RemoveTask {
    fn describe(&self) -> String {
        format!("Remove {:?} ({})", self.path, self.action)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let _lock = ctx.locks().write(&self.path).await;

        let status = match self.remove().await {
            Ok(()) => {
                info!("🗑️ Removed {:?}", self.path);
                RemovalStatus::Removed
            }
            Err(e) => {
                error!("Failed to remove {:?}: {:#}", self.path, e);
                RemovalStatus::Failed
            }
        };

        Ok(TaskOutput::Removal(status))
    }
}
