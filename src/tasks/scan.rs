use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use walkdir::WalkDir;

use crate::library::{self, Branch};
use crate::task::{Task, TaskContext, TaskOutput};

/// Walk the library's branch folders and classify every build directory
pub struct LibraryScanTask {
    library_folder: PathBuf,
    folders: Vec<String>,
}

impl LibraryScanTask {
    /// Scan every branch folder
    pub fn new(library_folder: &Path) -> Self {
        Self::with_branches(library_folder, &Branch::ALL)
    }

    pub fn with_branches(library_folder: &Path, branches: &[Branch]) -> Self {
        Self::with_folders(
            library_folder,
            branches.iter().map(|b| b.folder_name().to_string()).collect(),
        )
    }

    /// Scan arbitrary subfolders of the library
    pub fn with_folders(library_folder: &Path, folders: Vec<String>) -> Self {
        Self {
            library_folder: library_folder.to_path_buf(),
            folders,
        }
    }
}

/// Direct child directories of `folder`, sorted by name
///
/// A missing folder simply has no builds.
pub fn build_directories(folder: &Path) -> Vec<PathBuf> {
    if !folder.is_dir() {
        debug!("Skipping missing library folder: {:?}", folder);
        return Vec::new();
    }

    WalkDir::new(folder)
        .min_depth(1)
        .max_depth(1)
        .follow_links(false)
        .sort_by_file_name()
        .into_iter()
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_dir())
        .map(|e| e.into_path())
        .collect()
}

#[async_trait]
impl Task for LibraryScanTask {
    fn describe(&self) -> String {
        format!("Draw libraries [{}]", self.folders.join(", "))
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let mut found = 0;
        let mut unrecognized = 0;

        for folder in &self.folders {
            let path = self.library_folder.join(folder);
            let builds = tokio::task::spawn_blocking(move || build_directories(&path)).await?;

            for build in builds {
                ctx.check_cancelled()?;

                // Wait out any removal or rename in progress on this build
                let _lock = ctx.locks().read(&build).await;
                if !build.is_dir() {
                    debug!("Build disappeared while scanning: {:?}", build);
                    continue;
                }

                if library::is_recognized_build(&build) {
                    ctx.found(&build);
                    found += 1;
                } else {
                    ctx.unrecognized(&build);
                    unrecognized += 1;
                }
            }
        }

        info!(
            "🔎 Library scan complete: {} builds, {} unrecognized folders",
            found, unrecognized
        );
        Ok(TaskOutput::Unit)
    }
}
