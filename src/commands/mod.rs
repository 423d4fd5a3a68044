pub mod clean;
pub mod download;
pub mod extract;
pub mod remove;
pub mod rename;
pub mod runner;
pub mod scan;
pub mod scrape;
pub mod template;

use anyhow::{anyhow, Result};
use std::path::Path;

/// Every command works on an existing library folder
pub(crate) fn ensure_library(library_folder: &Path) -> Result<()> {
    if !library_folder.exists() {
        return Err(anyhow!(
            "Library directory does not exist: {:?}",
            library_folder
        ));
    }

    if !library_folder.is_dir() {
        return Err(anyhow!("Path is not a directory: {:?}", library_folder));
    }

    Ok(())
}
