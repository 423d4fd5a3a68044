use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

/// Name of the metadata file written next to an installed build
pub const BUILD_INFO_MARKER: &str = ".blinfo";

/// Library subfolder a build lives in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Branch {
    Stable,
    Daily,
    Experimental,
    Fork,
    Custom,
}

impl Branch {
    pub const ALL: [Branch; 5] = [
        Branch::Stable,
        Branch::Daily,
        Branch::Experimental,
        Branch::Fork,
        Branch::Custom,
    ];

    /// Branches that have a remote listing to scrape
    pub const REMOTE: [Branch; 4] = [
        Branch::Stable,
        Branch::Daily,
        Branch::Experimental,
        Branch::Fork,
    ];

    pub fn folder_name(&self) -> &'static str {
        match self {
            Branch::Stable => "stable",
            Branch::Daily => "daily",
            Branch::Experimental => "experimental",
            Branch::Fork => "fork",
            Branch::Custom => "custom",
        }
    }
}

impl fmt::Display for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.folder_name())
    }
}

impl FromStr for Branch {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        Branch::ALL
            .into_iter()
            .find(|b| b.folder_name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow!("Unknown branch: {}", s))
    }
}

/// A downloadable build as described by the remote listing
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildInfo {
    pub link: String,
    pub version: String,
    pub branch: Branch,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subversion: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub build_hash: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub commit_time: Option<String>,
}

/// Executable path, relative to a build directory, for the current platform
pub fn executable_relative_path() -> &'static str {
    if cfg!(target_os = "windows") {
        "blender.exe"
    } else if cfg!(target_os = "macos") {
        "Blender/Blender.app/Contents/MacOS/Blender"
    } else {
        "blender"
    }
}

/// Whether a directory looks like an installed build
pub fn is_recognized_build(dir: &Path) -> bool {
    dir.join(BUILD_INFO_MARKER).is_file() || dir.join(executable_relative_path()).is_file()
}

/// Folder name a display name is stored under: lowercase, spaces as hyphens
pub fn slugify(display_name: &str) -> String {
    display_name.to_lowercase().replace(' ', "-")
}

/// Subfolders of the library root for the given branches
pub fn branch_folders(library_root: &Path, branches: &[Branch]) -> Vec<PathBuf> {
    branches
        .iter()
        .map(|b| library_root.join(b.folder_name()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_slugify() {
        assert_eq!(slugify("Test Build"), "test-build");
        assert_eq!(slugify("My  Branch"), "my--branch");
        assert_eq!(slugify("already-slug"), "already-slug");
    }

    #[test]
    fn test_branch_round_trip_names() {
        for branch in Branch::ALL {
            assert_eq!(branch.folder_name().parse::<Branch>().unwrap(), branch);
        }
        assert_eq!("STABLE".parse::<Branch>().unwrap(), Branch::Stable);
        assert!("nightly".parse::<Branch>().is_err());
    }

    #[test]
    fn test_recognition_by_marker_and_executable() {
        let temp_dir = TempDir::new().unwrap();
        let marked = temp_dir.path().join("marked");
        fs::create_dir_all(&marked).unwrap();
        fs::write(marked.join(BUILD_INFO_MARKER), "{}").unwrap();

        let with_exe = temp_dir.path().join("with-exe");
        let exe = with_exe.join(executable_relative_path());
        fs::create_dir_all(exe.parent().unwrap()).unwrap();
        fs::write(&exe, "").unwrap();

        let empty = temp_dir.path().join("empty");
        fs::create_dir_all(&empty).unwrap();

        assert!(is_recognized_build(&marked));
        assert!(is_recognized_build(&with_exe));
        assert!(!is_recognized_build(&empty));
    }

    #[test]
    fn test_build_info_deserializes_with_optional_fields() {
        let json = r#"{"link":"https://x/b.tar.xz","version":"4.1.0","branch":"daily"}"#;
        let info: BuildInfo = serde_json::from_str(json).unwrap();
        assert_eq!(info.branch, Branch::Daily);
        assert!(info.build_hash.is_none());
    }
}
