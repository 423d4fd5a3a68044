use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, warn};

use crate::library::{Branch, BuildInfo};

/// File name of the persisted listing cache inside the library folder
pub const CACHE_FILE_NAME: &str = ".scrape-cache.json";

/// Last successfully fetched listing of every channel
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ScrapeCache {
    #[serde(default)]
    channels: BTreeMap<String, ChannelListing>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct ChannelListing {
    /// Seconds since the unix epoch
    fetched_at: u64,
    builds: Vec<BuildInfo>,
}

impl ScrapeCache {
    /// Load the cache, or `None` if it is missing or unreadable
    pub fn try_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            debug!("No scrape cache at {:?}", path);
            return None;
        }

        match fs::read_to_string(path)
            .map_err(anyhow::Error::from)
            .and_then(|text| serde_json::from_str(&text).map_err(anyhow::Error::from))
        {
            Ok(cache) => {
                debug!("Loaded scrape cache from {:?}", path);
                Some(cache)
            }
            Err(e) => {
                warn!("Ignoring unreadable scrape cache {:?}: {}", path, e);
                None
            }
        }
    }

    pub fn from_file_or_default(path: &Path) -> Self {
        Self::try_from_file(path).unwrap_or_default()
    }

    /// Write the cache through a temporary file so a crash never leaves it half-written
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create {:?}", parent))?;
        }
        let tmp = path.with_extension("json.tmp");
        let text = serde_json::to_string_pretty(self)?;
        fs::write(&tmp, text).with_context(|| format!("Failed to write {:?}", tmp))?;
        fs::rename(&tmp, path).with_context(|| format!("Failed to replace {:?}", path))?;
        Ok(())
    }

    pub fn builds(&self, branch: Branch) -> Option<&[BuildInfo]> {
        self.channels
            .get(branch.folder_name())
            .map(|listing| listing.builds.as_slice())
    }

    pub fn update(&mut self, branch: Branch, builds: Vec<BuildInfo>) {
        let fetched_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0);
        self.channels.insert(
            branch.folder_name().to_string(),
            ChannelListing { fetched_at, builds },
        );
    }

    pub fn is_empty(&self) -> bool {
        self.channels.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn build(link: &str) -> BuildInfo {
        BuildInfo {
            link: link.to_string(),
            version: "4.1.0".to_string(),
            branch: Branch::Stable,
            subversion: None,
            build_hash: None,
            commit_time: None,
        }
    }

    #[test]
    fn test_cache_survives_a_save() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CACHE_FILE_NAME);

        let mut cache = ScrapeCache::default();
        cache.update(Branch::Stable, vec![build("https://example.org/a.tar.xz")]);
        cache.save(&path).unwrap();

        let loaded = ScrapeCache::try_from_file(&path).unwrap();
        assert_eq!(loaded.builds(Branch::Stable).unwrap().len(), 1);
        assert!(loaded.builds(Branch::Daily).is_none());
        assert!(!path.with_extension("json.tmp").exists());
    }

    #[test]
    fn test_corrupt_cache_is_ignored() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join(CACHE_FILE_NAME);
        fs::write(&path, "{ not json").unwrap();

        assert!(ScrapeCache::try_from_file(&path).is_none());
        assert!(ScrapeCache::from_file_or_default(&path).is_empty());
    }
}
