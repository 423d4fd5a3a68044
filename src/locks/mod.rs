use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tokio::sync::{OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::trace;

pub type ReadGuard = OwnedRwLockReadGuard<()>;
pub type WriteGuard = OwnedRwLockWriteGuard<()>;

/// Advisory per-path locks over the build library
///
/// Tasks that mutate a build directory (remove, rename, download) take the
/// exclusive lock for that path; scans take the shared lock while they
/// classify it. Locks are only advisory: they serialize tasks running in this
/// process, not other programs touching the same files.
#[derive(Debug, Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<PathBuf, Arc<RwLock<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait for shared access to `path`
    pub async fn read(&self, path: &Path) -> ReadGuard {
        let lock = self.lock_for(path);
        trace!("Waiting for read lock on {:?}", path);
        lock.read_owned().await
    }

    /// Wait for exclusive access to `path`
    pub async fn write(&self, path: &Path) -> WriteGuard {
        let lock = self.lock_for(path);
        trace!("Waiting for write lock on {:?}", path);
        lock.write_owned().await
    }

    /// Exclusive access to several paths at once
    ///
    /// Keys are acquired in sorted order so two callers locking overlapping
    /// sets cannot deadlock each other.
    pub async fn write_all(&self, paths: &[&Path]) -> Vec<WriteGuard> {
        let mut keys: Vec<PathBuf> = paths.iter().map(|p| normalize(p)).collect();
        keys.sort();
        keys.dedup();

        let mut guards = Vec::with_capacity(keys.len());
        for key in keys {
            let lock = self.lock_for_key(key);
            guards.push(lock.write_owned().await);
        }
        guards
    }

    /// Whether anyone currently holds a lock on `path`
    pub fn is_locked(&self, path: &Path) -> bool {
        let key = normalize(path);
        let locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        locks
            .get(&key)
            .map(|lock| lock.try_write().is_err())
            .unwrap_or(false)
    }

    /// Number of paths with a live lock entry
    pub fn len(&self) -> usize {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut locks);
        locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock_for(&self, path: &Path) -> Arc<RwLock<()>> {
        self.lock_for_key(normalize(path))
    }

    fn lock_for_key(&self, key: PathBuf) -> Arc<RwLock<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        prune(&mut locks);
        locks.entry(key).or_default().clone()
    }
}

/// Drop entries nobody holds or waits on; guards keep their `Arc` alive
fn prune(locks: &mut HashMap<PathBuf, Arc<RwLock<()>>>) {
    locks.retain(|_, lock| Arc::strong_count(lock) > 1);
}

/// Canonical key for a path that may not exist (yet, or anymore)
fn normalize(path: &Path) -> PathBuf {
    if let Ok(canonical) = std::fs::canonicalize(path) {
        return canonical;
    }
    match (path.parent(), path.file_name()) {
        (Some(parent), Some(name)) => std::fs::canonicalize(parent)
            .map(|p| p.join(name))
            .unwrap_or_else(|_| path.to_path_buf()),
        _ => path.to_path_buf(),
    }
}
