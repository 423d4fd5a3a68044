use std::env;
use std::path::PathBuf;
use std::time::Duration;

use crate::tasks::remove::DeleteAction;

/// Configuration for the task queue and the tasks it runs
#[derive(Debug, Clone)]
pub struct Config {
    pub library_folder: PathBuf,
    pub worker_count: usize,
    pub delete_action: DeleteAction,
    /// Optional bound on pending tasks; `None` keeps the backlog unbounded
    pub max_backlog: Option<usize>,
    pub network: NetworkConfig,
    pub api_url: String,
}

/// Settings shared by every task that talks to the network
#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub proxy: Option<String>,
    pub user_agent: String,
    /// Longest wait for a connection, the response headers, or the next chunk
    pub request_timeout: Duration,
    /// The same bound for the single retry after a transient failure
    pub retry_timeout: Duration,
}

impl Config {
    /// Load configuration from environment variables with defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let timeout_secs = env::var("BUILDSHELF_TIMEOUT_SECS")
            .ok()
            .and_then(|v| v.parse::<u64>().ok())
            .unwrap_or(10);

        Self {
            library_folder: env::var("BUILDSHELF_LIBRARY")
                .map(PathBuf::from)
                .unwrap_or(defaults.library_folder),
            worker_count: env::var("BUILDSHELF_WORKERS")
                .ok()
                .and_then(|v| v.parse::<usize>().ok())
                .filter(|n| *n >= 1)
                .unwrap_or(defaults.worker_count),
            delete_action: env::var("BUILDSHELF_DELETE_ACTION")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(defaults.delete_action),
            max_backlog: env::var("BUILDSHELF_MAX_BACKLOG")
                .ok()
                .and_then(|v| v.parse::<usize>().ok()),
            network: NetworkConfig {
                proxy: env::var("BUILDSHELF_PROXY").ok().filter(|p| !p.is_empty()),
                ..NetworkConfig::with_timeout_secs(timeout_secs)
            },
            api_url: env::var("BUILDSHELF_API_URL").unwrap_or(defaults.api_url),
        }
    }

    /// Default worker count: three quarters of the available cores, at least one
    pub fn default_worker_count() -> usize {
        let cores = std::thread::available_parallelism()
            .map(|n| n.get())
            .unwrap_or(4);
        (cores * 3 / 4).max(1)
    }

    /// Staging directory for in-progress downloads
    pub fn temp_folder(&self) -> PathBuf {
        self.library_folder.join(".temp")
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            library_folder: env::current_dir()
                .unwrap_or_else(|_| PathBuf::from("."))
                .join("library"),
            worker_count: Self::default_worker_count(),
            delete_action: DeleteAction::Trash,
            max_backlog: None,
            network: NetworkConfig::default(),
            api_url: "https://builds.example.org/api".to_string(),
        }
    }
}

impl NetworkConfig {
    /// Timeouts derived from one base value; the retry waits six times longer
    pub fn with_timeout_secs(secs: u64) -> Self {
        Self {
            proxy: None,
            user_agent: format!("buildshelf/{}", env!("CARGO_PKG_VERSION")),
            request_timeout: Duration::from_secs(secs),
            retry_timeout: Duration::from_secs(secs.saturating_mul(6)),
        }
    }
}

impl Default for NetworkConfig {
    fn default() -> Self {
        Self::with_timeout_secs(10)
    }
}
