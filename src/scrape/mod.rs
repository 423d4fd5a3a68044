//! Discovery of remote builds.
//!
//! A [`Scraper`] fetches one JSON listing per enabled channel and reports
//! every build it has not reported on its previous run. The last good
//! listing of each channel is kept on disk and used when the remote is
//! unreachable.

pub mod cache;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::{Config, NetworkConfig};
use crate::library::{Branch, BuildInfo};
use crate::locks::PathLocks;
use crate::net;
use crate::task::{
    Cancelled, EventSender, Severity, Task, TaskContext, TaskEventKind, TaskId, TaskOutput,
};
use cache::{ScrapeCache, CACHE_FILE_NAME};

pub struct Scraper {
    api_url: String,
    channels: Vec<Branch>,
    network: NetworkConfig,
    cache_path: PathBuf,
    retries: u32,
    backoff: Duration,
    /// Links reported by the previous run, per channel
    seen: Mutex<HashMap<Branch, HashSet<String>>>,
}

/// A scrape running on its own tokio task
pub struct ScrapeHandle {
    pub id: TaskId,
    cancel: CancellationToken,
    handle: JoinHandle<()>,
}

impl ScrapeHandle {
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Wait for the scrape to send its terminal event
    pub async fn join(self) -> Result<()> {
        self.handle.await.context("Scrape task failed to complete")
    }
}

impl Scraper {
    /// Scrape every remote channel into the configured library
    pub fn new(config: &Config) -> Self {
        Self::with_channels(
            &config.api_url,
            &config.library_folder,
            config.network.clone(),
            Branch::REMOTE.to_vec(),
        )
    }

    pub fn with_channels(
        api_url: &str,
        library_folder: &Path,
        network: NetworkConfig,
        channels: Vec<Branch>,
    ) -> Self {
        Self {
            api_url: api_url.trim_end_matches('/').to_string(),
            channels,
            network,
            cache_path: library_folder.join(CACHE_FILE_NAME),
            retries: 2,
            backoff: Duration::from_millis(500),
            seen: Mutex::new(HashMap::new()),
        }
    }

    /// Number of extra attempts per channel and the delay before the first one
    ///
    /// The delay doubles after every failed attempt.
    pub fn with_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.retries = retries;
        self.backoff = backoff;
        self
    }

    pub fn cache_path(&self) -> &Path {
        &self.cache_path
    }

    fn listing_url(&self, branch: Branch) -> String {
        format!("{}/{}.json", self.api_url, branch.folder_name())
    }

    /// Run one scrape on a dedicated tokio task
    ///
    /// Events go to `events` just like for a queued task, including the
    /// terminal one.
    pub fn spawn(self: Arc<Self>, events: EventSender) -> ScrapeHandle {
        let id = TaskId::new();
        let cancel = CancellationToken::new();
        let ctx = TaskContext::new(id, events, cancel.clone(), Arc::new(PathLocks::new()));

        let handle = tokio::spawn(async move {
            let kind = match self.run(&ctx).await {
                Ok(output) => TaskEventKind::Finished(output),
                Err(_) if ctx.is_cancelled() => TaskEventKind::Cancelled,
                Err(e) => {
                    error!("Scrape failed: {:#}", e);
                    TaskEventKind::Error(format!("{:#}", e))
                }
            };
            ctx.emit(kind);
        });

        ScrapeHandle { id, cancel, handle }
    }

    async fn fetch(&self, client: &reqwest::Client, branch: Branch) -> Result<Vec<BuildInfo>> {
        let url = self.listing_url(branch);
        let builds = client
            .get(&url)
            .timeout(self.network.request_timeout)
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?
            .error_for_status()?
            .json::<Vec<BuildInfo>>()
            .await
            .with_context(|| format!("Malformed listing from {}", url))?;
        Ok(builds)
    }

    async fn fetch_with_retries(
        &self,
        client: &reqwest::Client,
        branch: Branch,
        ctx: &TaskContext,
    ) -> Result<Vec<BuildInfo>> {
        let mut delay = self.backoff;
        let mut attempt = 0;
        loop {
            match self.fetch(client, branch).await {
                Ok(builds) => return Ok(builds),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "Fetching {} listing failed (attempt {}/{}): {:#}",
                        branch,
                        attempt,
                        self.retries + 1,
                        e
                    );
                    tokio::select! {
                        _ = ctx.cancel_token().cancelled() => return Err(anyhow!(Cancelled)),
                        _ = tokio::time::sleep(delay) => {}
                    }
                    delay *= 2;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

#[async_trait]
impl Task for Scraper {
    fn describe(&self) -> String {
        let channels: Vec<_> = self.channels.iter().map(|b| b.folder_name()).collect();
        format!("Scrape [{}]", channels.join(", "))
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        let client = net::build_client(&self.network)?;
        let mut cache = ScrapeCache::from_file_or_default(&self.cache_path);
        let mut previous = self
            .seen
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        let previous_links: HashSet<String> = previous.values().flatten().cloned().collect();

        let mut current: HashMap<Branch, HashSet<String>> = HashMap::new();
        let mut run_links = HashSet::new();
        let mut reported = 0;
        let mut available = 0;
        let mut cache_dirty = false;

        for &branch in &self.channels {
            ctx.check_cancelled()?;

            let builds = match self.fetch_with_retries(&client, branch, ctx).await {
                Ok(builds) => {
                    debug!("Fetched {} {} builds", builds.len(), branch);
                    cache.update(branch, builds.clone());
                    cache_dirty = true;
                    builds
                }
                Err(e) if e.is::<Cancelled>() => return Err(e),
                Err(e) => match cache.builds(branch) {
                    Some(cached) => {
                        warn!("Using cached {} listing: {:#}", branch, e);
                        let text = format!(
                            "Could not reach the {} listing, showing cached builds",
                            branch
                        );
                        ctx.message(text, Severity::Warning);
                        cached.to_vec()
                    }
                    None => {
                        error!("No {} listing available: {:#}", branch, e);
                        ctx.message(
                            format!("Could not fetch the {} listing: {:#}", branch, e),
                            Severity::Error,
                        );
                        // Keep what was reported, so those links stay old news
                        if let Some(links) = previous.remove(&branch) {
                            current.insert(branch, links);
                        }
                        continue;
                    }
                },
            };

            available += 1;
            let channel_links = current.entry(branch).or_default();
            for build in builds {
                channel_links.insert(build.link.clone());
                if !run_links.insert(build.link.clone()) {
                    continue;
                }
                if !previous_links.contains(&build.link) {
                    ctx.link(build);
                    reported += 1;
                }
            }
        }

        if available == 0 && !self.channels.is_empty() {
            return Err(anyhow!("No build listing could be fetched or loaded from cache"));
        }

        if cache_dirty {
            if let Err(e) = cache.save(&self.cache_path) {
                warn!("Failed to save scrape cache: {:#}", e);
            }
        }

        *self.seen.lock().unwrap_or_else(PoisonError::into_inner) = current;
        info!("🌐 Scrape complete: {} new builds", reported);
        Ok(TaskOutput::Unit)
    }
}
