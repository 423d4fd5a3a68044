use anyhow::Result;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::info;

use crate::commands::ensure_library;
use crate::commands::runner::drain;
use crate::config::Config;
use crate::library::Branch;
use crate::scrape::Scraper;

/// Command to list builds available for download
pub struct ScrapeCommand {
    config: Config,
    channels: Vec<Branch>,
}

impl ScrapeCommand {
    pub fn new(config: Config, channels: Vec<Branch>) -> Self {
        let channels = if channels.is_empty() {
            Branch::REMOTE.to_vec()
        } else {
            channels
        };
        Self { config, channels }
    }

    pub async fn execute(&self) -> Result<()> {
        ensure_library(&self.config.library_folder)?;

        info!("🌐 Fetching build listings from {}", self.config.api_url);

        let scraper = Arc::new(Scraper::with_channels(
            &self.config.api_url,
            &self.config.library_folder,
            self.config.network.clone(),
            self.channels.clone(),
        ));

        let (tx, mut events) = mpsc::unbounded_channel();
        let handle = scraper.spawn(tx);
        let id = handle.id;
        let outcome = drain(&mut events, &[id], &|_| handle.cancel()).await?;
        handle.join().await?;

        let outcome = outcome.into_result("scrape")?;
        for build in &outcome.links {
            info!("🔗 [{}] {} {}", build.branch, build.version, build.link);
        }
        info!("✅ Found {} available builds.", outcome.links.len());
        Ok(())
    }
}
