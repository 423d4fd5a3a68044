use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::{self as async_fs, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};

use crate::config::NetworkConfig;
use crate::net;
use crate::task::{Cancelled, Severity, Task, TaskContext, TaskOutput};

/// Fetch a build archive into the library's `.temp` staging folder
///
/// Installation of the downloaded file is a separate step; this task only
/// reports where the file landed.
pub struct DownloadTask {
    url: reqwest::Url,
    temp_folder: PathBuf,
    network: NetworkConfig,
}

impl DownloadTask {
    pub fn new(url: &str, library_folder: &Path, network: NetworkConfig) -> Result<Self> {
        let url = reqwest::Url::parse(url).with_context(|| format!("Invalid URL: {}", url))?;
        if net::file_name_from_url(&url).is_none() {
            return Err(anyhow!("URL does not name a file: {}", url));
        }
        Ok(Self {
            url,
            temp_folder: library_folder.join(".temp"),
            network,
        })
    }

    /// Where the file will be written
    pub fn destination(&self) -> PathBuf {
        // `new` guarantees the URL has a file name
        let name = net::file_name_from_url(&self.url).unwrap_or_else(|| "download".to_string());
        self.temp_folder.join(name)
    }

    /// One transfer; `idle` bounds the wait for the headers and for each chunk
    async fn attempt(
        &self,
        client: &reqwest::Client,
        dist: &Path,
        idle: Duration,
        ctx: &TaskContext,
    ) -> Result<()> {
        let request = client.get(self.url.clone()).send();
        let response = tokio::select! {
            _ = ctx.cancel_token().cancelled() => return Err(anyhow!(Cancelled)),
            response = net::within(idle, request) => response,
        };
        let mut response = response
            .with_context(|| format!("Request to {} failed", self.url))?
            .error_for_status()?;

        let total = response.content_length().unwrap_or(0);
        let mut file = File::create(dist)
            .await
            .with_context(|| format!("Failed to create {:?}", dist))?;
        let mut read: u64 = 0;

        loop {
            let chunk = tokio::select! {
                _ = ctx.cancel_token().cancelled() => return Err(anyhow!(Cancelled)),
                chunk = net::within(idle, response.chunk()) => chunk?,
            };
            let Some(chunk) = chunk else { break };

            file.write_all(&chunk).await?;
            read += chunk.len() as u64;
            if total > 0 {
                ctx.progress(read, total);
            }
        }

        file.flush().await?;
        debug!("Downloaded {} bytes to {:?}", read, dist);
        Ok(())
    }
}

#[async_trait]
impl Task for DownloadTask {
    fn describe(&self) -> String {
        format!("Download {}", self.url)
    }

    async fn run(&self, ctx: &TaskContext) -> Result<TaskOutput> {
        ctx.progress(0, 0);
        async_fs::create_dir_all(&self.temp_folder)
            .await
            .with_context(|| format!("Failed to create staging folder {:?}", self.temp_folder))?;

        let dist = self.destination();
        let _lock = ctx.locks().write(&dist).await;
        let client = net::build_client(&self.network)?;

        info!("⬇️ Downloading {} to {:?}", self.url, dist);
        match self
            .attempt(&client, &dist, self.network.request_timeout, ctx)
            .await
        {
            Ok(()) => {}
            Err(e) if net::is_transient(&e) && !ctx.is_cancelled() => {
                warn!("Request is taking longer than usual: {:#}", e);
                ctx.message(
                    "Request is taking longer than usual, retrying with a longer timeout",
                    Severity::Warning,
                );
                self.attempt(&client, &dist, self.network.retry_timeout, ctx)
                    .await
                    .context("Download failed after retry")?;
            }
            Err(e) => return Err(e),
        }

        Ok(TaskOutput::Path(dist))
    }
}
