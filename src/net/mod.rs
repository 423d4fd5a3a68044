use anyhow::{Context, Result};
use std::future::Future;
use std::time::Duration;
use tracing::debug;

use crate::config::NetworkConfig;

/// Build the HTTP client shared by download and scrape tasks
///
/// Only connecting is bounded here. Waits for response data are bounded by
/// the caller, so a slow but steady transfer never hits a deadline.
pub fn build_client(config: &NetworkConfig) -> Result<reqwest::Client> {
    let mut builder = reqwest::Client::builder()
        .user_agent(config.user_agent.clone())
        .connect_timeout(config.request_timeout);

    if let Some(proxy) = &config.proxy {
        debug!("Using proxy: {}", proxy);
        builder = builder.proxy(
            reqwest::Proxy::all(proxy).with_context(|| format!("Invalid proxy URL: {}", proxy))?,
        );
    }

    builder.build().context("Failed to build HTTP client")
}

/// Whether a failure is worth a retry (timeouts and connection trouble)
pub fn is_transient(err: &anyhow::Error) -> bool {
    err.chain().any(|cause| {
        if cause.is::<tokio::time::error::Elapsed>() {
            return true;
        }
        cause
            .downcast_ref::<reqwest::Error>()
            .is_some_and(|e| e.is_timeout() || e.is_connect() || (e.is_body() && !e.is_status()))
    })
}

/// Wait at most `idle` for `fut`, failing with a transient timeout error
pub async fn within<T, F>(idle: Duration, fut: F) -> Result<T>
where
    F: Future<Output = Result<T, reqwest::Error>>,
{
    match tokio::time::timeout(idle, fut).await {
        Ok(result) => Ok(result?),
        Err(elapsed) => Err(anyhow::Error::new(elapsed)
            .context(format!("No data received for {:?}", idle))),
    }
}

/// Last path segment of a URL, used as the staged file name
pub fn file_name_from_url(url: &reqwest::Url) -> Option<String> {
    url.path_segments()
        .and_then(|mut segments| segments.next_back())
        .filter(|name| !name.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_name_from_url() {
        let url = reqwest::Url::parse("https://example.org/release/blender-4.1.0-linux-x64.tar.xz")
            .unwrap();
        assert_eq!(
            file_name_from_url(&url).as_deref(),
            Some("blender-4.1.0-linux-x64.tar.xz")
        );

        let bare = reqwest::Url::parse("https://example.org/").unwrap();
        assert_eq!(file_name_from_url(&bare), None);
    }

    #[tokio::test]
    async fn test_stalled_wait_is_transient() {
        let err = within(Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok::<_, reqwest::Error>(())
        })
        .await
        .unwrap_err();
        assert!(is_transient(&err));
    }

    #[test]
    fn test_plain_errors_are_not_transient() {
        let err = anyhow::anyhow!("disk full");
        assert!(!is_transient(&err));
    }

    #[test]
    fn test_invalid_proxy_is_rejected() {
        let config = NetworkConfig {
            proxy: Some("not a url".to_string()),
            ..NetworkConfig::default()
        };
        assert!(build_client(&config).is_err());
    }
}
