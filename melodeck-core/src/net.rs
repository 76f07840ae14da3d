//! Network fetch capability.

use crate::error::{CoreError, Result};
use async_trait::async_trait;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{policies::ExponentialBackoff, RetryTransientMiddleware};
use std::time::Duration;
use tracing::{debug, warn};

const LOG_TARGET: &str = "melodeck::net";

/// Default number of retry attempts for transient failures
const DEFAULT_MAX_RETRIES: u32 = 2;

/// Fetch a URL and hand back the raw body. Callers parse the payload.
#[async_trait]
pub trait NetworkFetch: Send + Sync {
    /// # Errors
    ///
    /// Returns [`CoreError::Timeout`] when `timeout` elapses, or a network or
    /// status error when the request fails.
    async fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>>;
}

/// HTTP implementation with transient-failure retries
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: ClientWithMiddleware,
}

impl HttpFetcher {
    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn new() -> Result<Self> {
        Self::with_retries(DEFAULT_MAX_RETRIES)
    }

    /// # Errors
    ///
    /// Returns an error if the HTTP client cannot be created.
    pub fn with_retries(max_retries: u32) -> Result<Self> {
        let base_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .user_agent(concat!("melodeck/", env!("CARGO_PKG_VERSION")))
            .build()?;

        let retry_policy = ExponentialBackoff::builder().build_with_max_retries(max_retries);
        let client = ClientBuilder::new(base_client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build();

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            warn!(target: LOG_TARGET, "{} returned status {}", url, status);
            return Err(CoreError::HttpStatus {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response.bytes().await?.to_vec())
    }
}

#[async_trait]
impl NetworkFetch for HttpFetcher {
    async fn get(&self, url: &str, timeout: Duration) -> Result<Vec<u8>> {
        debug!(target: LOG_TARGET, "GET {} (timeout {:?})", url, timeout);
        tokio::time::timeout(timeout, self.send(url))
            .await
            .map_err(|_| CoreError::Timeout {
                url: url.to_string(),
            })?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_unresponsive_server_times_out() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        // Accept and hold the connection without ever answering
        let server = tokio::spawn(async move {
            let conn = listener.accept().await;
            tokio::time::sleep(Duration::from_secs(5)).await;
            drop(conn);
        });

        let fetcher = HttpFetcher::with_retries(0)?;
        let url = format!("http://{addr}/search");
        let result = fetcher.get(&url, Duration::from_millis(100)).await;
        assert!(matches!(result, Err(CoreError::Timeout { url: ref u }) if *u == url));

        server.abort();
        Ok(())
    }

    #[tokio::test]
    async fn test_error_status_is_reported() -> Result<()> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        let addr = listener.local_addr()?;
        let server = tokio::spawn(async move {
            if let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = [0_u8; 1024];
                let _ = socket.read(&mut buf).await;
                let _ = socket
                    .write_all(b"HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                    .await;
            }
        });

        let fetcher = HttpFetcher::with_retries(0)?;
        let result = fetcher
            .get(&format!("http://{addr}/lyric?id=1"), Duration::from_secs(5))
            .await;
        assert!(matches!(result, Err(CoreError::HttpStatus { status: 404, .. })));

        server.abort();
        Ok(())
    }
}
