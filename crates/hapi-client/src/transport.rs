//! HTTP access to HAPI servers.
//!
//! The orchestrator only talks to a server through [`Transport`], so tests
//! can substitute an in-process server and callers can plug in their own
//! retry or authentication policy.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;
use reqwest::Client;
use serde_json::Value;
use tokio::fs::{self, File};
use tokio::io::AsyncWriteExt;
use tracing::{debug, instrument};

use hapi_common::{HapiError, HapiResult, Status};

/// Minimal request surface the client needs from a server.
#[async_trait]
pub trait Transport: Send + Sync {
    /// GET `url` and return the body.
    async fn get_bytes(&self, url: &str) -> HapiResult<Bytes>;

    /// GET `url` and parse the body as JSON.
    async fn get_json(&self, url: &str) -> HapiResult<Value> {
        let body = self.get_bytes(url).await?;
        serde_json::from_slice(&body)
            .map_err(|e| HapiError::transport(url, format!("response is not JSON: {}", e)))
    }

    /// GET `url` into the file at `path`, returning the number of bytes written.
    async fn download_to(&self, url: &str, path: &Path) -> HapiResult<u64> {
        let body = self.get_bytes(url).await?;
        fs::write(path, &body).await?;
        Ok(body.len() as u64)
    }
}

/// Configuration for [`HttpTransport`].
#[derive(Debug, Clone)]
pub struct HttpTransportConfig {
    /// Whole-request timeout
    pub request_timeout: Duration,
    /// TCP connect timeout
    pub connect_timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpTransportConfig {
    fn default() -> Self {
        Self {
            request_timeout: Duration::from_secs(600), // 10 minutes
            connect_timeout: Duration::from_secs(30),
            user_agent: format!("hapi-client/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

/// [`Transport`] over `reqwest`. Non-2xx responses are errors; nothing is retried.
pub struct HttpTransport {
    client: Client,
}

impl HttpTransport {
    pub fn new(config: HttpTransportConfig) -> HapiResult<Self> {
        let client = Client::builder()
            .timeout(config.request_timeout)
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent)
            .pool_max_idle_per_host(4)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| HapiError::transport("", format!("failed to create HTTP client: {}", e)))?;

        Ok(Self { client })
    }

    async fn send(&self, url: &str) -> HapiResult<reqwest::Response> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| HapiError::transport(url, e))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.bytes().await.unwrap_or_default();
            if let Some(err) = Status::error_in(&body, url) {
                return Err(err);
            }
            return Err(HapiError::transport(url, format!("HTTP {}", status)));
        }
        Ok(response)
    }
}

#[async_trait]
impl Transport for HttpTransport {
    #[instrument(skip(self))]
    async fn get_bytes(&self, url: &str) -> HapiResult<Bytes> {
        let body = self
            .send(url)
            .await?
            .bytes()
            .await
            .map_err(|e| HapiError::transport(url, format!("error reading body: {}", e)))?;
        debug!(bytes = body.len(), "Response received");
        Ok(body)
    }

    #[instrument(skip(self), fields(path = %path.display()))]
    async fn download_to(&self, url: &str, path: &Path) -> HapiResult<u64> {
        let response = self.send(url).await?;
        let mut file = File::create(path).await?;

        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk
                .map_err(|e| HapiError::transport(url, format!("error reading body: {}", e)))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }

        // Flush and sync
        file.flush().await?;
        file.sync_all().await?;

        debug!(bytes = written, "Download complete");
        Ok(written)
    }
}
