//! Consul KV over its HTTP API.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use shardlab_core::RetryPolicy;
use std::time::Duration;
use tracing::{debug, info};

use crate::error::{Result, StoreError};
use crate::kv::KvStore;

/// Default HTTP port of a Consul agent.
pub const DEFAULT_CONSUL_PORT: u16 = 8500;

const KV_PATH: &str = "/v1/kv";
const REQUEST_TIMEOUT: Duration = Duration::from_secs(5);

/// Key/value client for a Consul agent.
#[derive(Debug, Clone)]
pub struct ConsulKv {
    client: Client,
    base_url: String,
    retry: RetryPolicy,
}

impl ConsulKv {
    /// Creates a client for the agent at `base_url` (e.g. `http://127.0.0.1:8500`).
    pub fn new(base_url: impl Into<String>) -> Result<Self> {
        let client = Client::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            retry: RetryPolicy::default(),
        })
    }

    /// Creates a client for an agent on localhost.
    pub fn localhost(port: u16) -> Result<Self> {
        Self::new(format!("http://127.0.0.1:{port}"))
    }

    /// Sets the retry policy applied to each request.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Returns the agent base URL.
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn key_url(&self, key: &str) -> String {
        format!("{}{KV_PATH}/{}", self.base_url, key.trim_start_matches('/'))
    }

    /// Waits until the agent answers KV reads.
    ///
    /// A freshly started agent accepts connections before its KV endpoint
    /// works, so readiness is a successful read of any key.
    pub async fn wait_ready(&self, attempts: u32, interval: Duration) -> Result<()> {
        let probe = RetryPolicy::new(attempts, interval);
        probe
            .run("consul readiness", || self.get_once("shardlab/ready"))
            .await
            .map_err(|e| {
                debug!(error = %e, "Consul readiness probe failed");
                StoreError::NotReady {
                    address: self.base_url.clone(),
                    attempts,
                }
            })?;
        info!(address = %self.base_url, "Consul is ready");
        Ok(())
    }

    async fn get_once(&self, key: &str) -> Result<Option<String>> {
        let response = self
            .client
            .get(format!("{}?raw", self.key_url(key)))
            .send()
            .await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => Ok(Some(response.text().await?)),
            status => {
                let body = response.text().await.unwrap_or_default();
                Err(StoreError::status(key, status.as_u16(), body))
            }
        }
    }

    async fn put_once(&self, key: &str, value: &str) -> Result<()> {
        let response = self
            .client
            .put(self.key_url(key))
            .body(value.to_string())
            .send()
            .await?;

        let status = response.status();
        let body = response.text().await.unwrap_or_default();
        if !status.is_success() {
            return Err(StoreError::status(key, status.as_u16(), body));
        }
        // the agent answers `false` when a write was not applied
        if body.trim() == "false" {
            return Err(StoreError::WriteRejected(key.to_string()));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for ConsulKv {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        self.retry.run("consul get", || self.get_once(key)).await
    }

    async fn put(&self, key: &str, value: &str) -> Result<()> {
        debug!(key, bytes = value.len(), "Writing key to Consul");
        self.retry.run("consul put", || self.put_once(key, value)).await
    }

    fn name(&self) -> &str {
        "consul"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Serves one canned HTTP response and returns the request line it saw.
    async fn serve_once(response: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let url = format!("http://{}", listener.local_addr().unwrap());

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let mut request = Vec::new();
            loop {
                let n = socket.read(&mut buf).await.unwrap();
                request.extend_from_slice(&buf[..n]);
                if n == 0 || request.windows(4).any(|w| w == b"\r\n\r\n") {
                    break;
                }
            }
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();
            let text = String::from_utf8_lossy(&request).to_string();
            text.lines().next().unwrap_or_default().to_string()
        });

        (url, handle)
    }

    #[test]
    fn test_key_url() {
        let kv = ConsulKv::new("http://consul:8500/").unwrap();
        assert_eq!(kv.base_url(), "http://consul:8500");
        assert_eq!(
            kv.key_url("autovshard/c/autovshard_cfg_yaml"),
            "http://consul:8500/v1/kv/autovshard/c/autovshard_cfg_yaml"
        );
        assert_eq!(kv.key_url("/a"), "http://consul:8500/v1/kv/a");
    }

    #[tokio::test]
    async fn test_missing_key_is_none() {
        let (url, server) =
            serve_once("HTTP/1.1 404 Not Found\r\ncontent-length: 0\r\nconnection: close\r\n\r\n")
                .await;
        let kv = ConsulKv::new(url).unwrap().with_retry(RetryPolicy::none());

        assert_eq!(kv.get("autovshard/x").await.unwrap(), None);
        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /v1/kv/autovshard/x?raw"));
    }

    #[tokio::test]
    async fn test_raw_value_is_returned() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-length: 11\r\nconnection: close\r\n\r\nbucket: 100",
        )
        .await;
        let kv = ConsulKv::new(url).unwrap().with_retry(RetryPolicy::none());

        assert_eq!(kv.get("k").await.unwrap().as_deref(), Some("bucket: 100"));
        server.await.unwrap();
    }

    #[tokio::test]
    async fn test_rejected_put() {
        let (url, server) = serve_once(
            "HTTP/1.1 200 OK\r\ncontent-length: 5\r\nconnection: close\r\n\r\nfalse",
        )
        .await;
        let kv = ConsulKv::new(url).unwrap().with_retry(RetryPolicy::none());

        let err = kv.put("k", "v").await.unwrap_err();
        assert!(matches!(err, StoreError::WriteRejected(_)));
        assert!(server.await.unwrap().starts_with("PUT /v1/kv/k"));
    }
}
