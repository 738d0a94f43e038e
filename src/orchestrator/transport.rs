//! Byte transport for component and artifact fetches

use crate::config::ServerConfig;
use crate::error::{Error, Result, TransportError};
use async_trait::async_trait;
use std::path::Path;
use std::time::Duration;
use tokio::io::AsyncWriteExt;
use url::Url;

/// Progress callback: bytes written so far and the expected total, if known
pub type ProgressFn<'a> = &'a (dyn Fn(u64, Option<u64>) + Send + Sync);

/// Moves the bytes behind a URL into a local file
///
/// Implementations create or truncate `destination`, write the whole body and
/// return the number of bytes written. Cancellation is handled by dropping
/// the returned future; the caller cleans up the partial file.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Fetch `url` into `destination`
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: ProgressFn<'_>,
    ) -> std::result::Result<u64, TransportError>;
}

/// HTTP(S) transport backed by reqwest
///
/// The request timeout bounds both the wait for response headers and the gap
/// between any two body chunks, so a stalled transfer fails instead of hanging.
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    idle_timeout: Duration,
}

impl HttpTransport {
    /// Build a transport from the server settings
    pub fn new(config: &ServerConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(Error::Network)?;

        Ok(Self {
            client,
            idle_timeout: config.request_timeout,
        })
    }

    fn timeout(&self, url: &Url) -> TransportError {
        TransportError::Timeout {
            url: url.to_string(),
            secs: self.idle_timeout.as_secs(),
        }
    }
}

fn request_error(url: &Url, error: reqwest::Error) -> TransportError {
    TransportError::Request {
        url: url.to_string(),
        transient: error.is_connect() || error.is_timeout() || error.is_body(),
        reason: error.to_string(),
    }
}

fn write_error(path: &Path, error: std::io::Error) -> TransportError {
    TransportError::Write {
        path: path.to_path_buf(),
        reason: error.to_string(),
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn fetch(
        &self,
        url: &Url,
        destination: &Path,
        progress: ProgressFn<'_>,
    ) -> std::result::Result<u64, TransportError> {
        let mut response = tokio::time::timeout(
            self.idle_timeout,
            self.client.get(url.clone()).send(),
        )
        .await
        .map_err(|_| self.timeout(url))?
        .map_err(|e| request_error(url, e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TransportError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }

        let total = response.content_length();
        let mut file = tokio::fs::File::create(destination)
            .await
            .map_err(|e| write_error(destination, e))?;

        let mut written: u64 = 0;
        progress(0, total);

        loop {
            let chunk = tokio::time::timeout(self.idle_timeout, response.chunk())
                .await
                .map_err(|_| self.timeout(url))?
                .map_err(|e| request_error(url, e))?;

            let Some(chunk) = chunk else { break };

            file.write_all(&chunk)
                .await
                .map_err(|e| write_error(destination, e))?;
            written += chunk.len() as u64;
            progress(written, total);
        }

        file.flush().await.map_err(|e| write_error(destination, e))?;
        file.sync_all()
            .await
            .map_err(|e| write_error(destination, e))?;

        if let Some(expected) = total
            && written != expected
        {
            return Err(TransportError::Request {
                url: url.to_string(),
                reason: format!("body ended after {written} of {expected} bytes"),
                transient: true,
            });
        }

        tracing::debug!(url = %url, bytes = written, "Transfer complete");
        Ok(written)
    }
}
