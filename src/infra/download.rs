//! HTTP transfer functionality
//!
//! Handles fetching metadata, streaming artifact downloads to disk while
//! hashing them, and idempotent uploads with retry and exponential backoff.

use futures::StreamExt;
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::config::defaults;
use crate::error::DownloadError;

/// Download result containing file path and metadata
#[derive(Debug, Clone)]
pub struct DownloadResult {
    /// Path to the downloaded file
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// SHA256 checksum of the downloaded content
    pub checksum: String,
}

/// HTTP transfer manager
#[derive(Debug, Clone)]
pub struct DownloadManager {
    /// HTTP client
    client: reqwest::Client,
    /// Maximum attempts for uploads
    max_retries: u32,
    /// Base delay for exponential backoff (in milliseconds)
    base_delay_ms: u64,
}

impl DownloadManager {
    /// Create a new download manager with the default per-request timeout
    pub fn new() -> Self {
        Self::with_timeout(Duration::from_secs(defaults::SERVER_TIMEOUT_SECS))
    }

    /// Create a download manager that gives up on a server which does not
    /// connect, or goes silent, for `timeout`
    ///
    /// There is no deadline on a whole transfer: a large blob that keeps
    /// arriving may take as long as the caller's overall budget allows.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self {
            client: build_client(timeout),
            max_retries: defaults::MAX_UPLOAD_RETRIES,
            base_delay_ms: 1000,
        }
    }

    /// Create a download manager with custom retry settings
    pub fn with_config(max_retries: u32, base_delay_ms: u64) -> Self {
        Self {
            client: build_client(Duration::from_secs(defaults::SERVER_TIMEOUT_SECS)),
            max_retries: max_retries.max(1),
            base_delay_ms,
        }
    }

    /// Get max retries
    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Fetch a small text document; `Ok(None)` when the server answers 404
    pub async fn fetch_text(&self, url: &str) -> Result<Option<String>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        response
            .text()
            .await
            .map(Some)
            .map_err(|e| network_error(url, &e))
    }

    /// Stream a file to `dest`, hashing it on the way
    ///
    /// A single attempt: callers decide whether to retry. Returns `Ok(None)`
    /// when the server answers 404. A partially written file is removed on
    /// failure.
    pub async fn download(
        &self,
        url: &str,
        dest: &Path,
    ) -> Result<Option<DownloadResult>, DownloadError> {
        let result = self.download_once(url, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn download_once(
        &self,
        url: &str,
        dest: &Path,
    ) -> Result<Option<DownloadResult>, DownloadError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| network_error(url, &e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }

        // Create parent directories if needed
        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::IoError {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
        }

        let mut file = File::create(dest)
            .await
            .map_err(|e| DownloadError::IoError {
                path: dest.to_path_buf(),
                error: e.to_string(),
            })?;

        let mut hasher = Sha256::new();
        let mut downloaded: u64 = 0;
        let mut stream = response.bytes_stream();

        while let Some(chunk_result) = stream.next().await {
            let chunk = chunk_result.map_err(|e| network_error(url, &e))?;

            file.write_all(&chunk)
                .await
                .map_err(|e| DownloadError::IoError {
                    path: dest.to_path_buf(),
                    error: e.to_string(),
                })?;

            hasher.update(&chunk);
            downloaded += chunk.len() as u64;
        }

        file.flush().await.map_err(|e| DownloadError::IoError {
            path: dest.to_path_buf(),
            error: e.to_string(),
        })?;

        Ok(Some(DownloadResult {
            path: dest.to_path_buf(),
            size: downloaded,
            checksum: hex::encode(hasher.finalize()),
        }))
    }

    /// PUT `body` at `url`, retrying transient failures with exponential backoff
    ///
    /// Uploads are idempotent, so repeating one after a lost response is safe.
    /// Client errors (4xx) are returned immediately.
    pub async fn upload(
        &self,
        url: &str,
        body: Vec<u8>,
        basic_auth: Option<(&str, &str)>,
    ) -> Result<(), DownloadError> {
        let mut attempts = 0;
        let mut last_error = None;
        let mut delay_ms = self.base_delay_ms;

        while attempts < self.max_retries {
            attempts += 1;

            match self.upload_once(url, body.clone(), basic_auth).await {
                Ok(()) => return Ok(()),
                Err(e @ DownloadError::HttpStatus { status, .. }) if (400..500).contains(&status) => {
                    return Err(e);
                }
                Err(e) => {
                    tracing::debug!("Upload attempt {attempts} to {url} failed: {e}");
                    last_error = Some(e);

                    if attempts < self.max_retries {
                        // Exponential backoff with cap at 30 seconds
                        tokio::time::sleep(Duration::from_millis(delay_ms)).await;
                        delay_ms = (delay_ms * 2).min(30_000);
                    }
                }
            }
        }

        Err(last_error.unwrap_or_else(|| DownloadError::MaxRetriesExceeded {
            url: url.to_string(),
            retries: self.max_retries,
        }))
    }

    async fn upload_once(
        &self,
        url: &str,
        body: Vec<u8>,
        basic_auth: Option<(&str, &str)>,
    ) -> Result<(), DownloadError> {
        let mut request = self.client.put(url).body(body);
        if let Some((username, password)) = basic_auth {
            request = request.basic_auth(username, Some(password));
        }

        let response = request.send().await.map_err(|e| network_error(url, &e))?;
        if !response.status().is_success() {
            return Err(DownloadError::HttpStatus {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        Ok(())
    }
}

impl Default for DownloadManager {
    fn default() -> Self {
        Self::new()
    }
}

fn build_client(timeout: Duration) -> reqwest::Client {
    reqwest::Client::builder()
        .connect_timeout(timeout)
        .read_timeout(timeout)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
}

fn network_error(url: &str, e: &reqwest::Error) -> DownloadError {
    if e.is_timeout() {
        return DownloadError::Timeout {
            url: url.to_string(),
        };
    }
    DownloadError::NetworkError {
        url: url.to_string(),
        error: e.to_string(),
    }
}
