//! HTTP access for index pages, detail pages and media downloads
//!
//! A single GET per call, no retries. Non-success status codes are errors.

use crate::config::Config;
use crate::error::{Error, FetchError, Result};
use crate::utils::{ensure_parent_dir, part_path};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tracing::{debug, warn};
use url::Url;

/// Shared HTTP client (cheap to clone; clones share one connection pool)
#[derive(Clone, Debug)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    /// Create a client with the configured timeout and user agent
    ///
    /// # Errors
    /// Returns error if the HTTP client cannot be created
    pub fn new(config: &Config) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .user_agent(config.user_agent.clone())
            .build()
            .map_err(|e| Error::Other(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    async fn get(&self, url: &Url) -> std::result::Result<reqwest::Response, FetchError> {
        let response = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?;

        let status = response.status();
        if !status.is_success() {
            return Err(FetchError::Status {
                url: url.to_string(),
                status: status.as_u16(),
            });
        }
        Ok(response)
    }

    /// GET a page and return its body as text
    pub async fn get_text(&self, url: &Url) -> std::result::Result<String, FetchError> {
        debug!(url = %url, "GET");
        self.get(url)
            .await?
            .text()
            .await
            .map_err(|e| FetchError::from_reqwest(url.as_str(), e))
    }

    /// Stream `url` into `dest`, returning the number of bytes written.
    ///
    /// Bytes go to a `.part` sibling first and are renamed over `dest` once the
    /// body is complete, so `dest` only ever exists fully written. The `.part`
    /// file is removed when the transfer fails or the future is dropped.
    pub async fn download(&self, url: &Url, dest: &Path) -> Result<u64> {
        ensure_parent_dir(dest).await?;

        let mut response = self.get(url).await?;
        let mut part = PartFile::new(part_path(dest));

        let written = stream_to_file(&mut response, url, part.path()).await?;

        tokio::fs::rename(part.path(), dest)
            .await
            .map_err(|e| Error::Finalize {
                path: dest.to_path_buf(),
                reason: e.to_string(),
            })?;
        part.persisted();

        debug!(url = %url, path = %dest.display(), bytes = written, "Download complete");
        Ok(written)
    }
}

/// Removes an in-progress `.part` file on drop unless it was renamed into place
struct PartFile {
    path: PathBuf,
    persisted: bool,
}

impl PartFile {
    fn new(path: PathBuf) -> Self {
        Self {
            path,
            persisted: false,
        }
    }

    fn path(&self) -> &Path {
        &self.path
    }

    fn persisted(&mut self) {
        self.persisted = true;
    }
}

impl Drop for PartFile {
    fn drop(&mut self) {
        if self.persisted {
            return;
        }
        // drop cannot await
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "Failed to remove partial download");
        }
    }
}

async fn stream_to_file(response: &mut reqwest::Response, url: &Url, part: &Path) -> Result<u64> {
    let mut file = tokio::fs::File::create(part).await?;
    let mut written = 0u64;

    while let Some(chunk) = response
        .chunk()
        .await
        .map_err(|e| FetchError::from_reqwest(url.as_str(), e))?
    {
        file.write_all(&chunk).await?;
        written += chunk.len() as u64;
    }

    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
