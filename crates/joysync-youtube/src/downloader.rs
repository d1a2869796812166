//! Media downloader: streams video bytes into the local asset directory.

use async_trait::async_trait;
use futures::StreamExt;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tracing::debug;

/// Download failures, split by whether a retry can help.
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Upstream says the media is gone (404) or locked (403). Terminal.
    #[error("media gone upstream: {0}")]
    Gone(String),

    /// Transport or server-side failure; retriable with backoff.
    #[error("transient download failure: {0}")]
    Transient(String),

    /// Local filesystem failure while staging bytes.
    #[error("asset staging failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for downloads.
pub type DownloadResult<T> = Result<T, DownloadError>;

/// Streams media bytes for a video into a destination path.
#[async_trait]
pub trait MediaDownloader: Send + Sync {
    /// Download the media for `video_id`; returns the byte size staged.
    async fn download_media(&self, video_id: &str, dest: &Path) -> DownloadResult<u64>;

    /// Download a thumbnail by url.
    async fn download_thumbnail(&self, url: &str, dest: &Path) -> DownloadResult<u64>;
}

/// HTTP downloader resolving media through a stream-resolver gateway.
pub struct HttpMediaDownloader {
    /// Gateway that turns a video id into a media byte stream.
    resolver_base_url: String,
    http: reqwest::Client,
}

impl HttpMediaDownloader {
    pub fn new(resolver_base_url: String, request_timeout: Duration) -> DownloadResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| DownloadError::Transient(e.to_string()))?;
        Ok(Self {
            resolver_base_url,
            http,
        })
    }

    /// Stream a url to `dest` through a temp file and an atomic rename.
    async fn stream_to_file(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
        let response = self
            .http
            .get(url)
            .send()
            .await
            .map_err(|e| DownloadError::Transient(e.to_string()))?;

        let status = response.status();
        if status == reqwest::StatusCode::NOT_FOUND || status == reqwest::StatusCode::FORBIDDEN {
            return Err(DownloadError::Gone(format!("{} for {}", status, url)));
        }
        if !status.is_success() {
            return Err(DownloadError::Transient(format!("{} for {}", status, url)));
        }

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let temp = dest.with_extension("tmp");
        let mut file = tokio::fs::File::create(&temp).await?;

        let mut written = 0u64;
        let mut stream = response.bytes_stream();
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| DownloadError::Transient(e.to_string()))?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;
        drop(file);

        tokio::fs::rename(&temp, dest).await?;
        debug!(url = %url, bytes = written, dest = %dest.display(), "Asset staged");
        Ok(written)
    }
}

#[async_trait]
impl MediaDownloader for HttpMediaDownloader {
    async fn download_media(&self, video_id: &str, dest: &Path) -> DownloadResult<u64> {
        let url = format!("{}/{}", self.resolver_base_url.trim_end_matches('/'), video_id);
        self.stream_to_file(&url, dest).await
    }

    async fn download_thumbnail(&self, url: &str, dest: &Path) -> DownloadResult<u64> {
        self.stream_to_file(url, dest).await
    }
}
