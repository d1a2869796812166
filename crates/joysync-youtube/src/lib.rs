//! Upstream video platform edge: metadata API client and media downloader.
//!
//! The metadata client speaks the platform's Data API (channel lookup,
//! uploads playlist, token refresh) behind a trait so the pipeline can run
//! against mocks. Every metadata call costs one unit of the daily quota;
//! the caller reserves before dialing out.

mod client;
mod downloader;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;

pub use client::{DataApiClient, DataApiConfig};
pub use downloader::{DownloadError, DownloadResult, HttpMediaDownloader, MediaDownloader};

/// Errors from the upstream metadata API.
#[derive(Debug, Error)]
pub enum YoutubeError {
    /// Channel does not exist upstream.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// Video does not exist upstream (or is permanently private).
    #[error("video not found: {0}")]
    VideoNotFound(String),

    /// Channel already enrolled under a different user.
    #[error("channel already registered: {0}")]
    ChannelAlreadyRegistered(String),

    /// Channel is suspended upstream.
    #[error("channel status suspended: {0}")]
    ChannelStatusSuspended(String),

    /// Onboarding criteria unmet: too few subscribers.
    #[error("channel has fewer than {required} subscribers")]
    CriteriaSubscribers { required: u64 },

    /// Onboarding criteria unmet: too few videos.
    #[error("channel has fewer than {required} videos")]
    CriteriaVideos { required: u64 },

    /// Onboarding criteria unmet: channel too young.
    #[error("channel created after {required}")]
    CriteriaCreationDate { required: DateTime<Utc> },

    /// The daily API quota is exhausted.
    #[error("api quota limit exceeded")]
    QuotaLimitExceeded,

    /// Authorization was rejected (expired or revoked token).
    #[error("authorization failed: {0}")]
    AuthFailed(String),

    /// Transport-level failure; retriable.
    #[error("transport error: {0}")]
    Transport(String),

    /// Response shape was not what the API promises.
    #[error("unexpected response: {0}")]
    UnexpectedResponse(String),
}

impl From<reqwest::Error> for YoutubeError {
    fn from(e: reqwest::Error) -> Self {
        YoutubeError::Transport(e.to_string())
    }
}

/// Result type alias for metadata API operations.
pub type YoutubeResult<T> = Result<T, YoutubeError>;

/// Channel metadata as reported upstream.
#[derive(Debug, Clone)]
pub struct YtChannel {
    pub id: String,
    pub title: String,
    pub description: String,
    pub thumbnail_url: String,
    pub uploads_playlist_id: String,
    pub subscriber_count: u64,
    pub video_count: u64,
    pub published_at: DateTime<Utc>,
}

/// Video metadata as reported upstream.
#[derive(Debug, Clone)]
pub struct YtVideo {
    pub id: String,
    pub channel_id: String,
    pub title: String,
    pub description: String,
    pub duration_s: u64,
    pub thumbnail_url: String,
    pub published_at: DateTime<Utc>,
    pub upload_status: String,
    pub privacy_status: String,
    pub live_broadcast_content: String,
    pub license: String,
    pub view_count: u64,
}

/// Fresh OAuth tokens from a refresh exchange.
#[derive(Debug, Clone)]
pub struct RefreshedTokens {
    pub access_token: String,
    /// Present when the provider rotated the refresh token.
    pub refresh_token: Option<String>,
}

/// Metadata API operations the pipeline consumes.
///
/// Trait-shaped so tests can substitute canned upstream state without a
/// network.
#[async_trait]
pub trait YoutubeClient: Send + Sync {
    /// Fetch a channel by id.
    async fn channel(&self, access_token: &str, channel_id: &str) -> YoutubeResult<YtChannel>;

    /// Fetch the full uploads playlist of a channel, following pagination.
    async fn uploads(&self, access_token: &str, playlist_id: &str) -> YoutubeResult<Vec<YtVideo>>;

    /// Exchange a refresh token for a fresh access token.
    async fn refresh_token(&self, refresh_token: &str) -> YoutubeResult<RefreshedTokens>;
}
