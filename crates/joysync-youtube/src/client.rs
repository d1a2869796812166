//! Data API client over HTTP.

use crate::{RefreshedTokens, YoutubeClient, YoutubeError, YoutubeResult, YtChannel, YtVideo};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Items requested per playlist page.
const PAGE_SIZE: u32 = 50;

/// Configuration for the Data API client.
#[derive(Debug, Clone)]
pub struct DataApiConfig {
    /// API root, e.g. `https://www.googleapis.com/youtube/v3`.
    pub api_base_url: String,
    /// Token endpoint for refresh exchanges.
    pub token_url: String,
    /// OAuth client id.
    pub client_id: String,
    /// OAuth client secret.
    pub client_secret: String,
    /// Overall deadline per request.
    pub request_timeout: Duration,
}

impl Default for DataApiConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://www.googleapis.com/youtube/v3".to_string(),
            token_url: "https://oauth2.googleapis.com/token".to_string(),
            client_id: String::new(),
            client_secret: String::new(),
            request_timeout: Duration::from_secs(30),
        }
    }
}

/// HTTP implementation of [`YoutubeClient`].
pub struct DataApiClient {
    config: DataApiConfig,
    http: reqwest::Client,
}

impl DataApiClient {
    pub fn new(config: DataApiConfig) -> YoutubeResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()
            .map_err(|e| YoutubeError::Transport(e.to_string()))?;
        Ok(Self { config, http })
    }

    /// Classify a non-success response into the error taxonomy.
    async fn classify_error(response: reqwest::Response, subject: &str) -> YoutubeError {
        let status = response.status();
        let body = response.text().await.unwrap_or_default();

        if status == reqwest::StatusCode::UNAUTHORIZED {
            return YoutubeError::AuthFailed(subject.to_string());
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            // The API reports quota exhaustion as 403 with a reason code.
            if body.contains("quotaExceeded") || body.contains("dailyLimitExceeded") {
                return YoutubeError::QuotaLimitExceeded;
            }
            return YoutubeError::AuthFailed(subject.to_string());
        }
        if status == reqwest::StatusCode::NOT_FOUND {
            return YoutubeError::ChannelNotFound(subject.to_string());
        }
        YoutubeError::UnexpectedResponse(format!("{}: {}", status, body))
    }
}

#[derive(Deserialize)]
struct ListEnvelope<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
    #[serde(rename = "nextPageToken")]
    next_page_token: Option<String>,
}

#[derive(Deserialize)]
struct ChannelItem {
    id: String,
    snippet: ChannelSnippet,
    statistics: ChannelStatistics,
    #[serde(rename = "contentDetails")]
    content_details: ChannelContentDetails,
}

#[derive(Deserialize)]
struct ChannelSnippet {
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "publishedAt")]
    published_at: DateTime<Utc>,
    thumbnails: Thumbnails,
}

#[derive(Deserialize)]
struct ChannelStatistics {
    #[serde(rename = "subscriberCount", default)]
    subscriber_count: String,
    #[serde(rename = "videoCount", default)]
    video_count: String,
}

#[derive(Deserialize)]
struct ChannelContentDetails {
    #[serde(rename = "relatedPlaylists")]
    related_playlists: RelatedPlaylists,
}

#[derive(Deserialize)]
struct RelatedPlaylists {
    uploads: String,
}

#[derive(Deserialize, Default)]
struct Thumbnails {
    #[serde(default)]
    high: Option<Thumbnail>,
    #[serde(default)]
    default: Option<Thumbnail>,
}

#[derive(Deserialize)]
struct Thumbnail {
    url: String,
}

impl Thumbnails {
    fn best_url(&self) -> String {
        self.high
            .as_ref()
            .or(self.default.as_ref())
            .map(|t| t.url.clone())
            .unwrap_or_default()
    }
}

#[derive(Deserialize)]
struct VideoItem {
    id: String,
    snippet: VideoSnippet,
    #[serde(rename = "contentDetails")]
    content_details: VideoContentDetails,
    status: VideoStatus,
    #[serde(default)]
    statistics: Option<VideoStatistics>,
}

#[derive(Deserialize)]
struct VideoSnippet {
    #[serde(rename = "channelId")]
    channel_id: String,
    title: String,
    #[serde(default)]
    description: String,
    #[serde(rename = "publishedAt")]
    published_at: DateTime<Utc>,
    thumbnails: Thumbnails,
    #[serde(rename = "liveBroadcastContent", default)]
    live_broadcast_content: String,
}

#[derive(Deserialize)]
struct VideoContentDetails {
    duration: String,
}

#[derive(Deserialize)]
struct VideoStatus {
    #[serde(rename = "uploadStatus", default)]
    upload_status: String,
    #[serde(rename = "privacyStatus", default)]
    privacy_status: String,
    #[serde(default)]
    license: String,
}

#[derive(Deserialize)]
struct VideoStatistics {
    #[serde(rename = "viewCount", default)]
    view_count: String,
}

#[derive(Deserialize)]
struct PlaylistItem {
    #[serde(rename = "contentDetails")]
    content_details: PlaylistItemContentDetails,
}

#[derive(Deserialize)]
struct PlaylistItemContentDetails {
    #[serde(rename = "videoId")]
    video_id: String,
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    refresh_token: Option<String>,
}

#[async_trait]
impl YoutubeClient for DataApiClient {
    async fn channel(&self, access_token: &str, channel_id: &str) -> YoutubeResult<YtChannel> {
        let url = format!(
            "{}/channels?part=snippet,statistics,contentDetails&id={}",
            self.config.api_base_url, channel_id
        );
        let response = self.http.get(&url).bearer_auth(access_token).send().await?;
        if !response.status().is_success() {
            return Err(Self::classify_error(response, channel_id).await);
        }

        let envelope: ListEnvelope<ChannelItem> = response.json().await?;
        let item = envelope
            .items
            .into_iter()
            .next()
            .ok_or_else(|| YoutubeError::ChannelNotFound(channel_id.to_string()))?;

        Ok(YtChannel {
            id: item.id,
            title: item.snippet.title,
            description: item.snippet.description,
            thumbnail_url: item.snippet.thumbnails.best_url(),
            uploads_playlist_id: item.content_details.related_playlists.uploads,
            subscriber_count: item.statistics.subscriber_count.parse().unwrap_or(0),
            video_count: item.statistics.video_count.parse().unwrap_or(0),
            published_at: item.snippet.published_at,
        })
    }

    async fn uploads(&self, access_token: &str, playlist_id: &str) -> YoutubeResult<Vec<YtVideo>> {
        // Walk the playlist pages collecting video ids, then hydrate them.
        let mut video_ids = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let mut url = format!(
                "{}/playlistItems?part=contentDetails&maxResults={}&playlistId={}",
                self.config.api_base_url, PAGE_SIZE, playlist_id
            );
            if let Some(ref token) = page_token {
                url.push_str(&format!("&pageToken={}", token));
            }

            let response = self.http.get(&url).bearer_auth(access_token).send().await?;
            if !response.status().is_success() {
                return Err(Self::classify_error(response, playlist_id).await);
            }

            let envelope: ListEnvelope<PlaylistItem> = response.json().await?;
            video_ids.extend(envelope.items.into_iter().map(|i| i.content_details.video_id));

            match envelope.next_page_token {
                Some(token) => page_token = Some(token),
                None => break,
            }
        }

        debug!(playlist_id = %playlist_id, videos = video_ids.len(), "Playlist walked");

        let mut videos = Vec::with_capacity(video_ids.len());
        for chunk in video_ids.chunks(PAGE_SIZE as usize) {
            let url = format!(
                "{}/videos?part=snippet,contentDetails,status,statistics&id={}",
                self.config.api_base_url,
                chunk.join(",")
            );
            let response = self.http.get(&url).bearer_auth(access_token).send().await?;
            if !response.status().is_success() {
                return Err(Self::classify_error(response, playlist_id).await);
            }

            let envelope: ListEnvelope<VideoItem> = response.json().await?;
            for item in envelope.items {
                videos.push(YtVideo {
                    duration_s: parse_iso8601_duration(&item.content_details.duration)
                        .unwrap_or_else(|| {
                            warn!(video_id = %item.id, raw = %item.content_details.duration, "Unparseable duration");
                            0
                        }),
                    id: item.id,
                    channel_id: item.snippet.channel_id,
                    title: item.snippet.title,
                    description: item.snippet.description,
                    thumbnail_url: item.snippet.thumbnails.best_url(),
                    published_at: item.snippet.published_at,
                    upload_status: item.status.upload_status,
                    privacy_status: item.status.privacy_status,
                    live_broadcast_content: item.snippet.live_broadcast_content,
                    license: item.status.license,
                    view_count: item
                        .statistics
                        .map(|s| s.view_count.parse().unwrap_or(0))
                        .unwrap_or(0),
                });
            }
        }

        Ok(videos)
    }

    async fn refresh_token(&self, refresh_token: &str) -> YoutubeResult<RefreshedTokens> {
        let params = [
            ("client_id", self.config.client_id.as_str()),
            ("client_secret", self.config.client_secret.as_str()),
            ("refresh_token", refresh_token),
            ("grant_type", "refresh_token"),
        ];

        let response = self.http.post(&self.config.token_url).form(&params).send().await?;
        if !response.status().is_success() {
            return Err(YoutubeError::AuthFailed("refresh token rejected".to_string()));
        }

        let token: TokenResponse = response.json().await?;
        Ok(RefreshedTokens {
            access_token: token.access_token,
            refresh_token: token.refresh_token,
        })
    }
}

/// Parse an ISO-8601 duration of the `PT#H#M#S` family into seconds.
fn parse_iso8601_duration(raw: &str) -> Option<u64> {
    let rest = raw.strip_prefix("PT").or_else(|| raw.strip_prefix("P"))?;
    let mut seconds = 0u64;
    let mut number = String::new();
    for ch in rest.chars() {
        if ch.is_ascii_digit() {
            number.push(ch);
            continue;
        }
        let value: u64 = number.parse().ok()?;
        number.clear();
        match ch {
            'D' => seconds += value * 86_400,
            'H' => seconds += value * 3_600,
            'M' => seconds += value * 60,
            'S' => seconds += value,
            _ => return None,
        }
    }
    if !number.is_empty() {
        return None;
    }
    Some(seconds)
}
