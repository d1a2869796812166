//! Durable state store for tracked channels and videos.
//!
//! Three tables (`channels`, `videos`, `whitelist_channels`), each held in
//! memory under a per-table mutex and persisted to one JSON document in the
//! data directory. Every write rewrites the table file through a temp file
//! and an atomic rename, so a failed put leaves the prior durable record
//! intact. All operations on a table serialize through its mutex; list
//! reads take the same mutex for snapshot consistency.

mod registry;

use chrono::Utc;
use joysync_types::{
    ChannelRecord, CreatorAction, DomainError, VideoRecord, VideoState, WhitelistEntry,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

pub use registry::CreatorRegistry;

/// Attempts before a bulk write gives up on persisting.
const BATCH_PUT_MAX_ATTEMPTS: u32 = 5;

/// State store errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Transport failure talking to the backing storage.
    #[error("store not connected: {0}")]
    NotConnected(String),

    /// Persisted table content could not be decoded.
    #[error("corrupt table {table}: {message}")]
    Corrupt {
        table: &'static str,
        message: String,
    },

    /// Domain rule rejected the write; the stored record is unchanged.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// Channel not present in the store.
    #[error("channel not found: {user_id}/{channel_id}")]
    ChannelNotFound { user_id: String, channel_id: String },

    /// Video not present in the store.
    #[error("video not found: {channel_id}/{video_id}")]
    VideoNotFound { channel_id: String, video_id: String },

    /// Bulk write could not drain its unprocessed set.
    #[error("batch put gave up after {attempts} attempts")]
    BatchRetriesExhausted { attempts: u32 },
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::NotConnected(e.to_string())
    }
}

/// Result type alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;

type ChannelKey = (String, String); // (user_id, channel_id)
type VideoKey = (String, String); // (channel_id, video_id)

/// The persistent mapping behind the sync pipeline.
pub struct StateStore {
    data_dir: PathBuf,
    channels: Mutex<BTreeMap<ChannelKey, ChannelRecord>>,
    videos: Mutex<BTreeMap<VideoKey, VideoRecord>>,
    whitelist: Mutex<BTreeMap<String, WhitelistEntry>>,
}

impl StateStore {
    /// Open the store, loading any previously persisted tables.
    pub async fn open(data_dir: impl AsRef<Path>) -> StoreResult<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&data_dir).await?;

        let channels: Vec<ChannelRecord> = load_table(&data_dir, "channels").await?;
        let videos: Vec<VideoRecord> = load_table(&data_dir, "videos").await?;
        let whitelist: Vec<WhitelistEntry> = load_table(&data_dir, "whitelist_channels").await?;

        tracing::info!(
            channels = channels.len(),
            videos = videos.len(),
            whitelist = whitelist.len(),
            data_dir = %data_dir.display(),
            "State store opened"
        );

        Ok(Self {
            data_dir,
            channels: Mutex::new(
                channels
                    .into_iter()
                    .map(|c| ((c.user_id.clone(), c.id.clone()), c))
                    .collect(),
            ),
            videos: Mutex::new(
                videos
                    .into_iter()
                    .map(|v| ((v.channel_id.clone(), v.id.clone()), v))
                    .collect(),
            ),
            whitelist: Mutex::new(
                whitelist
                    .into_iter()
                    .map(|w| (w.channel_handle.clone(), w))
                    .collect(),
            ),
        })
    }

    // ---- channels ----

    /// Upsert a channel. Patches every field except the primary key
    /// components; `updated_at` is stamped by the store.
    pub async fn put_channel(&self, mut channel: ChannelRecord) -> StoreResult<()> {
        let mut table = self.channels.lock().await;
        let key = (channel.user_id.clone(), channel.id.clone());
        channel.updated_at = Utc::now();
        if let Some(existing) = table.get(&key) {
            channel.created_at = existing.created_at;
        }
        table.insert(key, channel);
        persist_table(&self.data_dir, "channels", table.values()).await
    }

    /// Point lookup by `(user_id, channel_id)`.
    pub async fn get_channel(&self, user_id: &str, channel_id: &str) -> Option<ChannelRecord> {
        let table = self.channels.lock().await;
        table.get(&(user_id.to_string(), channel_id.to_string())).cloned()
    }

    /// Lookup by the external channel id alone.
    pub async fn channel_by_external_id(&self, channel_id: &str) -> Option<ChannelRecord> {
        let table = self.channels.lock().await;
        table.values().find(|c| c.id == channel_id).cloned()
    }

    /// Secondary-index lookup by on-chain channel id.
    pub async fn channel_by_joystream_id(&self, joystream_channel_id: u64) -> Option<ChannelRecord> {
        let table = self.channels.lock().await;
        table
            .values()
            .find(|c| c.joystream_channel_id == joystream_channel_id)
            .cloned()
    }

    /// Channels referred by the given on-chain channel id.
    pub async fn channels_by_referrer(&self, referrer_channel_id: u64) -> Vec<ChannelRecord> {
        let table = self.channels.lock().await;
        table
            .values()
            .filter(|c| c.referrer_channel_id == Some(referrer_channel_id))
            .cloned()
            .collect()
    }

    /// Snapshot of every channel record.
    pub async fn all_channels(&self) -> Vec<ChannelRecord> {
        let table = self.channels.lock().await;
        table.values().cloned().collect()
    }

    /// Verified channels, most recently enrolled first.
    pub async fn recent_verified_channels(&self, limit: usize) -> Vec<ChannelRecord> {
        let table = self.channels.lock().await;
        let mut verified: Vec<ChannelRecord> = table
            .values()
            .filter(|c| c.ypp_status.is_verified())
            .cloned()
            .collect();
        verified.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        verified.truncate(limit);
        verified
    }

    /// Read-modify-write a channel under the table critical section.
    pub async fn update_channel<F>(
        &self,
        user_id: &str,
        channel_id: &str,
        mutate: F,
    ) -> StoreResult<ChannelRecord>
    where
        F: FnOnce(&mut ChannelRecord) -> Result<(), DomainError>,
    {
        let mut table = self.channels.lock().await;
        let key = (user_id.to_string(), channel_id.to_string());
        let record = table.get_mut(&key).ok_or_else(|| StoreError::ChannelNotFound {
            user_id: user_id.to_string(),
            channel_id: channel_id.to_string(),
        })?;

        let mut candidate = record.clone();
        mutate(&mut candidate)?;
        candidate.updated_at = Utc::now();
        *record = candidate.clone();

        persist_table(&self.data_dir, "channels", table.values()).await?;
        Ok(candidate)
    }

    /// Apply a creator action to a channel, enforcing the replay guard.
    pub async fn apply_creator_action(
        &self,
        user_id: &str,
        channel_id: &str,
        action: &CreatorAction,
        timestamp: chrono::DateTime<Utc>,
    ) -> StoreResult<ChannelRecord> {
        self.update_channel(user_id, channel_id, |channel| {
            channel.apply_action(action, timestamp)
        })
        .await
    }

    // ---- videos ----

    /// Upsert a video. Patches every field except the primary key
    /// components; `updated_at` is stamped by the store.
    pub async fn put_video(&self, mut video: VideoRecord) -> StoreResult<()> {
        let mut table = self.videos.lock().await;
        let key = (video.channel_id.clone(), video.id.clone());
        video.updated_at = Utc::now();
        if let Some(existing) = table.get(&key) {
            video.created_at = existing.created_at;
        }
        table.insert(key, video);
        persist_table(&self.data_dir, "videos", table.values()).await
    }

    /// Best-effort bulk upsert; unprocessed items are retried until the set
    /// is empty or the attempt budget runs out.
    pub async fn batch_put_videos(&self, videos: Vec<VideoRecord>) -> StoreResult<()> {
        let mut table = self.videos.lock().await;
        let now = Utc::now();
        for mut video in videos {
            let key = (video.channel_id.clone(), video.id.clone());
            video.updated_at = now;
            if let Some(existing) = table.get(&key) {
                video.created_at = existing.created_at;
            }
            table.insert(key, video);
        }

        let mut attempt = 1;
        loop {
            match persist_table(&self.data_dir, "videos", table.values()).await {
                Ok(()) => return Ok(()),
                Err(e) if attempt < BATCH_PUT_MAX_ATTEMPTS => {
                    tracing::warn!(attempt, error = %e, "Batch put retrying");
                    attempt += 1;
                    tokio::time::sleep(std::time::Duration::from_millis(50 * attempt as u64)).await;
                }
                Err(_) => {
                    return Err(StoreError::BatchRetriesExhausted {
                        attempts: BATCH_PUT_MAX_ATTEMPTS,
                    })
                }
            }
        }
    }

    /// Point lookup by `(channel_id, video_id)`.
    pub async fn get_video(&self, channel_id: &str, video_id: &str) -> Option<VideoRecord> {
        let table = self.videos.lock().await;
        table.get(&(channel_id.to_string(), video_id.to_string())).cloned()
    }

    /// Videos in `state`, ordered by `updated_at` ascending.
    pub async fn videos_in_state(&self, state: VideoState) -> Vec<VideoRecord> {
        let table = self.videos.lock().await;
        let mut rows: Vec<VideoRecord> =
            table.values().filter(|v| v.state == state).cloned().collect();
        rows.sort_by(|a, b| a.updated_at.cmp(&b.updated_at));
        rows
    }

    /// The download worker's input set: fresh public uploads, then failed
    /// creation attempts, then failed uploads.
    pub async fn unsynced_videos(&self) -> Vec<VideoRecord> {
        let mut rows = Vec::new();
        let fresh: Vec<VideoRecord> = self
            .videos_in_state(VideoState::New)
            .await
            .into_iter()
            .filter(|v| v.is_downloadable())
            .collect();
        rows.extend(fresh);
        rows.extend(self.videos_in_state(VideoState::VideoCreationFailed).await);
        rows.extend(self.videos_in_state(VideoState::UploadFailed).await);
        rows
    }

    /// The uploader's input set: `UploadFailed` first, then `VideoCreated`,
    /// `updated_at` order preserved inside each bucket.
    pub async fn pending_upload_videos(&self, limit: usize) -> Vec<VideoRecord> {
        let mut rows = self.videos_in_state(VideoState::UploadFailed).await;
        rows.extend(self.videos_in_state(VideoState::VideoCreated).await);
        rows.truncate(limit);
        rows
    }

    /// Read-modify-write a video under the table critical section.
    ///
    /// State transitions go through this so two concurrent writers of the
    /// same key observe serialized outcomes.
    pub async fn update_video<F>(
        &self,
        channel_id: &str,
        video_id: &str,
        mutate: F,
    ) -> StoreResult<VideoRecord>
    where
        F: FnOnce(&mut VideoRecord) -> Result<(), DomainError>,
    {
        let mut table = self.videos.lock().await;
        let key = (channel_id.to_string(), video_id.to_string());
        let record = table.get_mut(&key).ok_or_else(|| StoreError::VideoNotFound {
            channel_id: channel_id.to_string(),
            video_id: video_id.to_string(),
        })?;

        let mut candidate = record.clone();
        mutate(&mut candidate)?;
        candidate.updated_at = Utc::now();
        *record = candidate.clone();

        persist_table(&self.data_dir, "videos", table.values()).await?;
        Ok(candidate)
    }

    // ---- whitelist ----

    /// Whether a channel handle is whitelisted.
    pub async fn is_whitelisted(&self, channel_handle: &str) -> bool {
        let table = self.whitelist.lock().await;
        table.contains_key(channel_handle)
    }

    /// Snapshot of the whitelist.
    pub async fn whitelist_entries(&self) -> Vec<WhitelistEntry> {
        let table = self.whitelist.lock().await;
        table.values().cloned().collect()
    }

    /// Add a whitelist entry.
    pub async fn put_whitelist_entry(&self, entry: WhitelistEntry) -> StoreResult<()> {
        let mut table = self.whitelist.lock().await;
        table.insert(entry.channel_handle.clone(), entry);
        persist_table(&self.data_dir, "whitelist_channels", table.values()).await
    }
}

async fn load_table<T: DeserializeOwned>(data_dir: &Path, table: &'static str) -> StoreResult<Vec<T>> {
    let path = data_dir.join(format!("{}.json", table));
    match tokio::fs::read(&path).await {
        Ok(bytes) => serde_json::from_slice(&bytes).map_err(|e| StoreError::Corrupt {
            table,
            message: e.to_string(),
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

async fn persist_table<'a, T, I>(data_dir: &Path, table: &'static str, rows: I) -> StoreResult<()>
where
    T: Serialize + 'a,
    I: Iterator<Item = &'a T>,
{
    let rows: Vec<&T> = rows.collect();
    let bytes = serde_json::to_vec_pretty(&rows).map_err(|e| StoreError::Corrupt {
        table,
        message: e.to_string(),
    })?;

    let target = data_dir.join(format!("{}.json", table));
    let temp = target.with_extension("json.tmp");

    let mut file = tokio::fs::File::create(&temp).await?;
    file.write_all(&bytes).await?;
    file.flush().await?;
    drop(file);

    tokio::fs::rename(&temp, &target).await?;
    Ok(())
}
