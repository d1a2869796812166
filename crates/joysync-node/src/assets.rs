//! Local asset directory with a disk budget.

use crate::error::SyncResult;
use std::path::{Path, PathBuf};

use tokio::sync::Mutex;
use tracing::{debug, info};

/// Staging area for downloaded media, one writer per video key.
///
/// The byte counter is guarded by a single critical section; admission is
/// refused once the configured budget is reached.
pub struct AssetDirectory {
    root: PathBuf,
    budget: u64,
    used: Mutex<u64>,
}

impl AssetDirectory {
    /// Open the directory, counting bytes already staged.
    pub async fn open(root: impl AsRef<Path>, budget: u64) -> SyncResult<Self> {
        let root = root.as_ref().to_path_buf();
        tokio::fs::create_dir_all(&root).await?;

        let mut used = 0u64;
        let mut channels = tokio::fs::read_dir(&root).await?;
        while let Some(channel_dir) = channels.next_entry().await? {
            if !channel_dir.file_type().await?.is_dir() {
                continue;
            }
            let mut files = tokio::fs::read_dir(channel_dir.path()).await?;
            while let Some(file) = files.next_entry().await? {
                used += file.metadata().await?.len();
            }
        }

        info!(root = %root.display(), used, budget, "Asset directory opened");
        Ok(Self {
            root,
            budget,
            used: Mutex::new(used),
        })
    }

    /// Path of the staged media for a video.
    pub fn media_path(&self, channel_id: &str, video_id: &str) -> PathBuf {
        self.root.join(channel_id).join(format!("{}.media", video_id))
    }

    /// Path of the staged thumbnail for a video.
    pub fn thumbnail_path(&self, channel_id: &str, video_id: &str) -> PathBuf {
        self.root.join(channel_id).join(format!("{}.jpg", video_id))
    }

    /// Whether both assets of a video are staged.
    pub async fn is_staged(&self, channel_id: &str, video_id: &str) -> bool {
        path_exists(&self.media_path(channel_id, video_id)).await
            && path_exists(&self.thumbnail_path(channel_id, video_id)).await
    }

    /// Whether the budget admits more bytes.
    pub async fn has_headroom(&self) -> bool {
        *self.used.lock().await < self.budget
    }

    /// Charge freshly staged bytes against the budget.
    pub async fn charge(&self, bytes: u64) {
        let mut used = self.used.lock().await;
        *used += bytes;
        debug!(bytes, used = *used, budget = self.budget, "Disk budget charged");
    }

    /// Delete a video's staged assets and release their bytes.
    pub async fn remove(&self, channel_id: &str, video_id: &str) -> SyncResult<()> {
        let mut released = 0u64;
        for path in [
            self.media_path(channel_id, video_id),
            self.thumbnail_path(channel_id, video_id),
        ] {
            if let Ok(meta) = tokio::fs::metadata(&path).await {
                released += meta.len();
                tokio::fs::remove_file(&path).await?;
            }
        }

        let mut used = self.used.lock().await;
        *used = used.saturating_sub(released);
        debug!(channel_id, video_id, released, used = *used, "Staged assets removed");
        Ok(())
    }
}

async fn path_exists(path: &Path) -> bool {
    tokio::fs::metadata(path).await.is_ok()
}
