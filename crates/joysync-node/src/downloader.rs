//! Download worker pool: stages media bytes for unsynced videos.

use crate::assets::AssetDirectory;
use crate::error::SyncResult;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use joysync_store::StateStore;
use joysync_types::{VideoRecord, VideoState};
use joysync_youtube::{DownloadError, MediaDownloader};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Base delay for the transient-failure backoff.
const BACKOFF_BASE_S: i64 = 30;
/// Cap on the backoff exponent.
const BACKOFF_MAX_EXP: u32 = 6;

/// What one drain pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct DownloadReport {
    pub staged: usize,
    pub skipped: usize,
    pub gone: usize,
    pub failed: usize,
}

/// Drains unsynced videos into the local asset directory.
pub struct DownloadWorker {
    store: Arc<StateStore>,
    downloader: Arc<dyn MediaDownloader>,
    assets: Arc<AssetDirectory>,
    /// Bounds parallel downloads across all channels.
    global: Arc<Semaphore>,
    /// One permit per channel keeps per-channel order.
    per_channel: Mutex<HashMap<String, Arc<Semaphore>>>,
    max_attempts: u32,
}

impl DownloadWorker {
    pub fn new(
        store: Arc<StateStore>,
        downloader: Arc<dyn MediaDownloader>,
        assets: Arc<AssetDirectory>,
        max_concurrent: usize,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            downloader,
            assets,
            global: Arc::new(Semaphore::new(max_concurrent.max(1))),
            per_channel: Mutex::new(HashMap::new()),
            max_attempts,
        }
    }

    /// Drain the unsynced set once.
    pub async fn run_cycle(&self) -> SyncResult<DownloadReport> {
        let videos = self.store.unsynced_videos().await;
        if videos.is_empty() {
            return Ok(DownloadReport::default());
        }

        debug!(videos = videos.len(), "Download drain starting");

        let mut report = DownloadReport::default();
        let tasks = videos.into_iter().map(|video| self.process(video));
        for outcome in futures::future::join_all(tasks).await {
            match outcome {
                Ok(VideoOutcome::Staged) => report.staged += 1,
                Ok(VideoOutcome::Skipped) => report.skipped += 1,
                Ok(VideoOutcome::Gone) => report.gone += 1,
                Ok(VideoOutcome::TransientFailure) => report.failed += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "Download task failed");
                }
            }
        }

        info!(
            staged = report.staged,
            skipped = report.skipped,
            gone = report.gone,
            failed = report.failed,
            "Download drain finished"
        );
        Ok(report)
    }

    async fn process(&self, video: VideoRecord) -> SyncResult<VideoOutcome> {
        let channel_sem = self.channel_semaphore(&video.channel_id).await;
        let _channel = channel_sem.acquire().await.expect("semaphore closed");
        let _global = self.global.acquire().await.expect("semaphore closed");

        // Re-read the authoritative record; it may have moved while queued.
        let Some(video) = self.store.get_video(&video.channel_id, &video.id).await else {
            return Ok(VideoOutcome::Skipped);
        };

        if !admissible(&video, Utc::now()) {
            return Ok(VideoOutcome::Skipped);
        }

        // A suspended or opted-out channel stops advancing its videos.
        match self.store.channel_by_external_id(&video.channel_id).await {
            Some(channel) if channel.is_sync_candidate() => {}
            _ => return Ok(VideoOutcome::Skipped),
        }

        if self.assets.is_staged(&video.channel_id, &video.id).await {
            return Ok(VideoOutcome::Skipped);
        }

        if !self.assets.has_headroom().await {
            warn!(video_id = %video.id, "Disk budget exhausted, deferring download");
            return Ok(VideoOutcome::Skipped);
        }

        self.download_one(&video).await
    }

    async fn download_one(&self, video: &VideoRecord) -> SyncResult<VideoOutcome> {
        let media_path = self.assets.media_path(&video.channel_id, &video.id);
        let thumb_path = self.assets.thumbnail_path(&video.channel_id, &video.id);

        let media_result = self.downloader.download_media(&video.id, &media_path).await;
        let media_size = match media_result {
            Ok(size) => size,
            Err(e) => return self.handle_failure(video, e).await,
        };

        if let Err(e) = self.downloader.download_thumbnail(&video.thumbnail_url, &thumb_path).await {
            return self.handle_failure(video, e).await;
        }

        self.assets.charge(media_size).await;

        // Bytes are staged; the record keeps its state, only accounting moves.
        self.store
            .update_video(&video.channel_id, &video.id, |record| {
                record.media_size = Some(media_size);
                record.download_attempts = 0;
                Ok(())
            })
            .await?;

        info!(
            video_id = %video.id,
            channel_id = %video.channel_id,
            bytes = media_size,
            "Media staged"
        );
        Ok(VideoOutcome::Staged)
    }

    async fn handle_failure(
        &self,
        video: &VideoRecord,
        error: DownloadError,
    ) -> SyncResult<VideoOutcome> {
        match error {
            DownloadError::Gone(reason) => {
                warn!(video_id = %video.id, reason = %reason, "Media gone upstream");
                self.store
                    .update_video(&video.channel_id, &video.id, |record| {
                        record.advance(VideoState::VideoUnavailable)
                    })
                    .await?;
                Ok(VideoOutcome::Gone)
            }
            e => {
                let attempts = video.download_attempts + 1;
                warn!(
                    video_id = %video.id,
                    attempts,
                    error = %e,
                    "Transient download failure"
                );

                if attempts >= self.max_attempts {
                    self.store
                        .update_video(&video.channel_id, &video.id, |record| {
                            record.advance(VideoState::VideoUnavailable)
                        })
                        .await?;
                    return Ok(VideoOutcome::Gone);
                }

                self.store
                    .update_video(&video.channel_id, &video.id, |record| {
                        record.download_attempts = attempts;
                        Ok(())
                    })
                    .await?;
                Ok(VideoOutcome::TransientFailure)
            }
        }
    }

    async fn channel_semaphore(&self, channel_id: &str) -> Arc<Semaphore> {
        let mut map = self.per_channel.lock().await;
        map.entry(channel_id.to_string())
            .or_insert_with(|| Arc::new(Semaphore::new(1)))
            .clone()
    }
}

enum VideoOutcome {
    Staged,
    Skipped,
    Gone,
    TransientFailure,
}

/// Whether the video may be picked up now, honoring the retry backoff.
fn admissible(video: &VideoRecord, now: DateTime<Utc>) -> bool {
    let state_ok = match video.state {
        VideoState::New => video.is_downloadable(),
        VideoState::VideoCreationFailed | VideoState::UploadFailed => true,
        _ => false,
    };
    if !state_ok {
        return false;
    }
    if video.download_attempts == 0 {
        return true;
    }
    let exponent = video.download_attempts.min(BACKOFF_MAX_EXP);
    let delay = ChronoDuration::seconds(BACKOFF_BASE_S << exponent);
    now >= video.updated_at + delay
}
