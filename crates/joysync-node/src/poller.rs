//! Metadata poller: discovers uploads and reconciles them into the store.

use crate::error::{SyncError, SyncResult};
use crate::quota::{QuotaTracker, SYNC_POOL};
use chrono::Utc;
use joysync_store::{CreatorRegistry, StateStore};
use joysync_types::{ChannelRecord, SuspensionReason, VideoRecord, VideoState, YppStatus};
use joysync_youtube::{YoutubeClient, YoutubeError, YtVideo};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// What one poll cycle did, for logging and tests.
#[derive(Debug, Default, Clone, Copy)]
pub struct PollReport {
    pub channels_polled: usize,
    pub channels_suspended: usize,
    pub videos_discovered: usize,
    pub videos_refreshed: usize,
    pub videos_gone: usize,
}

/// Per-channel metadata poller.
pub struct MetadataPoller {
    store: Arc<StateStore>,
    registry: Arc<CreatorRegistry>,
    youtube: Arc<dyn YoutubeClient>,
    quota: Arc<QuotaTracker>,
    fanout: usize,
}

impl MetadataPoller {
    pub fn new(
        store: Arc<StateStore>,
        registry: Arc<CreatorRegistry>,
        youtube: Arc<dyn YoutubeClient>,
        quota: Arc<QuotaTracker>,
        fanout: usize,
    ) -> Self {
        Self {
            store,
            registry,
            youtube,
            quota,
            fanout: fanout.max(1),
        }
    }

    /// Poll every eligible channel once.
    ///
    /// Quota exhaustion aborts the cycle (not the process); per-channel
    /// authorization failures suspend that channel and the cycle continues.
    pub async fn run_cycle(&self) -> SyncResult<PollReport> {
        let channels = self.registry.eligible_channels().await;
        let mut report = PollReport::default();

        info!(channels = channels.len(), "Metadata poll cycle starting");

        for batch in channels.chunks(self.fanout) {
            let polls = batch.iter().map(|channel| self.poll_channel(channel));
            for result in futures::future::join_all(polls).await {
                match result {
                    Ok(outcome) => {
                        report.channels_polled += 1;
                        report.videos_discovered += outcome.discovered;
                        report.videos_refreshed += outcome.refreshed;
                        report.videos_gone += outcome.gone;
                        if outcome.suspended {
                            report.channels_suspended += 1;
                        }
                    }
                    Err(e @ SyncError::QuotaExhausted(_)) => {
                        warn!(error = %e, "Aborting poll cycle: quota exhausted");
                        return Err(e);
                    }
                    Err(e) => {
                        warn!(error = %e, "Channel poll failed, continuing cycle");
                    }
                }
            }
        }

        info!(
            channels = report.channels_polled,
            discovered = report.videos_discovered,
            refreshed = report.videos_refreshed,
            gone = report.videos_gone,
            "Metadata poll cycle finished"
        );
        Ok(report)
    }

    async fn poll_channel(&self, channel: &ChannelRecord) -> SyncResult<ChannelOutcome> {
        if !self.quota.reserve(SYNC_POOL, 1, Utc::now()) {
            return Err(SyncError::QuotaExhausted("sync"));
        }

        debug!(channel_id = %channel.id, "Polling channel uploads");

        let uploads = match self
            .youtube
            .uploads(&channel.user_access_token, &channel.uploads_playlist_id)
            .await
        {
            Ok(uploads) => uploads,
            Err(YoutubeError::AuthFailed(_)) => {
                // One refresh attempt before giving up on the channel.
                match self.refresh_and_retry(channel).await? {
                    Some(uploads) => uploads,
                    None => {
                        self.suspend_channel(channel, SuspensionReason::AuthFailed).await?;
                        return Ok(ChannelOutcome::suspended());
                    }
                }
            }
            Err(YoutubeError::QuotaLimitExceeded) => {
                return Err(SyncError::QuotaExhausted("sync"));
            }
            Err(e) => return Err(e.into()),
        };

        self.reconcile(channel, uploads).await
    }

    /// Refresh the OAuth access token once; `None` means auth is truly dead.
    async fn refresh_and_retry(&self, channel: &ChannelRecord) -> SyncResult<Option<Vec<YtVideo>>> {
        debug!(channel_id = %channel.id, "Access token rejected, refreshing");

        let tokens = match self.youtube.refresh_token(&channel.user_refresh_token).await {
            Ok(tokens) => tokens,
            Err(YoutubeError::AuthFailed(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };

        self.store
            .update_channel(&channel.user_id, &channel.id, |record| {
                record.user_access_token = tokens.access_token.clone();
                if let Some(ref refresh) = tokens.refresh_token {
                    record.user_refresh_token = refresh.clone();
                }
                Ok(())
            })
            .await?;

        match self
            .youtube
            .uploads(&tokens.access_token, &channel.uploads_playlist_id)
            .await
        {
            Ok(uploads) => Ok(Some(uploads)),
            Err(YoutubeError::AuthFailed(_)) => Ok(None),
            Err(YoutubeError::QuotaLimitExceeded) => Err(SyncError::QuotaExhausted("sync")),
            Err(e) => Err(e.into()),
        }
    }

    async fn suspend_channel(
        &self,
        channel: &ChannelRecord,
        reason: SuspensionReason,
    ) -> SyncResult<()> {
        warn!(channel_id = %channel.id, reason = ?reason, "Suspending channel");
        self.store
            .update_channel(&channel.user_id, &channel.id, |record| {
                record.ypp_status = YppStatus::Suspended(reason);
                Ok(())
            })
            .await?;
        Ok(())
    }

    /// Merge the upstream upload list into the store.
    async fn reconcile(
        &self,
        channel: &ChannelRecord,
        uploads: Vec<YtVideo>,
    ) -> SyncResult<ChannelOutcome> {
        let mut outcome = ChannelOutcome::default();
        let mut fresh = Vec::new();

        for upstream in uploads {
            match self.store.get_video(&channel.id, &upstream.id).await {
                None => {
                    fresh.push(new_record(channel, &upstream));
                    outcome.discovered += 1;
                }
                Some(existing) => {
                    if upstream_gone(&upstream) {
                        // Only legal from states with an edge to the sink;
                        // anything else keeps its place in the pipeline.
                        let result = self
                            .store
                            .update_video(&channel.id, &upstream.id, |record| {
                                record.advance(VideoState::VideoUnavailable)
                            })
                            .await;
                        match result {
                            Ok(_) => outcome.gone += 1,
                            Err(joysync_store::StoreError::Domain(_)) => {
                                debug!(video_id = %upstream.id, state = %existing.state, "Gone upstream but not retractable");
                            }
                            Err(e) => return Err(e.into()),
                        }
                        continue;
                    }

                    self.store
                        .update_video(&channel.id, &upstream.id, |record| {
                            record.title = upstream.title.clone();
                            record.view_count = upstream.view_count;
                            record.privacy_status = upstream.privacy_status.clone();
                            record.upload_status = upstream.upload_status.clone();
                            record.live_broadcast_content = upstream.live_broadcast_content.clone();
                            Ok(())
                        })
                        .await?;
                    outcome.refreshed += 1;
                }
            }
        }

        if !fresh.is_empty() {
            info!(
                channel_id = %channel.id,
                videos = fresh.len(),
                "New uploads discovered"
            );
            self.store.batch_put_videos(fresh).await?;
        }

        Ok(outcome)
    }
}

#[derive(Debug, Default, Clone, Copy)]
struct ChannelOutcome {
    discovered: usize,
    refreshed: usize,
    gone: usize,
    suspended: bool,
}

impl ChannelOutcome {
    fn suspended() -> Self {
        Self {
            suspended: true,
            ..Self::default()
        }
    }
}

/// Whether upstream reports the video as removed or permanently private.
fn upstream_gone(video: &YtVideo) -> bool {
    video.privacy_status == "private"
        || matches!(video.upload_status.as_str(), "deleted" | "rejected" | "failed")
}

fn new_record(channel: &ChannelRecord, upstream: &YtVideo) -> VideoRecord {
    let now = Utc::now();
    VideoRecord {
        id: upstream.id.clone(),
        channel_id: channel.id.clone(),
        joystream_channel_id: channel.joystream_channel_id,
        title: upstream.title.clone(),
        description: upstream.description.clone(),
        duration_s: upstream.duration_s,
        thumbnail_url: upstream.thumbnail_url.clone(),
        published_at: upstream.published_at,
        upload_status: upstream.upload_status.clone(),
        privacy_status: upstream.privacy_status.clone(),
        live_broadcast_content: upstream.live_broadcast_content.clone(),
        license: upstream.license.clone(),
        container: "mp4".to_string(),
        view_count: upstream.view_count,
        category_id: channel.video_category_id.clone(),
        language: channel.language.clone(),
        media_size: None,
        download_attempts: 0,
        state: VideoState::New,
        joystream_video: None,
        created_at: now,
        updated_at: now,
    }
}
