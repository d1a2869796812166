//! On-chain creator: turns staged videos into on-chain records.

use crate::assets::AssetDirectory;
use crate::error::{SyncError, SyncResult};
use joysync_chain::{
    AssetSpec, ChainError, ChainEvent, CreateVideoRequest, ExtrinsicOutcome, TxFailureKind,
    VideoCreator,
};
use joysync_indexer::IndexerClient;
use joysync_store::StateStore;
use joysync_types::{JoystreamVideo, VideoRecord, VideoState};
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

/// What one creation pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct CreationReport {
    pub created: usize,
    pub failed: usize,
    pub retried_later: usize,
    pub halted_channels: usize,
}

/// Consumes videos with staged bytes and issues `create_video` extrinsics.
///
/// Submissions go through one collaborator signer, so the chain edge
/// serializes them; this service keeps its own pass sequential for the same
/// reason.
pub struct OnChainCreator {
    store: Arc<StateStore>,
    assets: Arc<AssetDirectory>,
    chain: Arc<dyn VideoCreator>,
    indexer: Arc<dyn IndexerClient>,
    collaborator: String,
    /// Channels whose storage voucher is exhausted; cleared on the next
    /// channel refresh.
    voucher_halted: Mutex<HashSet<String>>,
}

impl OnChainCreator {
    pub fn new(
        store: Arc<StateStore>,
        assets: Arc<AssetDirectory>,
        chain: Arc<dyn VideoCreator>,
        indexer: Arc<dyn IndexerClient>,
        collaborator: String,
    ) -> Self {
        Self {
            store,
            assets,
            chain,
            indexer,
            collaborator,
            voucher_halted: Mutex::new(HashSet::new()),
        }
    }

    /// Lift the per-channel voucher halts (called after a channel refresh).
    pub async fn clear_voucher_halts(&self) {
        let mut halted = self.voucher_halted.lock().await;
        if !halted.is_empty() {
            info!(channels = halted.len(), "Clearing voucher halts");
            halted.clear();
        }
    }

    /// Whether OC is currently halted for a channel.
    pub async fn is_voucher_halted(&self, channel_id: &str) -> bool {
        self.voucher_halted.lock().await.contains(channel_id)
    }

    /// Create on-chain records for every staged video, one at a time.
    pub async fn run_cycle(&self) -> SyncResult<CreationReport> {
        let mut report = CreationReport::default();

        let mut candidates = self.store.videos_in_state(VideoState::New).await;
        candidates.retain(|v| v.is_downloadable());
        candidates.extend(self.store.videos_in_state(VideoState::VideoCreationFailed).await);

        for video in candidates {
            // Re-read at the head of the step to absorb concurrent updates.
            let Some(video) = self.store.get_video(&video.channel_id, &video.id).await else {
                continue;
            };
            if !matches!(video.state, VideoState::New | VideoState::VideoCreationFailed) {
                continue;
            }
            if !self.assets.is_staged(&video.channel_id, &video.id).await {
                continue;
            }
            if self.is_voucher_halted(&video.channel_id).await {
                debug!(channel_id = %video.channel_id, "Channel voucher-halted, skipping");
                continue;
            }
            match self.store.channel_by_external_id(&video.channel_id).await {
                Some(channel) if channel.is_sync_candidate() => {}
                _ => continue,
            }

            match self.create_one(&video).await {
                Ok(VideoOutcome::Created) => report.created += 1,
                Ok(VideoOutcome::Failed) => report.failed += 1,
                Ok(VideoOutcome::RetryLater) => report.retried_later += 1,
                Ok(VideoOutcome::ChannelHalted) => report.halted_channels += 1,
                Err(SyncError::Chain(ChainError::ApiNotConnected(message))) => {
                    // Connection is down; the rest of the pass would fail too.
                    warn!(error = %message, "Chain unreachable, ending creation pass");
                    return Ok(report);
                }
                Err(e) => {
                    warn!(video_id = %video.id, error = %e, "Creation attempt errored");
                    report.failed += 1;
                }
            }
        }

        Ok(report)
    }

    async fn create_one(&self, video: &VideoRecord) -> SyncResult<VideoOutcome> {
        // The on-chain channel must exist in the read model before we spend
        // a transaction on it.
        if self.indexer.channel_by_id(video.joystream_channel_id).await?.is_none() {
            warn!(
                channel_id = %video.channel_id,
                joystream_channel_id = video.joystream_channel_id,
                "On-chain channel missing in read model, skipping"
            );
            return Ok(VideoOutcome::RetryLater);
        }

        let media_path = self.assets.media_path(&video.channel_id, &video.id);
        let thumb_path = self.assets.thumbnail_path(&video.channel_id, &video.id);
        let media = joysync_fleet::digest_file(&media_path).await?;
        let thumbnail = joysync_fleet::digest_file(&thumb_path).await?;

        let request = CreateVideoRequest {
            joystream_channel_id: video.joystream_channel_id,
            collaborator: self.collaborator.clone(),
            title: video.title.clone(),
            description: video.description.clone(),
            language: video.language.clone(),
            category_id: video.category_id.clone(),
            is_public: true,
            media: AssetSpec {
                size: media.size,
                content_hash: media.sha256_hex,
            },
            thumbnail: AssetSpec {
                size: thumbnail.size,
                content_hash: thumbnail.sha256_hex,
            },
            expected_data_object_state_bloat_bond: 0,
        };

        debug!(
            video_id = %video.id,
            joystream_channel_id = video.joystream_channel_id,
            media_size = request.media.size,
            "Submitting video creation"
        );

        let outcome = self.chain.create_video(&request).await?;
        self.settle(video, outcome).await
    }

    /// Write the state transition the outcome dictates. State moves only
    /// after the chain acknowledged, never before.
    async fn settle(&self, video: &VideoRecord, outcome: ExtrinsicOutcome) -> SyncResult<VideoOutcome> {
        if let ExtrinsicOutcome::Finalized { .. } = &outcome {
            let created = outcome.video_created().cloned();
            let (video_id, data_object_ids) = match created {
                Some(ChainEvent::VideoCreated { video_id, data_object_ids, .. })
                    if outcome.has_data_objects_uploaded() && data_object_ids.len() >= 2 =>
                {
                    (video_id, data_object_ids)
                }
                _ => {
                    // Finalized without the required events is fatal for the
                    // attempt, not for the video.
                    error!(video_id = %video.id, "Finalized without required events");
                    return self.creation_failed(video, "missing required event").await;
                }
            };

            let onchain = JoystreamVideo {
                id: video_id,
                media_object_id: data_object_ids[0],
                thumbnail_object_id: data_object_ids[1],
            };
            self.store
                .update_video(&video.channel_id, &video.id, |record| {
                    record.mark_created(onchain.clone())
                })
                .await?;

            info!(
                video_id = %video.id,
                joystream_video_id = onchain.id,
                "Video created on chain"
            );
            return Ok(VideoOutcome::Created);
        }

        match outcome {
            ExtrinsicOutcome::Finalized { .. } => unreachable!("handled above"),
            ExtrinsicOutcome::Failed { kind: TxFailureKind::VoucherLimit, message } => {
                warn!(
                    channel_id = %video.channel_id,
                    error = %message,
                    "Voucher size limit exceeded, halting channel"
                );
                self.voucher_halted.lock().await.insert(video.channel_id.clone());
                Ok(VideoOutcome::ChannelHalted)
            }
            ExtrinsicOutcome::Failed { message, .. } => {
                error!(video_id = %video.id, error = %message, "create_video dispatch failed");
                self.creation_failed(video, &message).await
            }
            ExtrinsicOutcome::Rejected { reason } => {
                // Never reached the pool; retry later with state untouched.
                warn!(video_id = %video.id, reason = %reason, "Submission cancelled, will retry");
                Ok(VideoOutcome::RetryLater)
            }
        }
    }

    async fn creation_failed(&self, video: &VideoRecord, reason: &str) -> SyncResult<VideoOutcome> {
        debug!(video_id = %video.id, reason = %reason, "Recording creation failure");
        self.store
            .update_video(&video.channel_id, &video.id, |record| {
                if record.state == VideoState::VideoCreationFailed {
                    return Ok(());
                }
                record.advance(VideoState::VideoCreationFailed)
            })
            .await?;
        Ok(VideoOutcome::Failed)
    }
}

enum VideoOutcome {
    Created,
    Failed,
    RetryLater,
    ChannelHalted,
}
