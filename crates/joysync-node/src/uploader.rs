//! Uploader: dispatches created videos' assets to the storage fleet.

use crate::assets::AssetDirectory;
use crate::error::SyncResult;
use joysync_fleet::{
    probe_endpoint, rank_buckets, upload_video_assets, BucketCandidate, FleetError,
    ObjectUploader, ResponseTimeBook,
};
use joysync_indexer::{channel_bag_id, IndexerClient};
use joysync_store::StateStore;
use joysync_types::{VideoRecord, VideoState};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

/// Probe samples per endpoint.
const PROBE_SAMPLES: usize = 3;
/// Probe deadline per request.
const PROBE_TIMEOUT: Duration = Duration::from_secs(2);

/// What one upload pass did.
#[derive(Debug, Default, Clone, Copy)]
pub struct UploadReport {
    pub uploaded: usize,
    pub failed: usize,
    pub skipped: usize,
}

/// Drains videos pending upload and drives their assets into the fleet.
pub struct Uploader {
    store: Arc<StateStore>,
    assets: Arc<AssetDirectory>,
    indexer: Arc<dyn IndexerClient>,
    fleet: Arc<dyn ObjectUploader>,
    response_times: Arc<ResponseTimeBook>,
    batch_size: usize,
    concurrency: Arc<Semaphore>,
    /// Operator endpoints seen in recent rankings, probed periodically.
    known_endpoints: Mutex<HashSet<String>>,
    probe_http: reqwest::Client,
}

impl Uploader {
    pub fn new(
        store: Arc<StateStore>,
        assets: Arc<AssetDirectory>,
        indexer: Arc<dyn IndexerClient>,
        fleet: Arc<dyn ObjectUploader>,
        response_times: Arc<ResponseTimeBook>,
        batch_size: usize,
        max_concurrent: usize,
    ) -> Self {
        Self {
            store,
            assets,
            indexer,
            fleet,
            response_times,
            batch_size,
            concurrency: Arc::new(Semaphore::new(max_concurrent.max(1))),
            known_endpoints: Mutex::new(HashSet::new()),
            probe_http: reqwest::Client::new(),
        }
    }

    /// Upload the next batch of pending videos.
    pub async fn run_cycle(&self) -> SyncResult<UploadReport> {
        let videos = self.store.pending_upload_videos(self.batch_size).await;
        if videos.is_empty() {
            return Ok(UploadReport::default());
        }

        debug!(videos = videos.len(), "Upload drain starting");

        let mut report = UploadReport::default();
        let tasks = videos.into_iter().map(|video| self.process(video));
        for outcome in futures::future::join_all(tasks).await {
            match outcome {
                Ok(VideoOutcome::Uploaded) => report.uploaded += 1,
                Ok(VideoOutcome::Failed) => report.failed += 1,
                Ok(VideoOutcome::Skipped) => report.skipped += 1,
                Err(e) => {
                    report.failed += 1;
                    warn!(error = %e, "Upload task errored");
                }
            }
        }

        info!(
            uploaded = report.uploaded,
            failed = report.failed,
            skipped = report.skipped,
            "Upload drain finished"
        );
        Ok(report)
    }

    /// Measure response times of every known operator endpoint.
    ///
    /// Feeds the tertiary ranking key; endpoints that stop answering lose
    /// their measurement and fall to the back of ties.
    pub async fn probe_response_times(&self) {
        let endpoints: Vec<String> = {
            let known = self.known_endpoints.lock().await;
            known.iter().cloned().collect()
        };

        for endpoint in endpoints {
            match probe_endpoint(&self.probe_http, &endpoint, PROBE_SAMPLES, PROBE_TIMEOUT).await {
                Some(median) => {
                    debug!(endpoint = %endpoint, median_ms = median.as_millis() as u64, "Probe measured");
                    self.response_times.record(&endpoint, median).await;
                }
                None => {
                    warn!(endpoint = %endpoint, "Probe found endpoint unresponsive");
                    self.response_times
                        .record(&endpoint, Duration::from_secs(3600))
                        .await;
                }
            }
        }
    }

    async fn process(&self, video: VideoRecord) -> SyncResult<VideoOutcome> {
        let _permit = self.concurrency.acquire().await.expect("semaphore closed");

        // Re-read the authoritative record at the head of the step.
        let Some(video) = self.store.get_video(&video.channel_id, &video.id).await else {
            return Ok(VideoOutcome::Skipped);
        };
        if !matches!(video.state, VideoState::VideoCreated | VideoState::UploadFailed) {
            return Ok(VideoOutcome::Skipped);
        }
        let Some(onchain) = video.joystream_video.clone() else {
            return Ok(VideoOutcome::Skipped);
        };

        let Some(channel) = self.store.channel_by_external_id(&video.channel_id).await else {
            return Ok(VideoOutcome::Skipped);
        };
        if !channel.is_sync_candidate() {
            return Ok(VideoOutcome::Skipped);
        }

        if !self.assets.is_staged(&video.channel_id, &video.id).await {
            // Bytes lost (crash or eviction); the download path restages.
            debug!(video_id = %video.id, "Assets not staged, deferring upload");
            return Ok(VideoOutcome::Skipped);
        }

        let candidates = self.candidates_for(&video).await?;
        let bag_id = channel_bag_id(video.joystream_channel_id);
        let media_path = self.assets.media_path(&video.channel_id, &video.id);
        let thumb_path = self.assets.thumbnail_path(&video.channel_id, &video.id);

        let result = upload_video_assets(
            self.fleet.as_ref(),
            &candidates,
            &bag_id,
            (onchain.media_object_id, &media_path),
            (onchain.thumbnail_object_id, &thumb_path),
        )
        .await;

        match result {
            Ok(bucket_id) => {
                self.settle_success(&video, &channel.user_id, &bucket_id).await?;
                Ok(VideoOutcome::Uploaded)
            }
            Err(e @ (FleetError::NoActiveStorageProvider(_) | FleetError::AllBucketsFailed { .. })) => {
                warn!(video_id = %video.id, error = %e, "Upload failed for every candidate");
                self.store
                    .update_video(&video.channel_id, &video.id, |record| {
                        if record.state == VideoState::UploadFailed {
                            return Ok(());
                        }
                        record.advance(VideoState::UploadFailed)
                    })
                    .await?;
                Ok(VideoOutcome::Failed)
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Ranked bucket candidates for a video's bag.
    async fn candidates_for(&self, video: &VideoRecord) -> SyncResult<Vec<BucketCandidate>> {
        let bag_id = channel_bag_id(video.joystream_channel_id);
        let buckets = self.indexer.storage_buckets_for_bag(&bag_id).await?;
        let needed = video.media_size.unwrap_or(0);

        let mut candidates: Vec<BucketCandidate> = buckets
            .into_iter()
            .filter_map(|bucket| {
                let endpoint = bucket.operator_endpoint.clone()?;
                (bucket.free_capacity() >= needed && bucket.free_objects() >= 2).then(|| {
                    BucketCandidate {
                        bucket_id: bucket.id.clone(),
                        endpoint,
                        free_capacity: bucket.free_capacity(),
                        free_objects: bucket.free_objects(),
                        median_latency: None,
                    }
                })
            })
            .collect();

        self.response_times.annotate(&mut candidates).await;
        rank_buckets(&mut candidates);

        let mut known = self.known_endpoints.lock().await;
        for candidate in &candidates {
            known.insert(candidate.endpoint.clone());
        }

        Ok(candidates)
    }

    async fn settle_success(
        &self,
        video: &VideoRecord,
        user_id: &str,
        bucket_id: &str,
    ) -> SyncResult<()> {
        self.store
            .update_video(&video.channel_id, &video.id, |record| {
                record.advance(VideoState::UploadSucceeded)
            })
            .await?;

        // Historical accounting: only videos published before enrollment
        // count against the historical allowance.
        let media_size = video.media_size.unwrap_or(0);
        self.store
            .update_channel(user_id, &video.channel_id, |channel| {
                if video.published_at < channel.created_at {
                    channel.historical_video_synced_size += media_size;
                }
                Ok(())
            })
            .await?;

        self.assets.remove(&video.channel_id, &video.id).await?;

        info!(
            video_id = %video.id,
            bucket_id = %bucket_id,
            bytes = media_size,
            "Video uploaded to fleet"
        );
        Ok(())
    }
}

enum VideoOutcome {
    Uploaded,
    Failed,
    Skipped,
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use joysync_fleet::UploadError;
    use joysync_indexer::{DataObject, IndexerChannel, IndexerResult, IndexerVideo, StorageBucket};
    use joysync_types::{ChannelRecord, JoystreamVideo, VerifiedTier, YppStatus};
    use std::path::Path;
    use std::sync::Mutex as StdMutex;
    use tempfile::TempDir;

    struct FakeIndexer {
        buckets: Vec<StorageBucket>,
    }

    #[async_trait]
    impl IndexerClient for FakeIndexer {
        async fn channel_by_id(&self, _id: u64) -> IndexerResult<Option<IndexerChannel>> {
            Ok(None)
        }
        async fn video_by_id(&self, _id: u64) -> IndexerResult<Option<IndexerVideo>> {
            Ok(None)
        }
        async fn storage_buckets_for_bag(&self, _bag_id: &str) -> IndexerResult<Vec<StorageBucket>> {
            Ok(self.buckets.clone())
        }
        async fn data_object_by_id(&self, _id: &str) -> IndexerResult<Option<DataObject>> {
            Ok(None)
        }
        async fn processor_block(&self) -> IndexerResult<u64> {
            Ok(0)
        }
    }

    struct ScriptedFleet {
        failing_buckets: Vec<String>,
        accepted: StdMutex<Vec<(String, u64)>>,
    }

    #[async_trait]
    impl ObjectUploader for ScriptedFleet {
        async fn upload(
            &self,
            candidate: &BucketCandidate,
            _bag_id: &str,
            object_id: u64,
            _path: &Path,
        ) -> Result<(), UploadError> {
            if self.failing_buckets.contains(&candidate.bucket_id) {
                return Err(UploadError::Rejected { status: 500 });
            }
            self.accepted.lock().unwrap().push((candidate.bucket_id.clone(), object_id));
            Ok(())
        }
    }

    fn bucket(id: &str, capacity: u64) -> StorageBucket {
        serde_json::from_value(serde_json::json!({
            "id": id,
            "operatorEndpoint": format!("https://{}.example", id),
            "dataObjectsSizeLimit": capacity.to_string(),
            "dataObjectsSize": "0",
            "dataObjectCountLimit": "100",
            "dataObjectCount": "0"
        }))
        .unwrap()
    }

    fn seed_channel() -> ChannelRecord {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        ChannelRecord {
            id: "UCabc".to_string(),
            user_id: "user-1".to_string(),
            title: "Creator".to_string(),
            description: String::new(),
            thumbnail_url: String::new(),
            user_access_token: "access".to_string(),
            user_refresh_token: "refresh".to_string(),
            uploads_playlist_id: "UUabc".to_string(),
            joystream_channel_id: 7,
            referrer_channel_id: None,
            language: None,
            video_category_id: None,
            should_be_ingested: true,
            allow_operator_ingestion: true,
            perform_unauthorized_sync: false,
            ypp_status: YppStatus::Verified(VerifiedTier::Bronze),
            historical_video_synced_size: 0,
            last_acted_at: now,
            created_at: now,
            updated_at: now,
        }
    }

    fn seed_created_video(id: &str, published_offset_days: i64) -> VideoRecord {
        let enrolled = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();
        VideoRecord {
            id: id.to_string(),
            channel_id: "UCabc".to_string(),
            joystream_channel_id: 7,
            title: "title".to_string(),
            description: String::new(),
            duration_s: 60,
            thumbnail_url: String::new(),
            published_at: enrolled + chrono::Duration::days(published_offset_days),
            upload_status: "processed".to_string(),
            privacy_status: "public".to_string(),
            live_broadcast_content: "none".to_string(),
            license: "youtube".to_string(),
            container: "mp4".to_string(),
            view_count: 0,
            category_id: None,
            language: None,
            media_size: Some(500),
            download_attempts: 0,
            state: VideoState::VideoCreated,
            joystream_video: Some(JoystreamVideo {
                id: 42,
                media_object_id: 100,
                thumbnail_object_id: 101,
            }),
            created_at: enrolled,
            updated_at: enrolled,
        }
    }

    async fn make_uploader(
        data: &TempDir,
        asset_dir: &TempDir,
        indexer: FakeIndexer,
        fleet: ScriptedFleet,
        video: VideoRecord,
    ) -> (Arc<StateStore>, Arc<AssetDirectory>, Uploader) {
        let store = Arc::new(StateStore::open(data.path()).await.unwrap());
        store.put_channel(seed_channel()).await.unwrap();

        let assets = Arc::new(AssetDirectory::open(asset_dir.path(), 1 << 20).await.unwrap());
        let media = assets.media_path(&video.channel_id, &video.id);
        tokio::fs::create_dir_all(media.parent().unwrap()).await.unwrap();
        tokio::fs::write(&media, vec![0u8; 500]).await.unwrap();
        tokio::fs::write(assets.thumbnail_path(&video.channel_id, &video.id), b"jpg")
            .await
            .unwrap();
        store.put_video(video).await.unwrap();

        let uploader = Uploader::new(
            store.clone(),
            assets.clone(),
            Arc::new(indexer),
            Arc::new(fleet),
            Arc::new(ResponseTimeBook::new()),
            50,
            4,
        );
        (store, assets, uploader)
    }

    #[tokio::test]
    async fn test_upload_succeeds_and_cleans_up() {
        let data = TempDir::new().unwrap();
        let asset_dir = TempDir::new().unwrap();
        let (store, assets, uploader) = make_uploader(
            &data,
            &asset_dir,
            FakeIndexer { buckets: vec![bucket("1", 1_000_000)] },
            ScriptedFleet { failing_buckets: vec![], accepted: StdMutex::new(Vec::new()) },
            seed_created_video("vid-1", 5),
        )
        .await;

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.uploaded, 1);

        let video = store.get_video("UCabc", "vid-1").await.unwrap();
        assert_eq!(video.state, VideoState::UploadSucceeded);
        assert!(!assets.is_staged("UCabc", "vid-1").await, "staged assets removed");

        // Published after enrollment: not historical.
        let channel = store.get_channel("user-1", "UCabc").await.unwrap();
        assert_eq!(channel.historical_video_synced_size, 0);
    }

    #[tokio::test]
    async fn test_historical_size_counted_for_old_videos() {
        let data = TempDir::new().unwrap();
        let asset_dir = TempDir::new().unwrap();
        let (store, _assets, uploader) = make_uploader(
            &data,
            &asset_dir,
            FakeIndexer { buckets: vec![bucket("1", 1_000_000)] },
            ScriptedFleet { failing_buckets: vec![], accepted: StdMutex::new(Vec::new()) },
            seed_created_video("vid-1", -30),
        )
        .await;

        uploader.run_cycle().await.unwrap();

        let channel = store.get_channel("user-1", "UCabc").await.unwrap();
        assert_eq!(channel.historical_video_synced_size, 500);
    }

    #[tokio::test]
    async fn test_failover_reaches_second_bucket() {
        let data = TempDir::new().unwrap();
        let asset_dir = TempDir::new().unwrap();
        let fleet = ScriptedFleet {
            failing_buckets: vec!["big".to_string()],
            accepted: StdMutex::new(Vec::new()),
        };
        let (store, _assets, uploader) = make_uploader(
            &data,
            &asset_dir,
            FakeIndexer { buckets: vec![bucket("big", 2_000_000), bucket("small", 1_000_000)] },
            fleet,
            seed_created_video("vid-1", 5),
        )
        .await;

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.uploaded, 1);
        assert_eq!(
            store.get_video("UCabc", "vid-1").await.unwrap().state,
            VideoState::UploadSucceeded
        );
    }

    #[tokio::test]
    async fn test_exhausted_candidates_mark_upload_failed() {
        let data = TempDir::new().unwrap();
        let asset_dir = TempDir::new().unwrap();
        let fleet = ScriptedFleet {
            failing_buckets: vec!["1".to_string()],
            accepted: StdMutex::new(Vec::new()),
        };
        let (store, _assets, uploader) = make_uploader(
            &data,
            &asset_dir,
            FakeIndexer { buckets: vec![bucket("1", 1_000_000)] },
            fleet,
            seed_created_video("vid-1", 5),
        )
        .await;

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(
            store.get_video("UCabc", "vid-1").await.unwrap().state,
            VideoState::UploadFailed
        );
    }

    #[tokio::test]
    async fn test_no_buckets_means_upload_failed() {
        let data = TempDir::new().unwrap();
        let asset_dir = TempDir::new().unwrap();
        let (store, _assets, uploader) = make_uploader(
            &data,
            &asset_dir,
            FakeIndexer { buckets: vec![] },
            ScriptedFleet { failing_buckets: vec![], accepted: StdMutex::new(Vec::new()) },
            seed_created_video("vid-1", 5),
        )
        .await;

        let report = uploader.run_cycle().await.unwrap();
        assert_eq!(report.failed, 1);
        assert_eq!(
            store.get_video("UCabc", "vid-1").await.unwrap().state,
            VideoState::UploadFailed
        );
    }
}
