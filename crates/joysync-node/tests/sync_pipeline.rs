//! End-to-end pipeline scenarios over mock external systems.
//!
//! Drives the real stages (poller, downloader, creator, uploader) against a
//! real on-disk state store, with the metadata API, chain and storage fleet
//! replaced by scripted fakes.

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use joysync_chain::{
    ChainEvent, ChainResult, CreateVideoRequest, ExtrinsicOutcome, VideoCreator,
};
use joysync_fleet::{BucketCandidate, ObjectUploader, ResponseTimeBook, UploadError};
use joysync_indexer::{
    DataObject, IndexerChannel, IndexerClient, IndexerResult, IndexerVideo, StorageBucket,
};
use joysync_node::{
    AssetDirectory, DownloadWorker, MetadataPoller, OnChainCreator, QuotaTracker, Uploader,
};
use joysync_store::{CreatorRegistry, StateStore, StoreError};
use joysync_types::{
    ChannelRecord, CreatorAction, DomainError, SuspensionReason, VerifiedTier, VideoState,
    YppStatus,
};
use joysync_youtube::{
    DownloadResult, MediaDownloader, RefreshedTokens, YoutubeClient, YoutubeError, YoutubeResult,
    YtChannel, YtVideo,
};
use std::collections::HashMap;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use tempfile::TempDir;

// ---- scripted external systems ----

struct FakeYoutube {
    playlists: HashMap<String, Vec<YtVideo>>,
}

#[async_trait]
impl YoutubeClient for FakeYoutube {
    async fn channel(&self, _token: &str, channel_id: &str) -> YoutubeResult<YtChannel> {
        Err(YoutubeError::ChannelNotFound(channel_id.to_string()))
    }

    async fn uploads(&self, _token: &str, playlist_id: &str) -> YoutubeResult<Vec<YtVideo>> {
        Ok(self.playlists.get(playlist_id).cloned().unwrap_or_default())
    }

    async fn refresh_token(&self, _refresh: &str) -> YoutubeResult<RefreshedTokens> {
        Err(YoutubeError::AuthFailed("revoked".to_string()))
    }
}

struct FakeDownloader {
    media_bytes: u64,
}

#[async_trait]
impl MediaDownloader for FakeDownloader {
    async fn download_media(&self, _video_id: &str, dest: &Path) -> DownloadResult<u64> {
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, vec![7u8; self.media_bytes as usize]).await?;
        Ok(self.media_bytes)
    }

    async fn download_thumbnail(&self, _url: &str, dest: &Path) -> DownloadResult<u64> {
        tokio::fs::create_dir_all(dest.parent().unwrap()).await?;
        tokio::fs::write(dest, b"jpg").await?;
        Ok(3)
    }
}

struct FakeChain {
    outcomes: StdMutex<Vec<ExtrinsicOutcome>>,
    submissions: AtomicUsize,
}

impl FakeChain {
    fn with(outcomes: Vec<ExtrinsicOutcome>) -> Self {
        Self {
            outcomes: StdMutex::new(outcomes),
            submissions: AtomicUsize::new(0),
        }
    }

    fn finalized() -> ExtrinsicOutcome {
        ExtrinsicOutcome::Finalized {
            events: vec![
                ChainEvent::VideoCreated {
                    channel_id: 7,
                    video_id: 42,
                    data_object_ids: vec![100, 101],
                },
                ChainEvent::DataObjectsUploaded {
                    object_ids: vec![100, 101],
                },
            ],
        }
    }
}

#[async_trait]
impl VideoCreator for FakeChain {
    async fn create_video(&self, _request: &CreateVideoRequest) -> ChainResult<ExtrinsicOutcome> {
        self.submissions.fetch_add(1, Ordering::SeqCst);
        let mut outcomes = self.outcomes.lock().unwrap();
        if outcomes.is_empty() {
            return Ok(FakeChain::finalized());
        }
        Ok(outcomes.remove(0))
    }
}

struct FakeIndexer {
    buckets: Vec<StorageBucket>,
}

#[async_trait]
impl IndexerClient for FakeIndexer {
    async fn channel_by_id(&self, id: u64) -> IndexerResult<Option<IndexerChannel>> {
        Ok(Some(IndexerChannel {
            id,
            title: None,
            total_videos_created: 0,
        }))
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
        Ok(1000)
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
        self.accepted
            .lock()
            .unwrap()
            .push((candidate.bucket_id.clone(), object_id));
        Ok(())
    }
}

// ---- fixtures ----

fn enrollment_time() -> chrono::DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap()
}

fn verified_channel() -> ChannelRecord {
    let now = enrollment_time();
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
        language: Some("en".to_string()),
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

/// A public, processed, non-live upload published before enrollment.
fn historical_upload(id: &str) -> YtVideo {
    YtVideo {
        id: id.to_string(),
        channel_id: "UCabc".to_string(),
        title: format!("video {}", id),
        description: String::new(),
        duration_s: 120,
        thumbnail_url: "https://thumb.example/t.jpg".to_string(),
        published_at: enrollment_time() - chrono::Duration::days(90),
        upload_status: "processed".to_string(),
        privacy_status: "public".to_string(),
        live_broadcast_content: "none".to_string(),
        license: "youtube".to_string(),
        view_count: 100,
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

struct Harness {
    _data_dir: TempDir,
    _asset_dir: TempDir,
    store: Arc<StateStore>,
    assets: Arc<AssetDirectory>,
    poller: MetadataPoller,
    downloader: DownloadWorker,
    creator: OnChainCreator,
    uploader: Uploader,
}

const MEDIA_BYTES: u64 = 2048;

async fn make_harness(
    playlists: HashMap<String, Vec<YtVideo>>,
    sync_quota: u32,
    chain: FakeChain,
    buckets: Vec<StorageBucket>,
    failing_buckets: Vec<String>,
) -> Harness {
    let data_dir = TempDir::new().unwrap();
    let asset_dir = TempDir::new().unwrap();

    let store = Arc::new(StateStore::open(data_dir.path()).await.unwrap());
    store.put_channel(verified_channel()).await.unwrap();

    let assets = Arc::new(AssetDirectory::open(asset_dir.path(), 1 << 30).await.unwrap());
    let registry = Arc::new(CreatorRegistry::new(store.clone()));
    let quota = Arc::new(QuotaTracker::new(sync_quota, 0, Utc::now()));

    let poller = MetadataPoller::new(
        store.clone(),
        registry,
        Arc::new(FakeYoutube { playlists }),
        quota,
        1,
    );
    let downloader = DownloadWorker::new(
        store.clone(),
        Arc::new(FakeDownloader { media_bytes: MEDIA_BYTES }),
        assets.clone(),
        4,
        3,
    );
    let indexer = Arc::new(FakeIndexer { buckets });
    let creator = OnChainCreator::new(
        store.clone(),
        assets.clone(),
        Arc::new(chain),
        indexer.clone(),
        "collab-1".to_string(),
    );
    let uploader = Uploader::new(
        store.clone(),
        assets.clone(),
        indexer,
        Arc::new(ScriptedFleet {
            failing_buckets,
            accepted: StdMutex::new(Vec::new()),
        }),
        Arc::new(ResponseTimeBook::new()),
        50,
        4,
    );

    Harness {
        _data_dir: data_dir,
        _asset_dir: asset_dir,
        store,
        assets,
        poller,
        downloader,
        creator,
        uploader,
    }
}

// ---- scenarios ----

/// S1: one new public video travels the whole pipeline.
#[tokio::test]
async fn test_happy_path_single_video() {
    let harness = make_harness(
        HashMap::from([("UUabc".to_string(), vec![historical_upload("vid-1")])]),
        100,
        FakeChain::with(vec![FakeChain::finalized()]),
        vec![bucket("1", 1 << 30)],
        vec![],
    )
    .await;

    // Poll: the video lands in New.
    harness.poller.run_cycle().await.unwrap();
    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::New);

    // Download: bytes staged, state unchanged.
    harness.downloader.run_cycle().await.unwrap();
    assert!(harness.assets.is_staged("UCabc", "vid-1").await);
    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::New);
    assert_eq!(video.media_size, Some(MEDIA_BYTES));

    // Create: on-chain record with two ordered asset ids.
    harness.creator.run_cycle().await.unwrap();
    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::VideoCreated);
    assert_eq!(video.joystream_video.as_ref().unwrap().asset_ids(), [100, 101]);

    // Upload: terminal success plus historical accounting.
    harness.uploader.run_cycle().await.unwrap();
    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::UploadSucceeded);

    let channel = harness.store.get_channel("user-1", "UCabc").await.unwrap();
    assert_eq!(channel.historical_video_synced_size, MEDIA_BYTES);
}

/// S2: an exhausted sync pool aborts the poll cycle without any writes.
#[tokio::test]
async fn test_quota_exhaustion_skips_cycle() {
    let harness = make_harness(
        HashMap::from([("UUabc".to_string(), vec![historical_upload("vid-1")])]),
        0,
        FakeChain::with(vec![]),
        vec![],
        vec![],
    )
    .await;

    let result = harness.poller.run_cycle().await;
    assert!(result.is_err(), "cycle aborts on quota exhaustion");
    assert!(
        harness.store.get_video("UCabc", "vid-1").await.is_none(),
        "no video records created or modified"
    );
}

/// S3: a creator action with a non-advancing timestamp is rejected.
#[tokio::test]
async fn test_replay_guard_rejects_stale_action() {
    let harness = make_harness(HashMap::new(), 10, FakeChain::with(vec![]), vec![], vec![]).await;

    let channel = harness.store.get_channel("user-1", "UCabc").await.unwrap();
    let stale_stamp = channel.last_acted_at;

    let result = harness
        .store
        .apply_creator_action(
            "user-1",
            "UCabc",
            &CreatorAction::IngestChannel { should_be_ingested: false },
            stale_stamp,
        )
        .await;

    assert!(matches!(
        result,
        Err(StoreError::Domain(DomainError::ActionReplayed { .. }))
    ));
    let unchanged = harness.store.get_channel("user-1", "UCabc").await.unwrap();
    assert!(unchanged.should_be_ingested, "channel unchanged");
    assert_eq!(unchanged.last_acted_at, stale_stamp);
}

/// S4: finalized without the required event fails the attempt; the next
/// cycle retries and succeeds.
#[tokio::test]
async fn test_missing_event_then_retry() {
    let harness = make_harness(
        HashMap::from([("UUabc".to_string(), vec![historical_upload("vid-1")])]),
        100,
        FakeChain::with(vec![
            ExtrinsicOutcome::Finalized { events: vec![] },
            FakeChain::finalized(),
        ]),
        vec![bucket("1", 1 << 30)],
        vec![],
    )
    .await;

    harness.poller.run_cycle().await.unwrap();
    harness.downloader.run_cycle().await.unwrap();

    harness.creator.run_cycle().await.unwrap();
    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::VideoCreationFailed);

    harness.creator.run_cycle().await.unwrap();
    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::VideoCreated);
}

/// S5: the first ranked bucket returns 500; the second receives both assets.
#[tokio::test]
async fn test_storage_node_failover() {
    let harness = make_harness(
        HashMap::from([("UUabc".to_string(), vec![historical_upload("vid-1")])]),
        100,
        FakeChain::with(vec![FakeChain::finalized()]),
        // "big" ranks first on capacity and is scripted to fail.
        vec![bucket("big", 1 << 31), bucket("small", 1 << 30)],
        vec!["big".to_string()],
    )
    .await;

    harness.poller.run_cycle().await.unwrap();
    harness.downloader.run_cycle().await.unwrap();
    harness.creator.run_cycle().await.unwrap();
    harness.uploader.run_cycle().await.unwrap();

    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::UploadSucceeded);
}

/// The probe's measurements demote slower buckets on later rankings.
#[tokio::test]
async fn test_probe_latency_breaks_ranking_ties() {
    use joysync_fleet::rank_buckets;
    use std::time::Duration;

    let book = ResponseTimeBook::new();
    book.record("https://slow.example", Duration::from_millis(900)).await;
    book.record("https://fast.example", Duration::from_millis(15)).await;

    let mut candidates = vec![
        BucketCandidate {
            bucket_id: "slow".to_string(),
            endpoint: "https://slow.example".to_string(),
            free_capacity: 1000,
            free_objects: 10,
            median_latency: None,
        },
        BucketCandidate {
            bucket_id: "fast".to_string(),
            endpoint: "https://fast.example".to_string(),
            free_capacity: 1000,
            free_objects: 10,
            median_latency: None,
        },
    ];
    book.annotate(&mut candidates).await;
    rank_buckets(&mut candidates);

    assert_eq!(candidates[0].bucket_id, "fast");
}

/// S6: a suspended channel is excluded everywhere and its in-flight videos
/// stop advancing.
#[tokio::test]
async fn test_suspended_channel_stops_advancing() {
    let harness = make_harness(
        HashMap::from([("UUabc".to_string(), vec![historical_upload("vid-1")])]),
        100,
        FakeChain::with(vec![FakeChain::finalized()]),
        vec![bucket("1", 1 << 30)],
        vec![],
    )
    .await;

    // Discover the video first, then suspend the channel mid-pipeline.
    harness.poller.run_cycle().await.unwrap();
    harness
        .store
        .update_channel("user-1", "UCabc", |channel| {
            channel.ypp_status = YppStatus::Suspended(SuspensionReason::Legal);
            Ok(())
        })
        .await
        .unwrap();

    // No stage performs work against it.
    let poll_report = harness.poller.run_cycle().await.unwrap();
    assert_eq!(poll_report.channels_polled, 0, "registry excludes the channel");

    harness.downloader.run_cycle().await.unwrap();
    assert!(!harness.assets.is_staged("UCabc", "vid-1").await);

    harness.creator.run_cycle().await.unwrap();
    harness.uploader.run_cycle().await.unwrap();

    let video = harness.store.get_video("UCabc", "vid-1").await.unwrap();
    assert_eq!(video.state, VideoState::New, "no new transitions");
}
