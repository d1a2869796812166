//! Storage fleet edge.
//!
//! Ranks candidate buckets by advertised capacity (free bytes, then free
//! object slots, then measured response time), uploads a video's two assets
//! against the best bucket and fails over down the ranking.

use async_trait::async_trait;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::path::Path;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::io::AsyncReadExt;
use tokio::sync::RwLock;
use tracing::{debug, info, warn};

/// Fleet-level failures for one video.
#[derive(Debug, Error)]
pub enum FleetError {
    /// The candidate set was empty: nothing is serving the bag.
    #[error("no active storage provider for bag {0}")]
    NoActiveStorageProvider(String),

    /// Every ranked candidate rejected the assets.
    #[error("all {attempts} candidate buckets failed")]
    AllBucketsFailed { attempts: usize },

    /// Local filesystem failure reading staged assets.
    #[error("asset read failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Per-attempt upload failures; any of these triggers failover.
#[derive(Debug, Error)]
pub enum UploadError {
    /// The node answered with a non-success status.
    #[error("bucket rejected upload with status {status}")]
    Rejected { status: u16 },

    /// Transport failure before a response arrived.
    #[error("transport error: {0}")]
    Transport(String),

    /// Local filesystem failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// A storage bucket eligible to receive a video's assets.
#[derive(Debug, Clone)]
pub struct BucketCandidate {
    pub bucket_id: String,
    /// Root url of the operator node.
    pub endpoint: String,
    pub free_capacity: u64,
    pub free_objects: u64,
    /// Median round-trip measured by the probe, when known.
    pub median_latency: Option<Duration>,
}

/// Order candidates: free capacity desc, free object slots desc, measured
/// latency asc (unknown latency ranks last among ties).
pub fn rank_buckets(candidates: &mut [BucketCandidate]) {
    candidates.sort_by(|a, b| {
        b.free_capacity
            .cmp(&a.free_capacity)
            .then(b.free_objects.cmp(&a.free_objects))
            .then_with(|| match (a.median_latency, b.median_latency) {
                (Some(x), Some(y)) => x.cmp(&y),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
    });
}

/// Shared book of measured response times per operator endpoint.
#[derive(Default)]
pub struct ResponseTimeBook {
    measurements: RwLock<HashMap<String, Duration>>,
}

impl ResponseTimeBook {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a median measurement for an endpoint.
    pub async fn record(&self, endpoint: &str, latency: Duration) {
        self.measurements
            .write()
            .await
            .insert(endpoint.to_string(), latency);
    }

    pub async fn get(&self, endpoint: &str) -> Option<Duration> {
        self.measurements.read().await.get(endpoint).copied()
    }

    /// Stamp known measurements onto a candidate set.
    pub async fn annotate(&self, candidates: &mut [BucketCandidate]) {
        let measurements = self.measurements.read().await;
        for candidate in candidates {
            candidate.median_latency = measurements.get(&candidate.endpoint).copied();
        }
    }
}

/// Probe one operator endpoint: `samples` requests, median round-trip.
///
/// Returns `None` when the endpoint never answered inside the timeout, so
/// callers can penalize it in the ranking.
pub async fn probe_endpoint(
    http: &reqwest::Client,
    endpoint: &str,
    samples: usize,
    timeout: Duration,
) -> Option<Duration> {
    let url = format!("{}/api/v1/version", endpoint.trim_end_matches('/'));
    let mut latencies = Vec::new();

    for i in 0..samples {
        debug!(endpoint = %endpoint, sample = i + 1, samples, "Probing storage node");
        let start = Instant::now();
        match tokio::time::timeout(timeout, http.get(&url).send()).await {
            Ok(Ok(response)) if response.status().is_success() => {
                latencies.push(start.elapsed());
            }
            Ok(Ok(response)) => {
                warn!(endpoint = %endpoint, status = %response.status(), "Probe got error status");
            }
            Ok(Err(e)) => {
                warn!(endpoint = %endpoint, error = %e, "Probe request failed");
            }
            Err(_) => {
                warn!(endpoint = %endpoint, "Probe timed out after {:?}", timeout);
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    if latencies.is_empty() {
        return None;
    }
    latencies.sort();
    Some(latencies[latencies.len() / 2])
}

/// Uploads one object to one bucket.
///
/// Trait-shaped so tests can script per-bucket failures.
#[async_trait]
pub trait ObjectUploader: Send + Sync {
    async fn upload(
        &self,
        candidate: &BucketCandidate,
        bag_id: &str,
        object_id: u64,
        path: &Path,
    ) -> Result<(), UploadError>;
}

/// HTTP implementation of [`ObjectUploader`] against the storage node API.
pub struct FleetClient {
    http: reqwest::Client,
}

impl FleetClient {
    pub fn new(request_timeout: Duration) -> Result<Self, UploadError> {
        let http = reqwest::Client::builder()
            .timeout(request_timeout)
            .build()
            .map_err(|e| UploadError::Transport(e.to_string()))?;
        Ok(Self { http })
    }
}

#[async_trait]
impl ObjectUploader for FleetClient {
    async fn upload(
        &self,
        candidate: &BucketCandidate,
        bag_id: &str,
        object_id: u64,
        path: &Path,
    ) -> Result<(), UploadError> {
        let url = format!(
            "{}/api/v1/files?dataObjectId={}&storageBucketId={}&bagId={}",
            candidate.endpoint.trim_end_matches('/'),
            object_id,
            candidate.bucket_id,
            bag_id
        );

        let file = tokio::fs::File::open(path).await?;
        let body = reqwest::Body::wrap_stream(tokio_util::io::ReaderStream::new(file));

        let response = self
            .http
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/octet-stream")
            .body(body)
            .send()
            .await
            .map_err(|e| UploadError::Transport(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(UploadError::Rejected { status: status.as_u16() });
        }

        debug!(
            bucket_id = %candidate.bucket_id,
            object_id,
            "Object accepted by bucket"
        );
        Ok(())
    }
}

/// Upload a video's media and thumbnail, failing over down the ranking.
///
/// Returns the bucket that accepted both assets.
pub async fn upload_video_assets(
    uploader: &dyn ObjectUploader,
    candidates: &[BucketCandidate],
    bag_id: &str,
    media: (u64, &Path),
    thumbnail: (u64, &Path),
) -> Result<String, FleetError> {
    if candidates.is_empty() {
        return Err(FleetError::NoActiveStorageProvider(bag_id.to_string()));
    }

    for candidate in candidates {
        match try_bucket(uploader, candidate, bag_id, media, thumbnail).await {
            Ok(()) => {
                info!(
                    bucket_id = %candidate.bucket_id,
                    bag_id = %bag_id,
                    "Both assets accepted"
                );
                return Ok(candidate.bucket_id.clone());
            }
            Err(e) => {
                warn!(
                    bucket_id = %candidate.bucket_id,
                    error = %e,
                    "Bucket failed, trying next candidate"
                );
            }
        }
    }

    Err(FleetError::AllBucketsFailed {
        attempts: candidates.len(),
    })
}

async fn try_bucket(
    uploader: &dyn ObjectUploader,
    candidate: &BucketCandidate,
    bag_id: &str,
    media: (u64, &Path),
    thumbnail: (u64, &Path),
) -> Result<(), UploadError> {
    uploader.upload(candidate, bag_id, media.0, media.1).await?;
    uploader.upload(candidate, bag_id, thumbnail.0, thumbnail.1).await?;
    Ok(())
}

/// Digest of a staged asset: byte size and hex sha-256.
#[derive(Debug, Clone)]
pub struct AssetDigest {
    pub size: u64,
    pub sha256_hex: String,
}

/// Hash a staged asset for the on-chain object creation list.
pub async fn digest_file(path: &Path) -> Result<AssetDigest, std::io::Error> {
    let mut file = tokio::fs::File::open(path).await?;
    let mut hasher = Sha256::new();
    let mut size = 0u64;
    let mut buf = vec![0u8; 64 * 1024];

    loop {
        let read = file.read(&mut buf).await?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
        size += read as u64;
    }

    Ok(AssetDigest {
        size,
        sha256_hex: hex::encode(hasher.finalize()),
    })
}
