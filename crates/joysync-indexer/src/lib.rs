//! Read-model client against the chain indexer's GraphQL endpoint.
//!
//! Every query gets an explicit record type; `null` and absent are only
//! distinguished at this edge. Pagination is cursor-based, 1000 items per
//! page.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;
use tracing::debug;

/// Items fetched per page on paginated queries.
const PAGE_SIZE: usize = 1000;

/// Indexer errors.
#[derive(Debug, Error)]
pub enum IndexerError {
    /// Endpoint unreachable.
    #[error("indexer not connected: {0}")]
    NotConnected(String),

    /// The indexer's processor lags the chain too far to trust reads.
    #[error("indexer state outdated: processor at block {processor_block}")]
    OutdatedState { processor_block: u64 },

    /// Query-level failure reported by the endpoint.
    #[error("indexer query failed: {0}")]
    Query(String),
}

impl From<reqwest::Error> for IndexerError {
    fn from(e: reqwest::Error) -> Self {
        IndexerError::NotConnected(e.to_string())
    }
}

/// Result type alias for indexer operations.
pub type IndexerResult<T> = Result<T, IndexerError>;

/// On-chain channel as seen through the read model.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerChannel {
    #[serde(deserialize_with = "de_string_u64")]
    pub id: u64,
    pub title: Option<String>,
    #[serde(rename = "totalVideosCreated", default)]
    pub total_videos_created: u64,
}

/// On-chain video as seen through the read model.
#[derive(Debug, Clone, Deserialize)]
pub struct IndexerVideo {
    #[serde(deserialize_with = "de_string_u64")]
    pub id: u64,
    #[serde(rename = "channelId", deserialize_with = "de_string_u64")]
    pub channel_id: u64,
}

/// A storage bucket advertising capacity.
#[derive(Debug, Clone, Deserialize)]
pub struct StorageBucket {
    pub id: String,
    /// Root url of the operator node; absent when the operator is offline
    /// or has not published an endpoint.
    #[serde(rename = "operatorEndpoint")]
    pub operator_endpoint: Option<String>,
    #[serde(rename = "dataObjectsSizeLimit", deserialize_with = "de_string_u64")]
    pub size_limit: u64,
    #[serde(rename = "dataObjectsSize", deserialize_with = "de_string_u64")]
    pub size_used: u64,
    #[serde(rename = "dataObjectCountLimit", deserialize_with = "de_string_u64")]
    pub object_limit: u64,
    #[serde(rename = "dataObjectCount", deserialize_with = "de_string_u64")]
    pub object_count: u64,
}

impl StorageBucket {
    /// Free byte capacity.
    pub fn free_capacity(&self) -> u64 {
        self.size_limit.saturating_sub(self.size_used)
    }

    /// Free object slots.
    pub fn free_objects(&self) -> u64 {
        self.object_limit.saturating_sub(self.object_count)
    }
}

/// A stored data object.
#[derive(Debug, Clone, Deserialize)]
pub struct DataObject {
    pub id: String,
    #[serde(rename = "isAccepted")]
    pub is_accepted: bool,
    #[serde(rename = "size", deserialize_with = "de_string_u64")]
    pub size: u64,
}

/// Read-model queries the pipeline consumes.
#[async_trait]
pub trait IndexerClient: Send + Sync {
    async fn channel_by_id(&self, id: u64) -> IndexerResult<Option<IndexerChannel>>;

    async fn video_by_id(&self, id: u64) -> IndexerResult<Option<IndexerVideo>>;

    /// Active storage buckets serving `bag_id`, with capacity figures.
    async fn storage_buckets_for_bag(&self, bag_id: &str) -> IndexerResult<Vec<StorageBucket>>;

    async fn data_object_by_id(&self, id: &str) -> IndexerResult<Option<DataObject>>;

    /// Last block the indexer's processor has ingested.
    async fn processor_block(&self) -> IndexerResult<u64>;
}

/// The storage bag owning a channel's data objects.
pub fn channel_bag_id(joystream_channel_id: u64) -> String {
    format!("dynamic:channel:{}", joystream_channel_id)
}

#[derive(Deserialize)]
struct GraphQlEnvelope<T> {
    data: Option<T>,
    #[serde(default)]
    errors: Vec<GraphQlError>,
}

#[derive(Deserialize)]
struct GraphQlError {
    message: String,
}

/// HTTP implementation of [`IndexerClient`].
pub struct GraphQlClient {
    endpoint: String,
    http: reqwest::Client,
}

impl GraphQlClient {
    pub fn new(endpoint: String) -> IndexerResult<Self> {
        let http = reqwest::Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .map_err(|e| IndexerError::NotConnected(e.to_string()))?;
        Ok(Self { endpoint, http })
    }

    async fn query<T: serde::de::DeserializeOwned>(
        &self,
        query: &str,
        variables: serde_json::Value,
    ) -> IndexerResult<T> {
        let response = self
            .http
            .post(&self.endpoint)
            .json(&json!({ "query": query, "variables": variables }))
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(IndexerError::NotConnected(format!(
                "endpoint returned {}",
                response.status()
            )));
        }

        let envelope: GraphQlEnvelope<T> = response
            .json()
            .await
            .map_err(|e| IndexerError::Query(e.to_string()))?;

        if let Some(error) = envelope.errors.first() {
            return Err(IndexerError::Query(error.message.clone()));
        }
        envelope
            .data
            .ok_or_else(|| IndexerError::Query("empty data in response".to_string()))
    }
}

#[async_trait]
impl IndexerClient for GraphQlClient {
    async fn channel_by_id(&self, id: u64) -> IndexerResult<Option<IndexerChannel>> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "channelByUniqueInput")]
            channel: Option<IndexerChannel>,
        }

        let data: Data = self
            .query(
                r#"query($id: ID!) {
                    channelByUniqueInput(where: { id: $id }) {
                        id title totalVideosCreated
                    }
                }"#,
                json!({ "id": id.to_string() }),
            )
            .await?;
        Ok(data.channel)
    }

    async fn video_by_id(&self, id: u64) -> IndexerResult<Option<IndexerVideo>> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "videoByUniqueInput")]
            video: Option<IndexerVideo>,
        }

        let data: Data = self
            .query(
                r#"query($id: ID!) {
                    videoByUniqueInput(where: { id: $id }) { id channelId }
                }"#,
                json!({ "id": id.to_string() }),
            )
            .await?;
        Ok(data.video)
    }

    async fn storage_buckets_for_bag(&self, bag_id: &str) -> IndexerResult<Vec<StorageBucket>> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "storageBuckets")]
            buckets: Vec<StorageBucket>,
        }

        // Cursor pagination: offset advances by PAGE_SIZE until a short page.
        let mut buckets = Vec::new();
        let mut offset = 0usize;
        loop {
            let data: Data = self
                .query(
                    r#"query($bagId: String!, $limit: Int!, $offset: Int!) {
                        storageBuckets(
                            where: {
                                bags_some: { id_eq: $bagId },
                                operatorStatus_json: { isTypeOf_eq: "StorageBucketOperatorStatusActive" }
                            },
                            limit: $limit, offset: $offset
                        ) {
                            id operatorEndpoint
                            dataObjectsSizeLimit dataObjectsSize
                            dataObjectCountLimit dataObjectCount
                        }
                    }"#,
                    json!({ "bagId": bag_id, "limit": PAGE_SIZE, "offset": offset }),
                )
                .await?;

            let page_len = data.buckets.len();
            buckets.extend(data.buckets);
            if page_len < PAGE_SIZE {
                break;
            }
            offset += PAGE_SIZE;
        }

        debug!(bag_id = %bag_id, buckets = buckets.len(), "Storage buckets fetched");
        Ok(buckets)
    }

    async fn data_object_by_id(&self, id: &str) -> IndexerResult<Option<DataObject>> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "storageDataObjectByUniqueInput")]
            object: Option<DataObject>,
        }

        let data: Data = self
            .query(
                r#"query($id: ID!) {
                    storageDataObjectByUniqueInput(where: { id: $id }) {
                        id isAccepted size
                    }
                }"#,
                json!({ "id": id }),
            )
            .await?;
        Ok(data.object)
    }

    async fn processor_block(&self) -> IndexerResult<u64> {
        #[derive(Deserialize)]
        struct Data {
            #[serde(rename = "processorState")]
            state: ProcessorState,
        }
        #[derive(Deserialize)]
        struct ProcessorState {
            #[serde(rename = "lastProcessedBlock")]
            last_processed_block: u64,
        }

        let data: Data = self
            .query(
                r#"query { processorState { lastProcessedBlock } }"#,
                json!({}),
            )
            .await?;
        Ok(data.state.last_processed_block)
    }
}

fn de_string_u64<'de, D: serde::Deserializer<'de>>(deserializer: D) -> Result<u64, D::Error> {
    // The read model encodes big integers as strings.
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(u64),
    }
    match Raw::deserialize(deserializer)? {
        Raw::Text(s) => s.parse().map_err(serde::de::Error::custom),
        Raw::Number(n) => Ok(n),
    }
}
