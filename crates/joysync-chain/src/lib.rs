//! On-chain video creation.
//!
//! Submits `Content::create_video` extrinsics signed by per-channel
//! collaborators and reports the result as a sum-typed
//! [`ExtrinsicOutcome`] the caller switches on. Submissions for the same
//! collaborator are serialized; the signer is sequential.

mod submitter;

use async_trait::async_trait;
use thiserror::Error;

pub use submitter::{ChainConfig, SubxtVideoCreator};

/// Errors talking to the chain, outside of extrinsic outcomes.
#[derive(Debug, Error)]
pub enum ChainError {
    /// RPC connection is down.
    #[error("chain api not connected: {0}")]
    ApiNotConnected(String),

    /// The platform application is not registered on chain.
    #[error("app not found: {0}")]
    AppNotFound(String),

    /// No signing key loaded for the requested collaborator.
    #[error("collaborator not found: {0}")]
    CollaboratorNotFound(String),

    /// Anything the RPC reported that we cannot classify.
    #[error("chain error: {0}")]
    Unknown(String),
}

/// Result type alias for chain operations.
pub type ChainResult<T> = Result<T, ChainError>;

/// Kinds of on-chain extrinsic failure the pipeline reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TxFailureKind {
    /// The channel's storage voucher is exhausted; halt the channel until
    /// its next refresh.
    VoucherLimit,
    /// Any other dispatch failure; the video attempt failed.
    Other,
}

/// Events decoded from a finalized extrinsic.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChainEvent {
    /// A video record was created on chain.
    VideoCreated {
        channel_id: u64,
        video_id: u64,
        /// Data object ids registered with the video, media first.
        data_object_ids: Vec<u64>,
    },
    /// Data objects were accepted into the channel's bag.
    DataObjectsUploaded { object_ids: Vec<u64> },
    /// Anything else emitted in the same block.
    Other { pallet: String, variant: String },
}

/// Result of one extrinsic submission.
///
/// A sum type instead of exception-style control flow: the state machine
/// switches on this.
#[derive(Debug, Clone)]
pub enum ExtrinsicOutcome {
    /// Finalized in a block; `events` carries everything the extrinsic emitted.
    Finalized { events: Vec<ChainEvent> },
    /// Finalized but the dispatch failed.
    Failed { kind: TxFailureKind, message: String },
    /// Never made it into a block (signing error, pool rejection).
    /// Retriable without any state change.
    Rejected { reason: String },
}

/// One asset attached to a video: byte size and content hash.
#[derive(Debug, Clone)]
pub struct AssetSpec {
    pub size: u64,
    /// ipfs-style hex digest of the content.
    pub content_hash: String,
}

/// Everything needed to create one on-chain video.
#[derive(Debug, Clone)]
pub struct CreateVideoRequest {
    /// On-chain channel to attach the video to.
    pub joystream_channel_id: u64,
    /// Collaborator account that signs for this channel.
    pub collaborator: String,
    pub title: String,
    pub description: String,
    pub language: Option<String>,
    pub category_id: Option<String>,
    pub is_public: bool,
    /// Media asset, always first in the attached object list.
    pub media: AssetSpec,
    /// Thumbnail asset, always second.
    pub thumbnail: AssetSpec,
    /// Expected committed storage price per object, from the read model.
    pub expected_data_object_state_bloat_bond: u128,
}

/// Submits video creation extrinsics.
///
/// Trait-shaped so the pipeline can run against a mock chain in tests.
#[async_trait]
pub trait VideoCreator: Send + Sync {
    /// Submit `create_video` and classify the result.
    ///
    /// Submissions sharing a collaborator are totally ordered.
    async fn create_video(&self, request: &CreateVideoRequest) -> ChainResult<ExtrinsicOutcome>;
}

impl ExtrinsicOutcome {
    /// The `VideoCreated` event, if finalized with one.
    pub fn video_created(&self) -> Option<&ChainEvent> {
        match self {
            ExtrinsicOutcome::Finalized { events } => events
                .iter()
                .find(|e| matches!(e, ChainEvent::VideoCreated { .. })),
            _ => None,
        }
    }

    /// Whether a `DataObjectsUploaded` event accompanied finalization.
    pub fn has_data_objects_uploaded(&self) -> bool {
        match self {
            ExtrinsicOutcome::Finalized { events } => events
                .iter()
                .any(|e| matches!(e, ChainEvent::DataObjectsUploaded { .. })),
            _ => false,
        }
    }
}
