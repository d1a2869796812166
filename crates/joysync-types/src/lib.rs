//! Shared domain model for the joysync mirroring pipeline.
//!
//! Defines the channel and video records tracked by the state store, the
//! video lifecycle state machine, and the creator-action replay guard.

pub mod channel;
pub mod video;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub use channel::{ChannelRecord, CreatorAction, SuspensionReason, VerifiedTier, YppStatus};
pub use video::{JoystreamVideo, VideoRecord, VideoState};

/// A whitelisted channel handle, consulted during onboarding only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhitelistEntry {
    /// Channel handle (e.g. `@creator`).
    pub channel_handle: String,
    /// When the handle was whitelisted.
    pub created_at: DateTime<Utc>,
}

/// Domain rule violations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DomainError {
    /// Attempted a video state transition outside the lifecycle graph.
    #[error("invalid video state transition from {from} to {to}")]
    InvalidTransition {
        /// State the record is currently in.
        from: VideoState,
        /// State the caller attempted to enter.
        to: VideoState,
    },

    /// Entering an on-chain state requires the on-chain video payload.
    #[error("on-chain video payload required when entering {0}")]
    MissingJoystreamVideo(VideoState),

    /// Creator action timestamp did not strictly exceed `last_acted_at`.
    #[error("action timestamp {attempted} does not exceed last action at {last_acted_at}")]
    ActionReplayed {
        /// Timestamp embedded in the rejected action.
        attempted: DateTime<Utc>,
        /// The channel's stored high-water mark.
        last_acted_at: DateTime<Utc>,
    },
}
