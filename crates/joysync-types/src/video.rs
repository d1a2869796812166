//! Video records and the lifecycle state machine.

use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle state of a tracked video.
///
/// Transitions only move along the directed graph enforced by
/// [`VideoState::can_transition`]; `UploadSucceeded` and `VideoUnavailable`
/// are sinks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum VideoState {
    /// Discovered by the metadata poller, nothing staged yet.
    New,
    /// On-chain creation attempt failed; re-enters the download path.
    VideoCreationFailed,
    /// On-chain record exists, media bytes not yet accepted by the fleet.
    VideoCreated,
    /// Upload to the storage fleet failed; re-enters the uploader.
    UploadFailed,
    /// Media and thumbnail accepted by a storage bucket. Terminal.
    UploadSucceeded,
    /// Gone or permanently unreachable upstream. Terminal.
    VideoUnavailable,
}

impl VideoState {
    /// Whether no further transitions leave this state.
    pub fn is_terminal(self) -> bool {
        matches!(self, VideoState::UploadSucceeded | VideoState::VideoUnavailable)
    }

    /// Whether the lifecycle graph has an edge `self -> to`.
    pub fn can_transition(self, to: VideoState) -> bool {
        use VideoState::*;
        matches!(
            (self, to),
            (New, VideoCreated)
                | (New, VideoCreationFailed)
                | (New, VideoUnavailable)
                | (VideoCreationFailed, VideoCreated)
                | (VideoCreationFailed, VideoUnavailable)
                | (VideoCreated, UploadSucceeded)
                | (VideoCreated, UploadFailed)
                | (UploadFailed, UploadSucceeded)
                | (UploadFailed, VideoUnavailable)
        )
    }

    /// Whether the on-chain video payload must be present in this state.
    pub fn requires_onchain_record(self) -> bool {
        matches!(
            self,
            VideoState::VideoCreated | VideoState::UploadFailed | VideoState::UploadSucceeded
        )
    }
}

impl std::fmt::Display for VideoState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            VideoState::New => "New",
            VideoState::VideoCreationFailed => "VideoCreationFailed",
            VideoState::VideoCreated => "VideoCreated",
            VideoState::UploadFailed => "UploadFailed",
            VideoState::UploadSucceeded => "UploadSucceeded",
            VideoState::VideoUnavailable => "VideoUnavailable",
        };
        write!(f, "{}", s)
    }
}

/// On-chain video created for a mirrored upload.
///
/// Asset ids are ordered: media first, thumbnail second.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JoystreamVideo {
    /// On-chain video id.
    pub id: u64,
    /// Data object id of the media asset.
    pub media_object_id: u64,
    /// Data object id of the thumbnail asset.
    pub thumbnail_object_id: u64,
}

impl JoystreamVideo {
    /// Ordered asset ids `[media, thumbnail]`.
    pub fn asset_ids(&self) -> [u64; 2] {
        [self.media_object_id, self.thumbnail_object_id]
    }
}

/// A tracked video, keyed by `(channel_id, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VideoRecord {
    /// External video id.
    pub id: String,
    /// External channel id of the owner.
    pub channel_id: String,
    /// Denormalized on-chain channel id.
    pub joystream_channel_id: u64,

    pub title: String,
    pub description: String,
    /// Duration in seconds.
    pub duration_s: u64,
    pub thumbnail_url: String,
    pub published_at: DateTime<Utc>,
    pub upload_status: String,
    pub privacy_status: String,
    pub live_broadcast_content: String,
    pub license: String,
    /// Media container reported upstream (e.g. `mp4`).
    pub container: String,
    pub view_count: u64,

    /// Synthesized platform category.
    pub category_id: Option<String>,
    /// Synthesized language tag.
    pub language: Option<String>,

    /// Size of the staged media bytes, recorded by the download worker.
    pub media_size: Option<u64>,
    /// Transient download failures so far.
    pub download_attempts: u32,

    /// Lifecycle state; advances only along the graph.
    pub state: VideoState,
    /// On-chain record, present from `VideoCreated` onward.
    pub joystream_video: Option<JoystreamVideo>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Whether the download worker may pick this video up in state `New`.
    pub fn is_downloadable(&self) -> bool {
        self.privacy_status == "public"
            && self.upload_status == "processed"
            && self.live_broadcast_content == "none"
    }

    /// Advance to `to`, validating the lifecycle graph.
    ///
    /// Entering `VideoCreated` must go through [`VideoRecord::mark_created`]
    /// so the on-chain payload lands atomically with the state. Entering
    /// `VideoUnavailable` clears the payload.
    pub fn advance(&mut self, to: VideoState) -> Result<(), DomainError> {
        if !self.state.can_transition(to) {
            return Err(DomainError::InvalidTransition { from: self.state, to });
        }
        if to == VideoState::VideoCreated && self.joystream_video.is_none() {
            return Err(DomainError::MissingJoystreamVideo(to));
        }
        if !to.requires_onchain_record() {
            self.joystream_video = None;
        }
        self.state = to;
        Ok(())
    }

    /// Record a successful on-chain creation: payload and state together.
    pub fn mark_created(&mut self, onchain: JoystreamVideo) -> Result<(), DomainError> {
        if !self.state.can_transition(VideoState::VideoCreated) {
            return Err(DomainError::InvalidTransition {
                from: self.state,
                to: VideoState::VideoCreated,
            });
        }
        self.joystream_video = Some(onchain);
        self.state = VideoState::VideoCreated;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_video(state: VideoState) -> VideoRecord {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        VideoRecord {
            id: "vid-1".to_string(),
            channel_id: "UCabc".to_string(),
            joystream_channel_id: 7,
            title: "title".to_string(),
            description: String::new(),
            duration_s: 120,
            thumbnail_url: "https://i.ytimg.com/vi/vid-1/default.jpg".to_string(),
            published_at: now,
            upload_status: "processed".to_string(),
            privacy_status: "public".to_string(),
            live_broadcast_content: "none".to_string(),
            license: "youtube".to_string(),
            container: "mp4".to_string(),
            view_count: 0,
            category_id: None,
            language: None,
            media_size: None,
            download_attempts: 0,
            state,
            joystream_video: None,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_terminal_states() {
        assert!(VideoState::UploadSucceeded.is_terminal());
        assert!(VideoState::VideoUnavailable.is_terminal());
        assert!(!VideoState::New.is_terminal());
        assert!(!VideoState::UploadFailed.is_terminal());
    }

    #[test]
    fn test_no_edges_out_of_sinks() {
        use VideoState::*;
        for to in [New, VideoCreationFailed, VideoCreated, UploadFailed, UploadSucceeded, VideoUnavailable] {
            assert!(!UploadSucceeded.can_transition(to));
            assert!(!VideoUnavailable.can_transition(to));
        }
    }

    #[test]
    fn test_mark_created_sets_payload_and_state() {
        let mut video = make_video(VideoState::New);
        video
            .mark_created(JoystreamVideo {
                id: 42,
                media_object_id: 100,
                thumbnail_object_id: 101,
            })
            .unwrap();

        assert_eq!(video.state, VideoState::VideoCreated);
        assert_eq!(video.joystream_video.as_ref().unwrap().asset_ids(), [100, 101]);
    }

    #[test]
    fn test_advance_rejects_created_without_payload() {
        let mut video = make_video(VideoState::New);
        let err = video.advance(VideoState::VideoCreated).unwrap_err();
        assert_eq!(err, DomainError::MissingJoystreamVideo(VideoState::VideoCreated));
    }

    #[test]
    fn test_advance_rejects_off_graph_edge() {
        let mut video = make_video(VideoState::New);
        let err = video.advance(VideoState::UploadSucceeded).unwrap_err();
        assert!(matches!(err, DomainError::InvalidTransition { .. }));
    }

    #[test]
    fn test_unavailable_clears_onchain_payload() {
        let mut video = make_video(VideoState::New);
        video
            .mark_created(JoystreamVideo {
                id: 1,
                media_object_id: 2,
                thumbnail_object_id: 3,
            })
            .unwrap();
        video.advance(VideoState::UploadFailed).unwrap();
        video.advance(VideoState::VideoUnavailable).unwrap();

        assert!(video.joystream_video.is_none());
    }

    #[test]
    fn test_downloadable_filter() {
        let mut video = make_video(VideoState::New);
        assert!(video.is_downloadable());

        video.privacy_status = "private".to_string();
        assert!(!video.is_downloadable());

        video.privacy_status = "public".to_string();
        video.live_broadcast_content = "live".to_string();
        assert!(!video.is_downloadable());
    }
}
