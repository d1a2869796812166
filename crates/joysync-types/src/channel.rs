//! Channel records, participation status and the creator-action replay guard.

use crate::DomainError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::str::FromStr;

/// Tier granted to a verified program participant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerifiedTier {
    Bronze,
    Silver,
    Gold,
    Diamond,
}

/// Reason a channel was suspended from the program.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuspensionReason {
    /// Upstream authorization failed repeatedly.
    AuthFailed,
    CopyrightBreach,
    MisleadingContent,
    ProgramTermsExploit,
    Legal,
}

/// Participation status in the creator partnership program.
///
/// Encoded as `"Verified::Bronze"`-style strings so stored records stay
/// readable and prefix checks (`Verified::`, `Suspended::`) stay cheap.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YppStatus {
    Unverified,
    Verified(VerifiedTier),
    Suspended(SuspensionReason),
    OptedOut,
}

impl YppStatus {
    /// Whether the status begins with `Verified::`.
    pub fn is_verified(self) -> bool {
        matches!(self, YppStatus::Verified(_))
    }

    /// Whether the status begins with `Suspended::`.
    pub fn is_suspended(self) -> bool {
        matches!(self, YppStatus::Suspended(_))
    }
}

impl std::fmt::Display for YppStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            YppStatus::Unverified => write!(f, "Unverified"),
            YppStatus::Verified(tier) => write!(f, "Verified::{:?}", tier),
            YppStatus::Suspended(reason) => write!(f, "Suspended::{:?}", reason),
            YppStatus::OptedOut => write!(f, "OptedOut"),
        }
    }
}

impl FromStr for YppStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Unverified" => return Ok(YppStatus::Unverified),
            "OptedOut" => return Ok(YppStatus::OptedOut),
            _ => {}
        }
        if let Some(tier) = s.strip_prefix("Verified::") {
            let tier = match tier {
                "Bronze" => VerifiedTier::Bronze,
                "Silver" => VerifiedTier::Silver,
                "Gold" => VerifiedTier::Gold,
                "Diamond" => VerifiedTier::Diamond,
                other => return Err(format!("unknown verified tier: {}", other)),
            };
            return Ok(YppStatus::Verified(tier));
        }
        if let Some(reason) = s.strip_prefix("Suspended::") {
            let reason = match reason {
                "AuthFailed" => SuspensionReason::AuthFailed,
                "CopyrightBreach" => SuspensionReason::CopyrightBreach,
                "MisleadingContent" => SuspensionReason::MisleadingContent,
                "ProgramTermsExploit" => SuspensionReason::ProgramTermsExploit,
                "Legal" => SuspensionReason::Legal,
                other => return Err(format!("unknown suspension reason: {}", other)),
            };
            return Ok(YppStatus::Suspended(reason));
        }
        Err(format!("unknown ypp status: {}", s))
    }
}

impl Serialize for YppStatus {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for YppStatus {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An authenticated creator action against a channel.
///
/// The embedded timestamp is the replay guard: it must strictly exceed the
/// channel's stored `last_acted_at` to be accepted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum CreatorAction {
    /// Toggle the creator's ingestion intent.
    IngestChannel { should_be_ingested: bool },
    /// Leave the program; stops all syncing.
    OptOutChannel,
    /// Change the default platform category for future videos.
    UpdateVideoCategory { category_id: String },
}

/// An enrolled channel, keyed by `(user_id, id)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelRecord {
    /// External channel id.
    pub id: String,
    /// Owning user id.
    pub user_id: String,

    pub title: String,
    pub description: String,
    pub thumbnail_url: String,

    /// OAuth access token for reading the channel.
    pub user_access_token: String,
    /// OAuth refresh token.
    pub user_refresh_token: String,
    /// Uploads playlist id of the channel.
    pub uploads_playlist_id: String,

    /// On-chain channel id.
    pub joystream_channel_id: u64,
    /// Channel that referred this one, if any.
    pub referrer_channel_id: Option<u64>,
    /// Language tag synthesized onto new videos.
    pub language: Option<String>,
    /// Default platform category for new videos.
    pub video_category_id: Option<String>,

    /// Creator intent to have the channel mirrored.
    pub should_be_ingested: bool,
    /// Operator consent to mirror the channel.
    pub allow_operator_ingestion: bool,
    /// Sync without upstream authorization (operator-managed channels).
    pub perform_unauthorized_sync: bool,

    /// Program participation status.
    pub ypp_status: YppStatus,

    /// Bytes of historical video accepted by the fleet so far.
    pub historical_video_synced_size: u64,
    /// Monotonic high-water mark over creator action timestamps.
    pub last_acted_at: DateTime<Utc>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ChannelRecord {
    /// Whether the sync pipeline may act on this channel.
    ///
    /// Requires both ingestion flags and a `Verified::*` status.
    pub fn is_sync_candidate(&self) -> bool {
        self.should_be_ingested && self.allow_operator_ingestion && self.ypp_status.is_verified()
    }

    /// Apply a creator action, enforcing the replay guard.
    ///
    /// The action timestamp must strictly exceed `last_acted_at`; equal or
    /// older timestamps are rejected and the record is left untouched.
    pub fn apply_action(
        &mut self,
        action: &CreatorAction,
        timestamp: DateTime<Utc>,
    ) -> Result<(), DomainError> {
        if timestamp <= self.last_acted_at {
            return Err(DomainError::ActionReplayed {
                attempted: timestamp,
                last_acted_at: self.last_acted_at,
            });
        }

        match action {
            CreatorAction::IngestChannel { should_be_ingested } => {
                self.should_be_ingested = *should_be_ingested;
            }
            CreatorAction::OptOutChannel => {
                self.should_be_ingested = false;
                self.ypp_status = YppStatus::OptedOut;
            }
            CreatorAction::UpdateVideoCategory { category_id } => {
                self.video_category_id = Some(category_id.clone());
            }
        }

        self.last_acted_at = timestamp;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn make_channel() -> ChannelRecord {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
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

    #[test]
    fn test_ypp_status_round_trip() {
        for status in [
            YppStatus::Unverified,
            YppStatus::Verified(VerifiedTier::Gold),
            YppStatus::Suspended(SuspensionReason::Legal),
            YppStatus::OptedOut,
        ] {
            let encoded = status.to_string();
            let decoded: YppStatus = encoded.parse().unwrap();
            assert_eq!(decoded, status);
        }
    }

    #[test]
    fn test_ypp_status_string_forms() {
        assert_eq!(
            YppStatus::Verified(VerifiedTier::Bronze).to_string(),
            "Verified::Bronze"
        );
        assert_eq!(
            YppStatus::Suspended(SuspensionReason::AuthFailed).to_string(),
            "Suspended::AuthFailed"
        );
    }

    #[test]
    fn test_sync_candidate_requires_all_three() {
        let mut channel = make_channel();
        assert!(channel.is_sync_candidate());

        channel.should_be_ingested = false;
        assert!(!channel.is_sync_candidate());

        channel.should_be_ingested = true;
        channel.allow_operator_ingestion = false;
        assert!(!channel.is_sync_candidate());

        channel.allow_operator_ingestion = true;
        channel.ypp_status = YppStatus::Suspended(SuspensionReason::Legal);
        assert!(!channel.is_sync_candidate());
    }

    #[test]
    fn test_replay_guard_rejects_equal_timestamp() {
        let mut channel = make_channel();
        let stamp = channel.last_acted_at;

        let err = channel
            .apply_action(&CreatorAction::IngestChannel { should_be_ingested: false }, stamp)
            .unwrap_err();

        assert!(matches!(err, DomainError::ActionReplayed { .. }));
        assert!(channel.should_be_ingested, "rejected action must not mutate");
    }

    #[test]
    fn test_replay_guard_accepts_newer_timestamp() {
        let mut channel = make_channel();
        let stamp = channel.last_acted_at + chrono::Duration::seconds(1);

        channel
            .apply_action(&CreatorAction::IngestChannel { should_be_ingested: false }, stamp)
            .unwrap();

        assert!(!channel.should_be_ingested);
        assert_eq!(channel.last_acted_at, stamp);
    }

    #[test]
    fn test_opt_out_clears_ingestion() {
        let mut channel = make_channel();
        let stamp = channel.last_acted_at + chrono::Duration::seconds(5);

        channel.apply_action(&CreatorAction::OptOutChannel, stamp).unwrap();

        assert_eq!(channel.ypp_status, YppStatus::OptedOut);
        assert!(!channel.should_be_ingested);
        assert!(!channel.is_sync_candidate());
    }
}
