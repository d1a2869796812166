//! Creator registry view: eligible channels in fair order.

use crate::StateStore;
use joysync_types::ChannelRecord;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Read-only projection over the channels table.
///
/// Emits sync candidates ordered by `last_acted_at` ascending, rotated by a
/// per-cycle cursor so consecutive cycles start from different channels.
pub struct CreatorRegistry {
    store: Arc<StateStore>,
    cursor: AtomicUsize,
}

impl CreatorRegistry {
    pub fn new(store: Arc<StateStore>) -> Self {
        Self {
            store,
            cursor: AtomicUsize::new(0),
        }
    }

    /// Channels the current sync cycle should visit, in order.
    ///
    /// Suspended and opted-out channels never appear; neither do channels
    /// missing either ingestion flag.
    pub async fn eligible_channels(&self) -> Vec<ChannelRecord> {
        let mut candidates: Vec<ChannelRecord> = self
            .store
            .all_channels()
            .await
            .into_iter()
            .filter(|c| c.is_sync_candidate())
            .collect();
        candidates.sort_by(|a, b| a.last_acted_at.cmp(&b.last_acted_at));

        if candidates.is_empty() {
            return candidates;
        }

        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % candidates.len();
        candidates.rotate_left(start);
        candidates
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use joysync_types::{SuspensionReason, VerifiedTier, YppStatus};
    use tempfile::TempDir;

    async fn seed_channel(
        store: &StateStore,
        id: &str,
        ypp_status: YppStatus,
        last_acted_offset_s: i64,
    ) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let channel = joysync_types::ChannelRecord {
            id: id.to_string(),
            user_id: format!("user-{}", id),
            title: id.to_string(),
            description: String::new(),
            thumbnail_url: String::new(),
            user_access_token: "access".to_string(),
            user_refresh_token: "refresh".to_string(),
            uploads_playlist_id: format!("UU{}", id),
            joystream_channel_id: 1,
            referrer_channel_id: None,
            language: None,
            video_category_id: None,
            should_be_ingested: true,
            allow_operator_ingestion: true,
            perform_unauthorized_sync: false,
            ypp_status,
            historical_video_synced_size: 0,
            last_acted_at: now + chrono::Duration::seconds(last_acted_offset_s),
            created_at: now,
            updated_at: now,
        };
        store.put_channel(channel).await.unwrap();
    }

    #[tokio::test]
    async fn test_eligible_channels_order_and_exclusions() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).await.unwrap());

        seed_channel(&store, "late", YppStatus::Verified(VerifiedTier::Bronze), 100).await;
        seed_channel(&store, "early", YppStatus::Verified(VerifiedTier::Gold), 0).await;
        seed_channel(
            &store,
            "suspended",
            YppStatus::Suspended(SuspensionReason::Legal),
            0,
        )
        .await;
        seed_channel(&store, "opted-out", YppStatus::OptedOut, 0).await;

        let registry = CreatorRegistry::new(store);
        let channels = registry.eligible_channels().await;

        let ids: Vec<&str> = channels.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["early", "late"]);
    }

    #[tokio::test]
    async fn test_round_robin_rotates_between_cycles() {
        let dir = TempDir::new().unwrap();
        let store = Arc::new(StateStore::open(dir.path()).await.unwrap());

        seed_channel(&store, "a", YppStatus::Verified(VerifiedTier::Bronze), 0).await;
        seed_channel(&store, "b", YppStatus::Verified(VerifiedTier::Bronze), 10).await;

        let registry = CreatorRegistry::new(store);
        let first = registry.eligible_channels().await;
        let second = registry.eligible_channels().await;

        assert_eq!(first[0].id, "a");
        assert_eq!(second[0].id, "b");
    }
}
