//! Daily API quota accounting.
//!
//! Two named pools (`sync`, `signup`) reset at UTC midnight. Reservations
//! are compare-and-add under a single critical section and are never
//! refunded; unspent reservations stay spent until the reset.

use chrono::{DateTime, NaiveDate, Utc};
use std::collections::BTreeMap;
use std::sync::Mutex;
use tracing::{debug, info};

/// Pool consumed by metadata polling and downloads.
pub const SYNC_POOL: &str = "sync";
/// Pool reserved by the onboarding collaborator; observed here for exclusion.
pub const SIGNUP_POOL: &str = "signup";

#[derive(Debug, Clone, Copy)]
struct Pool {
    cap: u32,
    used: u32,
}

struct Inner {
    day: NaiveDate,
    pools: BTreeMap<&'static str, Pool>,
}

/// Tracks consumption of the daily external-API quota.
pub struct QuotaTracker {
    inner: Mutex<Inner>,
}

impl QuotaTracker {
    /// Create a tracker with per-pool caps, anchored to the current UTC day.
    pub fn new(sync_cap: u32, signup_cap: u32, now: DateTime<Utc>) -> Self {
        let mut pools = BTreeMap::new();
        pools.insert(SYNC_POOL, Pool { cap: sync_cap, used: 0 });
        pools.insert(SIGNUP_POOL, Pool { cap: signup_cap, used: 0 });
        Self {
            inner: Mutex::new(Inner {
                day: now.date_naive(),
                pools,
            }),
        }
    }

    /// Reserve `n` units from `pool`.
    ///
    /// Returns `false` when the reservation would exceed the cap (the pool
    /// is left untouched) or the pool is unknown. Rolls the day over first
    /// when `now` crossed UTC midnight.
    pub fn reserve(&self, pool: &str, n: u32, now: DateTime<Utc>) -> bool {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        roll_day(&mut inner, now);

        let Some(entry) = inner.pools.get_mut(pool) else {
            return false;
        };

        match entry.used.checked_add(n) {
            Some(next) if next <= entry.cap => {
                entry.used = next;
                debug!(pool, reserved = n, used = entry.used, cap = entry.cap, "Quota reserved");
                true
            }
            _ => {
                debug!(pool, requested = n, used = entry.used, cap = entry.cap, "Quota refused");
                false
            }
        }
    }

    /// `(used, cap)` for a pool, rolling the day over first.
    pub fn usage(&self, pool: &str, now: DateTime<Utc>) -> Option<(u32, u32)> {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        roll_day(&mut inner, now);
        inner.pools.get(pool).map(|p| (p.used, p.cap))
    }

    /// Zero every pool when `now` is a later UTC day than the anchor.
    pub fn reset_if_new_day(&self, now: DateTime<Utc>) {
        let mut inner = self.inner.lock().expect("quota lock poisoned");
        roll_day(&mut inner, now);
    }
}

fn roll_day(inner: &mut Inner, now: DateTime<Utc>) {
    let today = now.date_naive();
    if today > inner.day {
        info!(from = %inner.day, to = %today, "Quota pools reset at UTC midnight");
        inner.day = today;
        for pool in inner.pools.values_mut() {
            pool.used = 0;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn at(day: u32, hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, day, hour, 0, 0).unwrap()
    }

    #[test]
    fn test_reserve_until_cap() {
        let quota = QuotaTracker::new(3, 1, at(1, 0));

        assert!(quota.reserve(SYNC_POOL, 2, at(1, 1)));
        assert!(quota.reserve(SYNC_POOL, 1, at(1, 2)));
        assert!(!quota.reserve(SYNC_POOL, 1, at(1, 3)), "cap reached");
        assert_eq!(quota.usage(SYNC_POOL, at(1, 3)), Some((3, 3)));
    }

    #[test]
    fn test_refused_reservation_leaves_pool_untouched() {
        let quota = QuotaTracker::new(5, 1, at(1, 0));

        assert!(quota.reserve(SYNC_POOL, 4, at(1, 1)));
        assert!(!quota.reserve(SYNC_POOL, 2, at(1, 2)));
        assert_eq!(quota.usage(SYNC_POOL, at(1, 2)), Some((4, 5)));
        // The remaining unit is still available.
        assert!(quota.reserve(SYNC_POOL, 1, at(1, 3)));
    }

    #[test]
    fn test_pools_are_independent() {
        let quota = QuotaTracker::new(1, 1, at(1, 0));

        assert!(quota.reserve(SYNC_POOL, 1, at(1, 1)));
        assert!(quota.reserve(SIGNUP_POOL, 1, at(1, 1)));
        assert!(!quota.reserve(SYNC_POOL, 1, at(1, 2)));
    }

    #[test]
    fn test_utc_midnight_reset() {
        let quota = QuotaTracker::new(1, 1, at(1, 0));

        assert!(quota.reserve(SYNC_POOL, 1, at(1, 23)));
        assert!(!quota.reserve(SYNC_POOL, 1, at(1, 23)));

        // Next UTC day: the pool is fresh.
        assert!(quota.reserve(SYNC_POOL, 1, at(2, 0)));
    }

    #[test]
    fn test_unknown_pool_refused() {
        let quota = QuotaTracker::new(1, 1, at(1, 0));
        assert!(!quota.reserve("bogus", 1, at(1, 1)));
    }

    #[test]
    fn test_zero_cap_refuses_everything() {
        let quota = QuotaTracker::new(0, 0, at(1, 0));
        assert!(!quota.reserve(SYNC_POOL, 1, at(1, 1)));
    }
}
