use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

/// A cached value together with its two deadlines.
///
/// After `recheck_at` the entry is stale and due for a background refresh, but it is still
/// served. At or after `expires_at` it is treated as absent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entry<V> {
    pub value: V,
    pub recheck_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl<V> Entry<V> {
    /// Creates an entry computed at `now`.
    ///
    /// `recheck_at` never lies past `expires_at`; a `recheck` window larger than `expires` is
    /// clamped, which turns off background refreshes for this entry.
    pub fn new(value: V, now: DateTime<Utc>, recheck: Duration, expires: Duration) -> Self {
        let expires_at = add_std(now, expires);
        let recheck_at = add_std(now, recheck).min(expires_at);
        Self {
            value,
            recheck_at,
            expires_at,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }

    /// Whether the background refresher should recompute this entry at `now`.
    pub fn needs_recheck(&self, now: DateTime<Utc>) -> bool {
        needs_recheck(self.recheck_at, self.expires_at, now)
    }
}

pub(crate) fn needs_recheck(
    recheck_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    now: DateTime<Utc>,
) -> bool {
    recheck_at <= now && recheck_at < expires_at
}

/// Adds a std duration to a timestamp, saturating at the largest representable instant.
pub(crate) fn add_std(at: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
    TimeDelta::from_std(duration)
        .ok()
        .and_then(|delta| at.checked_add_signed(delta))
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
