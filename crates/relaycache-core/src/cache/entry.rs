use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::OperationType;

/// A cached value with its expiry metadata.
///
/// Serialized in the snapshot as
/// `{"value", "createdAt", "expiresAt", "operationType", "params"}` with
/// epoch-millisecond timestamps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CacheEntry {
    pub value: Value,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub expires_at: DateTime<Utc>,
    pub operation_type: OperationType,
    #[serde(default)]
    pub params: Value,
}

impl CacheEntry {
    /// Create an entry expiring `ttl` after `now`.
    ///
    /// A non-positive TTL is bumped to one millisecond so `expires_at` is
    /// always strictly after `created_at`.
    pub fn new(
        operation_type: OperationType,
        params: Value,
        value: Value,
        ttl: Duration,
        now: DateTime<Utc>,
    ) -> Self {
        let ttl = ttl.max(Duration::milliseconds(1));
        // TTLs reaching past the representable range expire at the end of time
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);
        Self {
            value,
            created_at: now,
            expires_at,
            operation_type,
            params,
        }
    }

    /// Live iff `now < expires_at`.
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_live(now)
    }

    /// Whether the entry's timestamps are usable. Restored snapshots can carry
    /// entries edited by hand or written by a buggy build.
    pub fn is_well_formed(&self) -> bool {
        self.expires_at > self.created_at
    }

    pub fn age_minutes(&self, now: DateTime<Utc>) -> i64 {
        (now - self.created_at).num_minutes()
    }

    pub fn age_display(&self, now: DateTime<Utc>) -> String {
        let minutes = self.age_minutes(now);
        if minutes < 1 {
            // Also covers clock skew (negative age)
            "just now".to_string()
        } else if minutes < 60 {
            format!("{}m ago", minutes)
        } else if minutes < 1440 {
            let hours = minutes / 60;
            if minutes % 60 >= 30 {
                format!("{}h ago", hours + 1)
            } else {
                format!("{}h ago", hours)
            }
        } else {
            let days = minutes / 1440;
            if (minutes % 1440) / 60 >= 12 {
                format!("{}d ago", days + 1)
            } else {
                format!("{}d ago", days)
            }
        }
    }
}
