//! Durable snapshot format for the cache store.
//!
//! ```text
//! {
//!   "version": "1.0",
//!   "timestamp": <epoch-ms at last persist>,
//!   "entries": [ ["<cacheKey>", { "value": ..., "createdAt": ..., ... }], ... ]
//! }
//! ```

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::CacheEntry;

/// Format tag written into every snapshot. Bump when the entry layout changes.
pub const SNAPSHOT_VERSION: &str = "1.0";

/// Snapshots older than this are discarded on load.
pub const MAX_SNAPSHOT_AGE_DAYS: i64 = 7;

#[derive(Error, Debug)]
pub enum SnapshotError {
    #[error("Snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to serialize snapshot: {0}")]
    Serialize(#[from] serde_json::Error),

    #[error("Snapshot is unreadable: {0}")]
    Corrupt(String),

    #[error("Snapshot version {found} does not match expected {expected}")]
    VersionMismatch { found: String, expected: String },

    #[error("Snapshot is {age_hours}h old, older than the {max_days}d limit")]
    Stale { age_hours: i64, max_days: i64 },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Snapshot {
    pub version: String,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    pub entries: Vec<(String, CacheEntry)>,
}

/// Just enough of a snapshot to decide whether the rest is worth parsing.
#[derive(Deserialize)]
struct SnapshotHeader {
    version: String,
    timestamp: i64,
}

impl Snapshot {
    pub fn new(entries: Vec<(String, CacheEntry)>, now: DateTime<Utc>) -> Self {
        Self {
            version: SNAPSHOT_VERSION.to_string(),
            timestamp: now,
            entries,
        }
    }

    pub fn encode(&self) -> Result<String, SnapshotError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse a stored blob, rejecting foreign versions and stale snapshots.
    ///
    /// The version and age are checked before the entries are parsed, so a
    /// snapshot from another format version reports `VersionMismatch` rather
    /// than `Corrupt`.
    pub fn decode(blob: &str, now: DateTime<Utc>, max_age: Duration) -> Result<Self, SnapshotError> {
        let header: SnapshotHeader =
            serde_json::from_str(blob).map_err(|e| SnapshotError::Corrupt(e.to_string()))?;

        if header.version != SNAPSHOT_VERSION {
            return Err(SnapshotError::VersionMismatch {
                found: header.version,
                expected: SNAPSHOT_VERSION.to_string(),
            });
        }

        let written_at = DateTime::from_timestamp_millis(header.timestamp)
            .ok_or_else(|| SnapshotError::Corrupt(format!("bad timestamp {}", header.timestamp)))?;
        let age = now - written_at;
        if age > max_age {
            return Err(SnapshotError::Stale {
                age_hours: age.num_hours(),
                max_days: max_age.num_days(),
            });
        }

        serde_json::from_str(blob).map_err(|e| SnapshotError::Corrupt(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OperationType;
    use serde_json::json;

    fn max_age() -> Duration {
        Duration::days(MAX_SNAPSHOT_AGE_DAYS)
    }

    fn sample(now: DateTime<Utc>) -> Snapshot {
        let entry = CacheEntry::new(
            OperationType::Geocoding,
            json!({"address": "123 Main St"}),
            json!({"lat": 1, "lng": 2}),
            Duration::days(30),
            now,
        );
        Snapshot::new(vec![("geocoding:{\"address\":\"123 Main St\"}".to_string(), entry)], now)
    }

    #[test]
    fn test_encoded_layout() {
        let now = DateTime::from_timestamp_millis(1_700_000_000_000).unwrap();
        let blob = sample(now).encode().unwrap();
        let raw: serde_json::Value = serde_json::from_str(&blob).unwrap();
        assert_eq!(raw["version"], json!("1.0"));
        assert_eq!(raw["timestamp"], json!(1_700_000_000_000i64));
        assert!(raw["entries"][0][0].is_string());
        assert_eq!(raw["entries"][0][1]["value"], json!({"lat": 1, "lng": 2}));
    }

    #[test]
    fn test_decode_accepts_fresh_snapshot() {
        let now = Utc::now();
        let blob = sample(now).encode().unwrap();
        let decoded = Snapshot::decode(&blob, now + Duration::days(6), max_age()).unwrap();
        assert_eq!(decoded.entries.len(), 1);
    }

    #[test]
    fn test_decode_rejects_version_mismatch() {
        let now = Utc::now();
        let mut snapshot = sample(now);
        snapshot.version = "0.9".to_string();
        let blob = snapshot.encode().unwrap();
        let err = Snapshot::decode(&blob, now, max_age()).unwrap_err();
        assert!(matches!(err, SnapshotError::VersionMismatch { ref found, .. } if found == "0.9"));
    }

    #[test]
    fn test_decode_rejects_stale_snapshot() {
        let now = Utc::now();
        let blob = sample(now).encode().unwrap();
        let err = Snapshot::decode(&blob, now + Duration::days(8), max_age()).unwrap_err();
        assert!(matches!(err, SnapshotError::Stale { .. }));
    }

    #[test]
    fn test_decode_rejects_garbage() {
        let err = Snapshot::decode("{not json", Utc::now(), max_age()).unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));

        let err = Snapshot::decode(
            &format!(r#"{{"version":"1.0","timestamp":{},"entries":[["k",{{"value":1}}]]}}"#,
                Utc::now().timestamp_millis()),
            Utc::now(),
            max_age(),
        )
        .unwrap_err();
        assert!(matches!(err, SnapshotError::Corrupt(_)));
    }
}
