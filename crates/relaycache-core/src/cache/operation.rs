//! Operation types tagging each cached lookup.

use std::collections::HashMap;
use std::fmt;

use chrono::Duration;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Time-to-live for anything without a dedicated entry in the TTL table.
pub const DEFAULT_TTL_DAYS: i64 = 7;

/// Geocoding results and static map references rarely change.
const LONG_LIVED_TTL_DAYS: i64 = 30;

/// Place predictions follow what users type and go stale quickly.
const PLACE_PREDICTIONS_TTL_HOURS: i64 = 24;

/// Category of a cached lookup. Determines the entry's TTL.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum OperationType {
    Geocoding,
    ReverseGeocoding,
    PlacePredictions,
    PlaceDetails,
    StaticMap,
    Other(String),
}

impl OperationType {
    pub fn as_str(&self) -> &str {
        match self {
            OperationType::Geocoding => "geocoding",
            OperationType::ReverseGeocoding => "reverseGeocoding",
            OperationType::PlacePredictions => "placePredictions",
            OperationType::PlaceDetails => "placeDetails",
            OperationType::StaticMap => "staticMap",
            OperationType::Other(name) => name,
        }
    }

    /// Built-in TTL for this operation type.
    pub fn default_ttl(&self) -> Duration {
        match self {
            OperationType::Geocoding | OperationType::StaticMap => {
                Duration::days(LONG_LIVED_TTL_DAYS)
            }
            OperationType::PlacePredictions => Duration::hours(PLACE_PREDICTIONS_TTL_HOURS),
            _ => Duration::days(DEFAULT_TTL_DAYS),
        }
    }
}

impl From<&str> for OperationType {
    fn from(s: &str) -> Self {
        match s {
            "geocoding" => OperationType::Geocoding,
            "reverseGeocoding" => OperationType::ReverseGeocoding,
            "placePredictions" => OperationType::PlacePredictions,
            "placeDetails" => OperationType::PlaceDetails,
            "staticMap" => OperationType::StaticMap,
            other => OperationType::Other(other.to_string()),
        }
    }
}

impl From<String> for OperationType {
    fn from(s: String) -> Self {
        match OperationType::from(s.as_str()) {
            OperationType::Other(_) => OperationType::Other(s),
            known => known,
        }
    }
}

impl From<OperationType> for String {
    fn from(op: OperationType) -> Self {
        match op {
            OperationType::Other(name) => name,
            known => known.as_str().to_string(),
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// TTL lookup: per-type overrides first, then the built-in table.
#[derive(Debug, Clone, Default)]
pub struct TtlTable {
    overrides: HashMap<OperationType, Duration>,
}

impl TtlTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from `operation type -> seconds` pairs, as found in config.
    /// Non-positive values are ignored so an entry can never expire at creation,
    /// as are values too large to represent as a duration.
    pub fn from_secs<'a>(pairs: impl IntoIterator<Item = (&'a String, &'a i64)>) -> Self {
        let overrides = pairs
            .into_iter()
            .filter(|(_, secs)| **secs > 0)
            .filter_map(|(name, secs)| match Duration::try_seconds(*secs) {
                Some(ttl) => Some((OperationType::from(name.as_str()), ttl)),
                None => {
                    warn!(operation = %name, secs = *secs, "Ignoring TTL override out of range");
                    None
                }
            })
            .collect();
        Self { overrides }
    }

    pub fn with_override(mut self, op: OperationType, ttl: Duration) -> Self {
        if ttl > Duration::zero() {
            self.overrides.insert(op, ttl);
        }
        self
    }

    pub fn ttl(&self, op: &OperationType) -> Duration {
        self.overrides
            .get(op)
            .copied()
            .unwrap_or_else(|| op.default_ttl())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_ttls() {
        assert_eq!(OperationType::Geocoding.default_ttl(), Duration::days(30));
        assert_eq!(OperationType::StaticMap.default_ttl(), Duration::days(30));
        assert_eq!(OperationType::PlacePredictions.default_ttl(), Duration::hours(24));
        assert_eq!(OperationType::PlaceDetails.default_ttl(), Duration::days(7));
        assert_eq!(OperationType::from("routes").default_ttl(), Duration::days(7));
    }

    #[test]
    fn test_string_round_trip() {
        for op in [
            OperationType::Geocoding,
            OperationType::ReverseGeocoding,
            OperationType::PlacePredictions,
            OperationType::PlaceDetails,
            OperationType::StaticMap,
            OperationType::Other("directions".to_string()),
        ] {
            let name: String = op.clone().into();
            assert_eq!(OperationType::from(name), op);
        }
    }

    #[test]
    fn test_serializes_as_plain_string() {
        let json = serde_json::to_string(&OperationType::PlaceDetails).unwrap();
        assert_eq!(json, "\"placeDetails\"");
        let op: OperationType = serde_json::from_str("\"custom\"").unwrap();
        assert_eq!(op, OperationType::Other("custom".to_string()));
    }

    #[test]
    fn test_overrides_win() {
        let table = TtlTable::new().with_override(OperationType::Geocoding, Duration::hours(1));
        assert_eq!(table.ttl(&OperationType::Geocoding), Duration::hours(1));
        assert_eq!(table.ttl(&OperationType::StaticMap), Duration::days(30));
    }

    #[test]
    fn test_non_positive_overrides_ignored() {
        let raw: HashMap<String, i64> = [("geocoding".to_string(), 0), ("staticMap".to_string(), 60)]
            .into_iter()
            .collect();
        let table = TtlTable::from_secs(&raw);
        assert_eq!(table.ttl(&OperationType::Geocoding), Duration::days(30));
        assert_eq!(table.ttl(&OperationType::StaticMap), Duration::seconds(60));
    }

    #[test]
    fn test_unrepresentable_overrides_ignored() {
        let raw: HashMap<String, i64> = [
            ("geocoding".to_string(), i64::MAX),
            ("placeDetails".to_string(), 10_000_000_000_000),
        ]
        .into_iter()
        .collect();
        let table = TtlTable::from_secs(&raw);
        assert_eq!(table.ttl(&OperationType::Geocoding), Duration::days(30));
        assert_eq!(table.ttl(&OperationType::PlaceDetails), Duration::seconds(10_000_000_000_000));
    }
}
