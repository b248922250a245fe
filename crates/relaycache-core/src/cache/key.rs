//! Deterministic cache key derivation.

use serde_json::{Map, Value};

use super::OperationType;

/// Derive the cache key for `(operation, params)`.
///
/// Object keys are sorted at every nesting level before serialization, so two
/// parameter objects holding the same pairs always produce the same key no
/// matter the order their fields were inserted in.
pub fn derive_key(operation: &OperationType, params: &Value) -> String {
    let normalized = normalize(params);
    // Serializing a Value cannot fail: all map keys are strings.
    let encoded = serde_json::to_string(&normalized).unwrap_or_default();
    format!("{}:{}", operation.as_str(), encoded)
}

/// Return a copy of `value` whose objects have their keys in sorted order.
pub fn normalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(&String, &Value)> = map.iter().collect();
            entries.sort_by(|a, b| a.0.cmp(b.0));
            let mut sorted = Map::new();
            for (k, v) in entries {
                sorted.insert(k.clone(), normalize(v));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(normalize).collect()),
        other => other.clone(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde_json::json;

    #[test]
    fn test_key_includes_operation_type() {
        let params = json!({"address": "123 Main St"});
        let geo = derive_key(&OperationType::Geocoding, &params);
        let details = derive_key(&OperationType::PlaceDetails, &params);
        assert_ne!(geo, details);
        assert!(geo.starts_with("geocoding:"));
    }

    #[test]
    fn test_field_order_does_not_matter() {
        let mut a = Map::new();
        a.insert("lat".into(), json!(1.5));
        a.insert("lng".into(), json!(2.5));
        a.insert("zoom".into(), json!(12));
        let mut b = Map::new();
        b.insert("zoom".into(), json!(12));
        b.insert("lng".into(), json!(2.5));
        b.insert("lat".into(), json!(1.5));

        assert_eq!(
            derive_key(&OperationType::StaticMap, &Value::Object(a)),
            derive_key(&OperationType::StaticMap, &Value::Object(b)),
        );
    }

    #[test]
    fn test_nested_objects_are_normalized() {
        let a = json!({"bounds": {"north": 1, "south": 2}, "q": "cafe"});
        let b = json!({"q": "cafe", "bounds": {"south": 2, "north": 1}});
        assert_eq!(
            derive_key(&OperationType::PlacePredictions, &a),
            derive_key(&OperationType::PlacePredictions, &b),
        );
    }

    #[test]
    fn test_different_values_differ() {
        let a = json!({"address": "123 Main St"});
        let b = json!({"address": "124 Main St"});
        assert_ne!(
            derive_key(&OperationType::Geocoding, &a),
            derive_key(&OperationType::Geocoding, &b),
        );
    }

    proptest! {
        #[test]
        fn prop_permutations_share_a_key(
            pairs in prop::collection::btree_map("[a-z]{1,8}", "[a-zA-Z0-9 ]{0,16}", 1..8),
            seed in any::<u64>(),
        ) {
            let mut forward = Map::new();
            for (k, v) in &pairs {
                forward.insert(k.clone(), Value::String(v.clone()));
            }

            // Rotate the insertion order by a seed-derived offset.
            let items: Vec<_> = pairs.iter().collect();
            let offset = (seed as usize) % items.len();
            let mut rotated = Map::new();
            for (k, v) in items.iter().cycle().skip(offset).take(items.len()) {
                rotated.insert((*k).clone(), Value::String((*v).clone()));
            }

            prop_assert_eq!(
                derive_key(&OperationType::Geocoding, &Value::Object(forward)),
                derive_key(&OperationType::Geocoding, &Value::Object(rotated)),
            );
        }
    }
}
