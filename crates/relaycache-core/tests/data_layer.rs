//! End-to-end behaviour of the data layer: cache, health and executor wired
//! together the way an application uses them.

use std::sync::Arc;

use chrono::{Duration as ChronoDuration, TimeZone, Utc};
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use serde_json::json;

use relaycache_core::api::{ApiError, RequestOptions};
use relaycache_core::cache::{
    CacheEntry, Clock, FileSnapshotStorage, ManualClock, MemorySnapshotStorage, OperationType, Snapshot,
};
use relaycache_core::testing::ScriptedTransport;
use relaycache_core::{Config, DataLayer};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct Geocode {
    lat: f64,
    lng: f64,
}

fn start() -> ManualClock {
    ManualClock::new(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap())
}

async fn geocode(layer: &DataLayer, address: &str) -> Result<Geocode, ApiError> {
    let params = json!({ "address": address });
    layer
        .cached(OperationType::Geocoding, params.clone(), || async {
            let options = RequestOptions::post().json(&params)?;
            layer.client().execute_json::<Geocode>("/geocode", options).await
        })
        .await
}

#[tokio::test]
async fn test_cold_geocode_is_served_from_disk_after_restart() {
    let dir = tempfile::tempdir().unwrap();
    let clock = start();
    let transport = ScriptedTransport::new();
    transport.respond("/geocode", StatusCode::OK, r#"{"lat": 40.7, "lng": -74.0}"#);

    {
        let layer = DataLayer::with_parts(
            &Config::default(),
            Arc::new(transport.clone()),
            FileSnapshotStorage::new(dir.path()),
            clock.clone(),
        );
        let first = geocode(&layer, "123 Main St").await.unwrap();
        assert_eq!(first, Geocode { lat: 40.7, lng: -74.0 });
        let second = geocode(&layer, "123 Main St").await.unwrap();
        assert_eq!(second, first);
        assert_eq!(transport.calls_to("/geocode"), 1);
    }

    clock.advance(ChronoDuration::days(2));
    let layer = DataLayer::with_parts(
        &Config::default(),
        Arc::new(transport.clone()),
        FileSnapshotStorage::new(dir.path()),
        clock.clone(),
    );
    assert_eq!(
        geocode(&layer, "123 Main St").await.unwrap(),
        Geocode { lat: 40.7, lng: -74.0 }
    );
    assert_eq!(transport.calls_to("/geocode"), 1);
}

#[tokio::test]
async fn test_predictions_expire_across_restart() {
    let storage = MemorySnapshotStorage::new();
    let clock = start();
    let transport = Arc::new(ScriptedTransport::new());
    let params = json!({ "input": "main st", "sessionToken": "s1" });

    let layer = DataLayer::with_parts(&Config::default(), transport.clone(), storage.clone(), clock.clone());
    layer.cache_set(OperationType::PlacePredictions, params.clone(), &json!(["Main St, Springfield"]));
    layer.shutdown().unwrap();
    drop(layer);

    clock.advance(ChronoDuration::hours(25));
    let layer = DataLayer::with_parts(&Config::default(), transport, storage, clock);
    assert_eq!(layer.cache_get(&OperationType::PlacePredictions, &params), None);
    assert_eq!(layer.cache_stats().entries, 0);
}

#[tokio::test]
async fn test_foreign_version_snapshot_is_discarded() {
    let dir = tempfile::tempdir().unwrap();
    let storage = FileSnapshotStorage::new(dir.path());
    std::fs::write(
        storage.path(),
        r#"{"version":"0.9","timestamp":1709294400000,"entries":[]}"#,
    )
    .unwrap();

    let layer = DataLayer::with_parts(
        &Config::default(),
        Arc::new(ScriptedTransport::new()),
        storage.clone(),
        start(),
    );
    assert_eq!(layer.cache_stats().entries, 0);
    assert!(!storage.path().exists());
}

#[tokio::test]
async fn test_stale_snapshot_is_discarded() {
    let clock = start();
    let written_at = clock.now();
    let entry = CacheEntry::new(
        OperationType::StaticMap,
        json!({ "center": "1,2" }),
        json!("https://maps/1.png"),
        ChronoDuration::days(30),
        written_at,
    );
    let blob = Snapshot::new(vec![("staticMap:{\"center\":\"1,2\"}".to_string(), entry)], written_at)
        .encode()
        .unwrap();
    let storage = MemorySnapshotStorage::with_blob(blob);

    clock.advance(ChronoDuration::days(8));
    let layer = DataLayer::with_parts(&Config::default(), Arc::new(ScriptedTransport::new()), storage.clone(), clock);
    assert_eq!(layer.cache_stats().entries, 0);
    assert_eq!(storage.blob(), None);
}

#[tokio::test(start_paused = true)]
async fn test_server_errors_cascade_into_fail_fast() {
    let transport = ScriptedTransport::new();
    transport.respond("/health", StatusCode::OK, "");
    transport.respond("/events", StatusCode::INTERNAL_SERVER_ERROR, r#"{"message":"boom"}"#);
    let layer = DataLayer::with_parts(
        &Config::default(),
        Arc::new(transport.clone()),
        MemorySnapshotStorage::new(),
        start(),
    );

    for _ in 0..3 {
        let err = layer.execute("/events", RequestOptions::get()).await.unwrap_err();
        assert_eq!(err.status(), Some(500));
        assert_eq!(err.to_string(), "boom");
    }
    assert!(!layer.health().is_healthy());

    let err = layer.execute("/events", RequestOptions::get()).await.unwrap_err();
    assert!(matches!(err, ApiError::ConnectivityGate { consecutive_failures: 3 }));
    assert_eq!(transport.calls_to("/events"), 3);

    // Non-critical endpoints still go out
    transport.respond("/profile", StatusCode::OK, r#"{"name":"x"}"#);
    assert!(layer.execute("/profile", RequestOptions::get()).await.is_ok());
}

#[tokio::test]
async fn test_unwritable_cache_does_not_break_lookups() {
    let storage = MemorySnapshotStorage::new();
    storage.set_fail_writes(true);
    let transport = ScriptedTransport::new();
    transport.respond("/geocode", StatusCode::OK, r#"{"lat": 1.5, "lng": 2.5}"#);
    let layer = DataLayer::with_parts(&Config::default(), Arc::new(transport.clone()), storage.clone(), start());

    assert_eq!(geocode(&layer, "9 Oak Ave").await.unwrap(), Geocode { lat: 1.5, lng: 2.5 });
    assert_eq!(geocode(&layer, "9 Oak Ave").await.unwrap(), Geocode { lat: 1.5, lng: 2.5 });
    assert_eq!(transport.calls_to("/geocode"), 1);
    assert_eq!(storage.writes(), 0);
}
