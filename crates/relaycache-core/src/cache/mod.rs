//! Persisted TTL cache for expensive third-party lookups.
//!
//! This module provides the `CacheStore` that memoizes geocoding, place
//! predictions, place details and static map references. Entries are keyed
//! by operation type plus normalized parameters and expire after a TTL chosen
//! by operation type:
//! - Geocoding and static maps: 30 days
//! - Place predictions: 24 hours
//! - Everything else: 7 days
//!
//! The whole store is written to a snapshot after every mutation and restored
//! from it at startup.

pub mod clock;
pub mod entry;
pub mod key;
pub mod operation;
pub mod snapshot;
pub mod stats;
pub mod storage;
pub mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::CacheEntry;
pub use key::derive_key;
pub use operation::{OperationType, TtlTable, DEFAULT_TTL_DAYS};
pub use snapshot::{Snapshot, SnapshotError, MAX_SNAPSHOT_AGE_DAYS, SNAPSHOT_VERSION};
pub use stats::CacheStats;
pub use storage::{FileSnapshotStorage, MemorySnapshotStorage, SnapshotStorage, SNAPSHOT_FILE};
pub use store::{CacheConfig, CacheStore, CleanupReport, HydrateOutcome, DEFAULT_MAX_ENTRIES};
