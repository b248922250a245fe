use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::{
    derive_key, CacheEntry, CacheStats, Clock, OperationType, Snapshot, SnapshotError,
    SnapshotStorage, SystemClock, TtlTable, MAX_SNAPSHOT_AGE_DAYS,
};

/// Default capacity of the store.
pub const DEFAULT_MAX_ENTRIES: usize = 500;

/// Capacity-driven eviction shrinks the store to this share of `max_entries`,
/// so a burst of inserts does not trigger a sweep on every call.
const EVICTION_TARGET_PERCENT: usize = 80;

#[derive(Debug, Clone)]
pub struct CacheConfig {
    pub max_entries: usize,
    pub ttl: TtlTable,
    pub max_snapshot_age: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            ttl: TtlTable::default(),
            max_snapshot_age: Duration::days(MAX_SNAPSHOT_AGE_DAYS),
        }
    }
}

impl CacheConfig {
    fn eviction_target(&self) -> usize {
        self.max_entries * EVICTION_TARGET_PERCENT / 100
    }
}

/// What a cleanup sweep removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
}

impl CleanupReport {
    pub fn removed(&self) -> usize {
        self.expired + self.evicted
    }
}

/// Result of restoring the store from durable storage.
#[derive(Debug)]
pub enum HydrateOutcome {
    /// Nothing had been persisted yet.
    Empty,
    /// Entries were restored; `purged` of them were dropped right away.
    Restored { entries: usize, purged: usize },
    /// The snapshot was unusable and the store started empty.
    Discarded(SnapshotError),
}

/// Keyed TTL cache for slowly-changing third-party lookups.
///
/// Every mutation is followed by a write of the full snapshot. Write failures
/// never undo the mutation; they are handed back to the caller as
/// `Err(SnapshotError)` with the in-memory state already updated.
pub struct CacheStore {
    entries: HashMap<String, CacheEntry>,
    config: CacheConfig,
    storage: Box<dyn SnapshotStorage>,
    clock: Arc<dyn Clock>,
    stats: CacheStats,
    /// In-memory state differs from the last successful write
    unsaved: bool,
}

impl CacheStore {
    /// Create an empty store. Call [`CacheStore::hydrate`] to restore state.
    pub fn new(config: CacheConfig, storage: impl SnapshotStorage + 'static) -> Self {
        Self {
            entries: HashMap::new(),
            config,
            storage: Box::new(storage),
            clock: Arc::new(SystemClock),
            stats: CacheStats::default(),
            unsaved: false,
        }
    }

    pub fn with_clock(mut self, clock: impl Clock + 'static) -> Self {
        self.clock = Arc::new(clock);
        self
    }

    /// Create a store and restore it from `storage` in one step.
    pub fn open(
        config: CacheConfig,
        storage: impl SnapshotStorage + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        let mut store = Self::new(config, storage).with_clock(clock);
        store.hydrate();
        store
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Current time according to the store's clock.
    pub fn now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.entries.len(),
            ..self.stats.clone()
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &CacheEntry)> {
        self.entries.iter()
    }

    /// Entry counts per operation type.
    pub fn entries_by_type(&self) -> BTreeMap<String, usize> {
        let mut counts = BTreeMap::new();
        for entry in self.entries.values() {
            *counts.entry(entry.operation_type.to_string()).or_insert(0) += 1;
        }
        counts
    }

    /// Look up a live value. An expired entry is removed (and the removal
    /// persisted) and reported as a miss.
    ///
    /// `Err` only occurs when an expired entry was removed and the snapshot
    /// write failed; the lookup itself is a miss in that case.
    pub fn get(&mut self, operation: &OperationType, params: &Value) -> Result<Option<Value>, SnapshotError> {
        let key = derive_key(operation, params);
        let now = self.clock.now();

        let live = match self.entries.get(&key) {
            None => {
                self.stats.misses += 1;
                debug!(key = %key, "Cache miss");
                return Ok(None);
            }
            Some(entry) => entry.is_live(now),
        };

        if live {
            self.stats.hits += 1;
            debug!(key = %key, "Cache hit");
            return Ok(self.entries.get(&key).map(|entry| entry.value.clone()));
        }

        self.entries.remove(&key);
        self.stats.misses += 1;
        self.stats.expired += 1;
        debug!(key = %key, "Cache entry expired");
        self.persist().map(|()| None)
    }

    /// Insert or overwrite the value for `(operation, params)`.
    ///
    /// TTL comes from the operation type. When the insert pushes the store
    /// over capacity a cleanup sweep runs before the snapshot is written.
    pub fn set(&mut self, operation: OperationType, params: Value, value: Value) -> Result<(), SnapshotError> {
        let key = derive_key(&operation, &params);
        let ttl = self.config.ttl.ttl(&operation);
        let entry = CacheEntry::new(operation, params, value, ttl, self.clock.now());
        self.entries.insert(key, entry);

        if self.entries.len() > self.config.max_entries {
            let report = self.maybe_cleanup();
            debug!(
                expired = report.expired,
                evicted = report.evicted,
                remaining = self.entries.len(),
                "Cache over capacity, cleaned up"
            );
        }

        self.persist()
    }

    /// Two-phase sweep: drop every expired entry, then, if still over
    /// capacity, drop the oldest live entries (by `created_at`) until the
    /// store is at the eviction target.
    ///
    /// Does not persist; callers persist once they are done mutating.
    pub fn maybe_cleanup(&mut self) -> CleanupReport {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let expired = before - self.entries.len();
        self.stats.expired += expired as u64;

        let mut evicted = 0;
        if self.entries.len() > self.config.max_entries {
            let target = self.config.eviction_target();
            let mut by_age: Vec<(&String, &CacheEntry)> = self.entries.iter().collect();
            // Key breaks ties so eviction is deterministic
            by_age.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(b.0)));
            let doomed: Vec<String> = by_age
                .into_iter()
                .take(self.entries.len().saturating_sub(target))
                .map(|(key, _)| key.clone())
                .collect();
            for key in &doomed {
                self.entries.remove(key);
            }
            evicted = doomed.len();
            self.stats.evictions += evicted as u64;
        }

        if expired + evicted > 0 {
            self.unsaved = true;
        }
        CleanupReport { expired, evicted }
    }

    /// Remove every expired entry, persisting if anything was removed.
    pub fn purge_expired(&mut self) -> Result<usize, SnapshotError> {
        let now = self.clock.now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_live(now));
        let removed = before - self.entries.len();
        if removed == 0 {
            return Ok(0);
        }
        self.stats.expired += removed as u64;
        self.persist().map(|()| removed)
    }

    /// Remove every entry of one operation type.
    pub fn invalidate(&mut self, operation: &OperationType) -> Result<usize, SnapshotError> {
        let before = self.entries.len();
        self.entries.retain(|_, entry| &entry.operation_type != operation);
        let removed = before - self.entries.len();
        if removed == 0 {
            return Ok(0);
        }
        self.persist().map(|()| removed)
    }

    /// Empty the store and erase the durable snapshot.
    pub fn clear(&mut self) -> Result<(), SnapshotError> {
        self.entries.clear();
        let result = self.storage.erase();
        self.unsaved = result.is_err();
        result
    }

    /// Whether the durable snapshot lags behind the in-memory state, e.g.
    /// because the last write failed.
    pub fn has_unsaved_changes(&self) -> bool {
        self.unsaved
    }

    /// Persist only if something changed since the last successful write.
    pub fn flush(&mut self) -> Result<(), SnapshotError> {
        if self.unsaved {
            self.persist()
        } else {
            Ok(())
        }
    }

    /// Write the whole store to durable storage.
    pub fn persist(&mut self) -> Result<(), SnapshotError> {
        let result = self.write_snapshot();
        self.unsaved = result.is_err();
        result
    }

    fn write_snapshot(&self) -> Result<(), SnapshotError> {
        let mut entries: Vec<(String, CacheEntry)> = self
            .entries
            .iter()
            .map(|(key, entry)| (key.clone(), entry.clone()))
            .collect();
        entries.sort_by(|a, b| a.1.created_at.cmp(&b.1.created_at).then_with(|| a.0.cmp(&b.0)));

        let blob = Snapshot::new(entries, self.clock.now()).encode()?;
        self.storage.save(&blob)
    }

    /// Replace the in-memory state with the durable snapshot.
    ///
    /// Unreadable, foreign-version or stale snapshots are discarded and the
    /// store starts empty; this is never reported as a failure. Restored
    /// entries go through a cleanup sweep right away so anything that expired
    /// while the process was down is dropped.
    pub fn hydrate(&mut self) -> HydrateOutcome {
        self.entries.clear();
        self.unsaved = false;
        let now = self.clock.now();

        let snapshot = match self
            .storage
            .load()
            .and_then(|blob| blob.map(|b| Snapshot::decode(&b, now, self.config.max_snapshot_age)).transpose())
        {
            Ok(Some(snapshot)) => snapshot,
            Ok(None) => {
                debug!("No cache snapshot to restore");
                return HydrateOutcome::Empty;
            }
            Err(e) => {
                warn!(error = %e, "Discarding cache snapshot");
                if let Err(erase_err) = self.storage.erase() {
                    warn!(error = %erase_err, "Failed to erase discarded snapshot");
                }
                return HydrateOutcome::Discarded(e);
            }
        };

        let total = snapshot.entries.len();
        self.entries = snapshot
            .entries
            .into_iter()
            .filter(|(_, entry)| entry.is_well_formed())
            .collect();
        let malformed = total - self.entries.len();

        let report = self.maybe_cleanup();
        let purged = malformed + report.removed();
        if purged > 0 {
            if let Err(e) = self.persist() {
                warn!(error = %e, "Failed to persist cache after restore cleanup");
            }
        }

        info!(restored = self.entries.len(), purged, "Cache restored from snapshot");
        HydrateOutcome::Restored {
            entries: self.entries.len(),
            purged,
        }
    }
}

impl std::fmt::Debug for CacheStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheStore")
            .field("entries", &self.entries.len())
            .field("config", &self.config)
            .field("stats", &self.stats)
            .finish()
    }
}
