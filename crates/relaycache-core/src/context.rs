//! The owning context for the data layer.
//!
//! `DataLayer` constructs the cache store, the health monitor and the request
//! executor once at startup and hands out references to them. It is also
//! where cache persistence failures end up: the store reports them, the
//! context logs them, and the caller's operation carries on.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::api::{ApiClient, ApiError, ReqwestTransport, RequestOptions, Transport};
use crate::cache::{
    CacheStats, CacheStore, Clock, FileSnapshotStorage, HydrateOutcome, OperationType, SnapshotError,
    SnapshotStorage, SystemClock,
};
use crate::config::Config;
use crate::health::HealthMonitor;

/// Handles to the data layer's shared components.
/// Clone is cheap - all components are shared.
#[derive(Clone)]
pub struct DataLayer {
    client: ApiClient,
    health: Arc<HealthMonitor>,
    cache: Arc<Mutex<CacheStore>>,
}

impl DataLayer {
    /// Build the production stack: reqwest transport and a file snapshot in
    /// the configured cache directory.
    pub fn from_config(config: &Config) -> Result<Self> {
        let transport = ReqwestTransport::new().context("Failed to build HTTP client")?;
        let cache_dir = config.cache_dir()?;
        debug!(cache_dir = %cache_dir.display(), "Using cache directory");
        Ok(Self::with_parts(
            config,
            Arc::new(transport),
            FileSnapshotStorage::new(cache_dir),
            SystemClock,
        ))
    }

    /// Build the stack from explicit parts. The cache is hydrated here.
    pub fn with_parts(
        config: &Config,
        transport: Arc<dyn Transport>,
        storage: impl SnapshotStorage + 'static,
        clock: impl Clock + 'static,
    ) -> Self {
        let health = Arc::new(HealthMonitor::new(config.health_config(), transport.clone()));
        let client = ApiClient::new(config.base_url.clone(), transport, health.clone())
            .with_policy(config.retry_policy())
            .with_profile(config.connection_profile)
            .with_critical_endpoints(config.critical_endpoints.iter().cloned());

        let mut store = CacheStore::new(config.cache_config(), storage).with_clock(clock);
        match store.hydrate() {
            HydrateOutcome::Empty => info!("Starting with an empty cache"),
            HydrateOutcome::Restored { entries, purged } => {
                info!(entries, purged, "Cache hydrated")
            }
            HydrateOutcome::Discarded(e) => info!(reason = %e, "Previous cache discarded"),
        }

        Self {
            client,
            health,
            cache: Arc::new(Mutex::new(store)),
        }
    }

    pub fn client(&self) -> &ApiClient {
        &self.client
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    /// Perform a remote call through the request executor.
    pub async fn execute(&self, address: &str, options: RequestOptions) -> Result<Value, ApiError> {
        self.client.execute(address, options).await
    }

    fn store(&self) -> MutexGuard<'_, CacheStore> {
        // Store operations leave the map consistent even if a holder panicked
        self.cache.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Run `f` with exclusive access to the cache store.
    ///
    /// Sweeps and snapshot writes happen under the same lock as the mutation
    /// that triggered them, so no `set` can interleave with an eviction.
    pub fn with_cache<R>(&self, f: impl FnOnce(&mut CacheStore) -> R) -> R {
        f(&mut self.store())
    }

    fn report_persist(result: Result<(), SnapshotError>, operation: &str) {
        if let Err(e) = result {
            warn!(operation, error = %e, "Failed to persist cache");
        }
    }

    pub fn cache_get(&self, operation: &OperationType, params: &Value) -> Option<Value> {
        match self.store().get(operation, params) {
            Ok(value) => value,
            Err(e) => {
                Self::report_persist(Err(e), "expire");
                None
            }
        }
    }

    /// Typed lookup. A cached value that no longer matches `T` counts as a miss.
    pub fn cache_get_as<T: DeserializeOwned>(&self, operation: &OperationType, params: &Value) -> Option<T> {
        let value = self.cache_get(operation, params)?;
        match serde_json::from_value(value) {
            Ok(typed) => Some(typed),
            Err(e) => {
                debug!(operation = %operation, error = %e, "Cached value has unexpected shape");
                None
            }
        }
    }

    pub fn cache_set<T: Serialize + ?Sized>(&self, operation: OperationType, params: Value, value: &T) {
        let value = match serde_json::to_value(value) {
            Ok(value) => value,
            Err(e) => {
                warn!(operation = %operation, error = %e, "Value not cacheable, skipping");
                return;
            }
        };
        Self::report_persist(self.store().set(operation, params, value), "set");
    }

    /// Return the cached value for `(operation, params)`, or run `fetch`,
    /// cache its result and return it. Fetch errors are returned as-is and
    /// nothing is cached.
    pub async fn cached<T, E, F, Fut>(&self, operation: OperationType, params: Value, fetch: F) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if let Some(hit) = self.cache_get_as::<T>(&operation, &params) {
            return Ok(hit);
        }
        // The lock is not held across the fetch
        let fresh = fetch().await?;
        self.cache_set(operation, params, &fresh);
        Ok(fresh)
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.store().stats()
    }

    pub fn cache_invalidate(&self, operation: &OperationType) -> usize {
        let mut store = self.store();
        let before = store.len();
        match store.invalidate(operation) {
            Ok(removed) => removed,
            Err(e) => {
                Self::report_persist(Err(e), "invalidate");
                before - store.len()
            }
        }
    }

    pub fn cache_purge_expired(&self) -> usize {
        let mut store = self.store();
        let before = store.len();
        match store.purge_expired() {
            Ok(removed) => removed,
            Err(e) => {
                Self::report_persist(Err(e), "purge");
                before - store.len()
            }
        }
    }

    pub fn cache_clear(&self) {
        Self::report_persist(self.store().clear(), "clear");
    }

    /// Write any changes the snapshot is still missing. Call before process exit.
    ///
    /// A no-op when every mutation was already persisted, so a snapshot
    /// erased by `cache_clear` stays erased.
    pub fn shutdown(&self) -> Result<(), SnapshotError> {
        let mut store = self.store();
        if !store.has_unsaved_changes() {
            debug!("Cache snapshot up to date on shutdown");
            return Ok(());
        }
        let result = store.flush();
        match &result {
            Ok(()) => info!("Cache persisted on shutdown"),
            Err(e) => warn!(error = %e, "Failed to persist cache on shutdown"),
        }
        result
    }
}

impl std::fmt::Debug for DataLayer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataLayer")
            .field("client", &self.client)
            .field("health", &self.health)
            .finish_non_exhaustive()
    }
}
