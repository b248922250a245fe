//! Application configuration management.
//!
//! This module handles loading and saving the data layer configuration:
//! the remote service base URL, retry and health settings, and cache
//! capacity and TTL overrides.
//!
//! Configuration is stored at `~/.config/relaycache/config.json`. Selected
//! fields can be overridden from the environment (see [`Config::apply_env`]).

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::api::{ConnectionProfile, RetryPolicy, DEFAULT_CRITICAL_ENDPOINTS};
use crate::cache::{CacheConfig, TtlTable, DEFAULT_MAX_ENTRIES, MAX_SNAPSHOT_AGE_DAYS};
use crate::health::monitor::{DEFAULT_FAILURE_THRESHOLD, DEFAULT_PROBE_COOLDOWN_SECS, DEFAULT_PROBE_TIMEOUT_SECS};
use crate::health::HealthConfig;

/// Application name used for config/cache directory paths
const APP_NAME: &str = "relaycache";

/// Config file name
const CONFIG_FILE: &str = "config.json";

const DEFAULT_BASE_URL: &str = "http://localhost:8000/api";
const DEFAULT_HEALTH_PATH: &str = "/health";

const ENV_BASE_URL: &str = "RELAYCACHE_BASE_URL";
const ENV_TIMEOUT_MS: &str = "RELAYCACHE_TIMEOUT_MS";
const ENV_MAX_ENTRIES: &str = "RELAYCACHE_MAX_ENTRIES";
const ENV_CACHE_DIR: &str = "RELAYCACHE_CACHE_DIR";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub base_url: String,
    pub connection_profile: ConnectionProfile,
    pub critical_endpoints: Vec<String>,
    pub base_timeout_ms: u64,
    pub max_attempts: u32,
    pub failure_threshold: u32,
    pub probe_cooldown_secs: u64,
    pub probe_timeout_secs: u64,
    pub health_path: String,
    pub max_entries: usize,
    pub cache_dir: Option<PathBuf>,
    /// Operation type name -> TTL in seconds
    pub ttl_overrides: HashMap<String, i64>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            connection_profile: ConnectionProfile::Normal,
            critical_endpoints: DEFAULT_CRITICAL_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
            base_timeout_ms: crate::api::policy::DEFAULT_BASE_TIMEOUT_MS,
            max_attempts: crate::api::policy::DEFAULT_MAX_ATTEMPTS,
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            probe_cooldown_secs: DEFAULT_PROBE_COOLDOWN_SECS,
            probe_timeout_secs: DEFAULT_PROBE_TIMEOUT_SECS,
            health_path: DEFAULT_HEALTH_PATH.to_string(),
            max_entries: DEFAULT_MAX_ENTRIES,
            cache_dir: None,
            ttl_overrides: HashMap::new(),
        }
    }
}

impl Config {
    /// Load the config file (defaults if absent), then apply environment overrides.
    pub fn load() -> Result<Self> {
        let path = Self::config_path()?;
        let mut config = if path.exists() {
            let contents = std::fs::read_to_string(&path)
                .with_context(|| format!("Failed to read config file: {}", path.display()))?;
            serde_json::from_str(&contents)
                .with_context(|| format!("Failed to parse config file: {}", path.display()))?
        } else {
            Self::default()
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let contents = serde_json::to_string_pretty(self)?;
        std::fs::write(path, contents)?;
        Ok(())
    }

    pub fn config_path() -> Result<PathBuf> {
        let config_dir = dirs::config_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find config directory"))?;
        Ok(config_dir.join(APP_NAME).join(CONFIG_FILE))
    }

    /// Apply overrides from `lookup` (the process environment in production).
    /// Unparseable values are logged and ignored.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(url) = lookup(ENV_BASE_URL).filter(|v| !v.trim().is_empty()) {
            self.base_url = url.trim().to_string();
        }
        if let Some(raw) = lookup(crate::api::policy::CONNECTION_PROFILE_ENV) {
            match raw.parse() {
                Ok(profile) => self.connection_profile = profile,
                Err(e) => warn!(error = %e, "Ignoring connection profile override"),
            }
        }
        if let Some(raw) = lookup(ENV_TIMEOUT_MS) {
            match raw.trim().parse::<u64>() {
                Ok(ms) if ms > 0 => self.base_timeout_ms = ms,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_TIMEOUT_MS),
            }
        }
        if let Some(raw) = lookup(ENV_MAX_ENTRIES) {
            match raw.trim().parse::<usize>() {
                Ok(n) if n > 0 => self.max_entries = n,
                _ => warn!(value = %raw, "Ignoring invalid {}", ENV_MAX_ENTRIES),
            }
        }
        if let Some(dir) = lookup(ENV_CACHE_DIR).filter(|v| !v.trim().is_empty()) {
            self.cache_dir = Some(PathBuf::from(dir));
        }
    }

    pub fn cache_dir(&self) -> Result<PathBuf> {
        if let Some(ref dir) = self.cache_dir {
            return Ok(dir.clone());
        }
        let cache_dir = dirs::cache_dir()
            .ok_or_else(|| anyhow::anyhow!("Could not find cache directory"))?;
        Ok(cache_dir.join(APP_NAME))
    }

    pub fn health_url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.health_path.trim_start_matches('/')
        )
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::default()
            .with_max_attempts(self.max_attempts)
            .with_base_timeout(Duration::from_millis(self.base_timeout_ms))
    }

    pub fn health_config(&self) -> HealthConfig {
        HealthConfig {
            health_url: self.health_url(),
            failure_threshold: self.failure_threshold,
            probe_cooldown: Duration::from_secs(self.probe_cooldown_secs),
            probe_timeout: Duration::from_secs(self.probe_timeout_secs),
        }
    }

    pub fn cache_config(&self) -> CacheConfig {
        CacheConfig {
            max_entries: self.max_entries.max(1),
            ttl: TtlTable::from_secs(&self.ttl_overrides),
            max_snapshot_age: chrono::Duration::days(MAX_SNAPSHOT_AGE_DAYS),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::OperationType;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let owned: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| owned.get(key).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.base_timeout_ms, 30_000);
        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.failure_threshold, 2);
        assert_eq!(config.critical_endpoints, vec!["/events", "/auth"]);
        assert_eq!(config.health_url(), "http://localhost:8000/api/health");
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let config: Config = serde_json::from_str(r#"{"base_url":"https://events.example/api/"}"#).unwrap();
        assert_eq!(config.health_url(), "https://events.example/api/health");
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("RELAYCACHE_BASE_URL", "https://staging.example/api"),
            ("RELAYCACHE_CONNECTION", "mobile"),
            ("RELAYCACHE_TIMEOUT_MS", "12000"),
            ("RELAYCACHE_MAX_ENTRIES", "50"),
            ("RELAYCACHE_CACHE_DIR", "/tmp/rc"),
        ]));
        assert_eq!(config.base_url, "https://staging.example/api");
        assert_eq!(config.connection_profile, ConnectionProfile::Constrained);
        assert_eq!(config.base_timeout_ms, 12_000);
        assert_eq!(config.max_entries, 50);
        assert_eq!(config.cache_dir().unwrap(), PathBuf::from("/tmp/rc"));
    }

    #[test]
    fn test_invalid_env_values_ignored() {
        let mut config = Config::default();
        config.apply_env(env(&[
            ("RELAYCACHE_CONNECTION", "carrier-pigeon"),
            ("RELAYCACHE_TIMEOUT_MS", "soon"),
            ("RELAYCACHE_MAX_ENTRIES", "0"),
        ]));
        assert_eq!(config.connection_profile, ConnectionProfile::Normal);
        assert_eq!(config.base_timeout_ms, 30_000);
        assert_eq!(config.max_entries, DEFAULT_MAX_ENTRIES);
    }

    #[test]
    fn test_conversions() {
        let mut config = Config::default();
        config.max_attempts = 5;
        config.ttl_overrides.insert("geocoding".into(), 3600);

        assert_eq!(config.retry_policy().max_attempts, 5);
        assert_eq!(config.health_config().probe_cooldown, Duration::from_secs(30));
        assert_eq!(
            config.cache_config().ttl.ttl(&OperationType::Geocoding),
            chrono::Duration::hours(1)
        );
    }

    #[test]
    fn test_out_of_range_ttl_override_falls_back() {
        let config: Config =
            serde_json::from_str(r#"{"ttl_overrides":{"geocoding":9223372036854775807}}"#).unwrap();
        assert_eq!(
            config.cache_config().ttl.ttl(&OperationType::Geocoding),
            OperationType::Geocoding.default_ttl()
        );
    }
}
