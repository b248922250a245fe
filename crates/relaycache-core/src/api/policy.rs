//! Timeout scaling and retry backoff.
//!
//! Everything here is a pure function of `(profile, attempt, timeout)`, so
//! the executor's timing can be checked without a network.

use std::fmt;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable read by [`ConnectionProfile::from_env`].
pub const CONNECTION_PROFILE_ENV: &str = "RELAYCACHE_CONNECTION";

/// Default per-call base timeout.
pub const DEFAULT_BASE_TIMEOUT_MS: u64 = 30_000;

/// Attempts per logical request, including the first.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Constrained links get at least this long per attempt.
const CONSTRAINED_MIN_TIMEOUT_MS: u64 = 25_000;

/// Constrained links scale the base timeout by this factor.
const CONSTRAINED_TIMEOUT_FACTOR: f64 = 1.5;

/// First backoff delay on normal links.
const NORMAL_BACKOFF_BASE_MS: u64 = 2_000;

/// First backoff delay on constrained links.
const CONSTRAINED_BACKOFF_BASE_MS: u64 = 3_000;

/// Each backoff is this much longer than the one before.
const BACKOFF_MULTIPLIER: f64 = 1.5;

/// Growth of the per-attempt timeout on retry: `1.5 + attempt * 0.3`.
const RETRY_TIMEOUT_BASE_FACTOR: f64 = 1.5;
const RETRY_TIMEOUT_STEP_FACTOR: f64 = 0.3;

/// Coarse classification of the caller's network link.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionProfile {
    /// Mobile or otherwise bandwidth-constrained.
    Constrained,
    #[default]
    Normal,
}

impl ConnectionProfile {
    /// Read the profile from `RELAYCACHE_CONNECTION`, falling back to `Normal`.
    pub fn from_env() -> Self {
        std::env::var(CONNECTION_PROFILE_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or_default()
    }

    pub fn is_constrained(self) -> bool {
        self == ConnectionProfile::Constrained
    }
}

impl FromStr for ConnectionProfile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "constrained" | "mobile" | "slow" | "slow-2g" | "2g" | "3g" => Ok(ConnectionProfile::Constrained),
            "normal" | "4g" | "wifi" | "ethernet" => Ok(ConnectionProfile::Normal),
            other => Err(format!("unknown connection profile: {}", other)),
        }
    }
}

impl fmt::Display for ConnectionProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionProfile::Constrained => f.write_str("constrained"),
            ConnectionProfile::Normal => f.write_str("normal"),
        }
    }
}

/// Retry and timeout settings for the request executor.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_timeout: Duration,
    pub constrained_min_timeout: Duration,
    pub normal_backoff_base: Duration,
    pub constrained_backoff_base: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_timeout: Duration::from_millis(DEFAULT_BASE_TIMEOUT_MS),
            constrained_min_timeout: Duration::from_millis(CONSTRAINED_MIN_TIMEOUT_MS),
            normal_backoff_base: Duration::from_millis(NORMAL_BACKOFF_BASE_MS),
            constrained_backoff_base: Duration::from_millis(CONSTRAINED_BACKOFF_BASE_MS),
        }
    }
}

impl RetryPolicy {
    /// Create a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            ..Self::default()
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_base_timeout(mut self, base_timeout: Duration) -> Self {
        self.base_timeout = base_timeout;
        self
    }

    /// Timeout for the first attempt.
    ///
    /// Constrained links get `max(base * 1.5, 25s)`; normal links get `base`.
    pub fn effective_timeout(&self, profile: ConnectionProfile, base: Duration) -> Duration {
        match profile {
            ConnectionProfile::Constrained => base
                .mul_f64(CONSTRAINED_TIMEOUT_FACTOR)
                .max(self.constrained_min_timeout),
            ConnectionProfile::Normal => base,
        }
    }

    /// Timeout for the attempt after `attempt` (1-based) timed out with `current`.
    pub fn next_timeout(&self, current: Duration, attempt: u32) -> Duration {
        current.mul_f64(RETRY_TIMEOUT_BASE_FACTOR + attempt as f64 * RETRY_TIMEOUT_STEP_FACTOR)
    }

    /// Delay after failed attempt `attempt` (1-based): `base * 1.5^(attempt-1)`.
    pub fn backoff(&self, profile: ConnectionProfile, attempt: u32) -> Duration {
        let base = match profile {
            ConnectionProfile::Constrained => self.constrained_backoff_base,
            ConnectionProfile::Normal => self.normal_backoff_base,
        };
        base.mul_f64(BACKOFF_MULTIPLIER.powi(attempt.saturating_sub(1) as i32))
    }

    /// Whether another attempt is allowed after `attempt` failed.
    pub fn can_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }
}
