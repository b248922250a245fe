use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::api::transport::{HttpRequest, Transport};

/// Consecutive failures tolerated before the service is marked unhealthy.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 2;

/// Minimum spacing between two liveness probes.
pub const DEFAULT_PROBE_COOLDOWN_SECS: u64 = 30;

/// Deadline for a single liveness probe.
pub const DEFAULT_PROBE_TIMEOUT_SECS: u64 = 5;

#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Full URL of the liveness endpoint, e.g. `https://host/api/health`.
    pub health_url: String,
    pub failure_threshold: u32,
    pub probe_cooldown: Duration,
    pub probe_timeout: Duration,
}

impl HealthConfig {
    pub fn new(health_url: impl Into<String>) -> Self {
        Self {
            health_url: health_url.into(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            probe_cooldown: Duration::from_secs(DEFAULT_PROBE_COOLDOWN_SECS),
            probe_timeout: Duration::from_secs(DEFAULT_PROBE_TIMEOUT_SECS),
        }
    }
}

#[derive(Debug)]
struct HealthState {
    is_healthy: bool,
    consecutive_failures: u32,
    last_probe_at: Option<Instant>,
}

/// Point-in-time view of the monitor, for diagnostics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HealthSnapshot {
    pub is_healthy: bool,
    pub consecutive_failures: u32,
    pub last_probe_age: Option<Duration>,
}

/// Tracks consecutive failures against the remote service.
///
/// Every method returns immediately from cached state except [`probe`],
/// which performs at most one bounded network call per cooldown window.
///
/// [`probe`]: HealthMonitor::probe
pub struct HealthMonitor {
    config: HealthConfig,
    transport: Arc<dyn Transport>,
    state: Mutex<HealthState>,
}

impl HealthMonitor {
    pub fn new(config: HealthConfig, transport: Arc<dyn Transport>) -> Self {
        Self {
            config,
            transport,
            state: Mutex::new(HealthState {
                is_healthy: true,
                consecutive_failures: 0,
                last_probe_at: None,
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, HealthState> {
        // Counters stay consistent even if a holder panicked
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn config(&self) -> &HealthConfig {
        &self.config
    }

    pub fn is_healthy(&self) -> bool {
        self.state().is_healthy
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.state().consecutive_failures
    }

    /// Whether calls to critical endpoints should be refused without
    /// touching the network.
    pub fn should_fail_fast(&self) -> bool {
        let state = self.state();
        !state.is_healthy && state.consecutive_failures > self.config.failure_threshold
    }

    pub fn snapshot(&self) -> HealthSnapshot {
        let state = self.state();
        HealthSnapshot {
            is_healthy: state.is_healthy,
            consecutive_failures: state.consecutive_failures,
            last_probe_age: state.last_probe_at.map(|at| at.elapsed()),
        }
    }

    /// Check the liveness endpoint, at most once per cooldown window.
    ///
    /// Inside the window the last known state is returned without any
    /// network work. The window is claimed before the call goes out, so
    /// concurrent callers never stack up probes.
    pub async fn probe(&self) -> bool {
        {
            let mut state = self.state();
            let now = Instant::now();
            if let Some(last) = state.last_probe_at {
                if now.duration_since(last) < self.config.probe_cooldown {
                    return state.is_healthy;
                }
            }
            state.last_probe_at = Some(now);
        }

        let request = HttpRequest::get(self.config.health_url.clone());
        let success = match tokio::time::timeout(self.config.probe_timeout, self.transport.send(request)).await {
            Ok(Ok(response)) if response.status.is_success() => true,
            Ok(Ok(response)) => {
                debug!(status = %response.status, "Health probe returned non-success status");
                false
            }
            Ok(Err(e)) => {
                debug!(error = %e, "Health probe failed");
                false
            }
            Err(_) => {
                debug!(timeout_ms = self.config.probe_timeout.as_millis() as u64, "Health probe timed out");
                false
            }
        };

        self.record_outcome(success);
        self.is_healthy()
    }

    /// Fold the outcome of a completed call into the failure counter.
    pub fn record_outcome(&self, success: bool) {
        if success {
            self.record_success();
        } else {
            self.record_failure();
        }
    }

    pub fn record_success(&self) {
        let mut state = self.state();
        if !state.is_healthy {
            info!(after_failures = state.consecutive_failures, "Remote service healthy again");
        }
        state.consecutive_failures = 0;
        state.is_healthy = true;
    }

    pub fn record_failure(&self) {
        let mut state = self.state();
        state.consecutive_failures = state.consecutive_failures.saturating_add(1);
        let was_healthy = state.is_healthy;
        state.is_healthy = state.consecutive_failures <= self.config.failure_threshold;
        if was_healthy && !state.is_healthy {
            warn!(
                consecutive_failures = state.consecutive_failures,
                "Remote service marked unhealthy"
            );
        }
    }
}

impl std::fmt::Debug for HealthMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HealthMonitor")
            .field("config", &self.config)
            .field("state", &*self.state())
            .finish()
    }
}
