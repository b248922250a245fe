//! Remote service health tracking.
//!
//! This module provides the `HealthMonitor`, a cheap circuit-breaker style
//! signal of whether the remote service is reachable. After more than
//! `failure_threshold` consecutive failures the service is considered
//! unhealthy and calls to critical endpoints fail fast; one success flips it
//! back.

pub mod monitor;

pub use monitor::{HealthConfig, HealthMonitor, HealthSnapshot};
