//! Relaycache - a resilient data access layer.
//!
//! This crate sits between an application and a remote HTTP service plus a
//! handful of expensive third-party lookups. It provides:
//! - a persisted TTL cache for lookup results (`cache`)
//! - a health monitor that lets critical calls fail fast (`health`)
//! - a request executor with adaptive timeouts and bounded retry (`api`)
//!
//! `DataLayer` wires the three together from a `Config`.

pub mod api;
pub mod cache;
pub mod config;
pub mod context;
pub mod health;
pub mod testing;

pub use api::{ApiClient, ApiError, ConnectionProfile, RequestOptions};
pub use cache::{CacheStore, OperationType};
pub use config::Config;
pub use context::DataLayer;
pub use health::HealthMonitor;
