//! Request executor for the remote service.
//!
//! This module provides the `ApiClient` for issuing calls to the remote
//! service over unreliable networks: per-attempt deadlines scaled for
//! constrained links, bounded retry with growing backoff, classified errors
//! and a fail-fast gate in front of critical endpoints.
//!
//! The network itself sits behind the `Transport` trait; `ReqwestTransport`
//! is the production implementation.

pub mod client;
pub mod error;
pub mod policy;
pub mod request;
pub mod transport;

pub use client::{ApiClient, DEFAULT_CRITICAL_ENDPOINTS};
pub use error::ApiError;
pub use policy::{ConnectionProfile, RetryPolicy};
pub use request::RequestOptions;
pub use transport::{HttpRequest, HttpResponse, ReqwestTransport, Transport, TransportError, TransportErrorKind};
