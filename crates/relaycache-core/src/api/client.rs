//! Request executor for calls to the remote service.
//!
//! This module provides the `ApiClient` struct, which performs one logical
//! call with environment-aware timeouts, bounded retry with backoff, failure
//! classification and a fail-fast gate for critical endpoints.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{self, HeaderMap, HeaderName, HeaderValue};
use serde::de::DeserializeOwned;
use serde_json::Value;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::health::HealthMonitor;

use super::transport::{HttpRequest, Transport, TransportError, TransportErrorKind};
use super::{ApiError, ConnectionProfile, RequestOptions, RetryPolicy};

// ============================================================================
// Constants
// ============================================================================

/// Endpoints gated by the health monitor when none are configured.
/// Event listing and authentication are what users notice first.
pub const DEFAULT_CRITICAL_ENDPOINTS: &[&str] = &["/events", "/auth"];

/// Progress of one logical request across its attempts.
#[derive(Debug)]
struct AttemptState {
    attempt: u32,
    timeout: Duration,
    last_error: Option<ApiError>,
}

/// Executor for remote service calls.
/// Clone is cheap - the transport and health monitor are shared.
#[derive(Clone)]
pub struct ApiClient {
    transport: Arc<dyn Transport>,
    health: Arc<HealthMonitor>,
    base_url: String,
    policy: RetryPolicy,
    profile: ConnectionProfile,
    critical_endpoints: Vec<String>,
}

impl ApiClient {
    pub fn new(base_url: impl Into<String>, transport: Arc<dyn Transport>, health: Arc<HealthMonitor>) -> Self {
        Self {
            transport,
            health,
            base_url: base_url.into(),
            policy: RetryPolicy::default(),
            profile: ConnectionProfile::default(),
            critical_endpoints: DEFAULT_CRITICAL_ENDPOINTS.iter().map(|s| s.to_string()).collect(),
        }
    }

    pub fn with_policy(mut self, policy: RetryPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn with_profile(mut self, profile: ConnectionProfile) -> Self {
        self.profile = profile;
        self
    }

    pub fn with_critical_endpoints<I, S>(mut self, patterns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.critical_endpoints = patterns.into_iter().map(Into::into).collect();
        self
    }

    pub fn health(&self) -> &Arc<HealthMonitor> {
        &self.health
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    pub fn profile(&self) -> ConnectionProfile {
        self.profile
    }

    /// Whether `address` matches one of the critical endpoint patterns.
    pub fn is_critical(&self, address: &str) -> bool {
        self.critical_endpoints.iter().any(|p| address.contains(p.as_str()))
    }

    /// Absolute URLs pass through; anything else is joined onto the base URL.
    pub fn resolve_url(&self, address: &str) -> String {
        if address.starts_with("http://") || address.starts_with("https://") {
            address.to_string()
        } else {
            format!(
                "{}/{}",
                self.base_url.trim_end_matches('/'),
                address.trim_start_matches('/')
            )
        }
    }

    /// Perform one logical request and return the parsed JSON body.
    ///
    /// Timeouts and connection failures are retried up to the policy's
    /// attempt bound; HTTP errors and unparseable bodies fail immediately.
    /// Critical endpoints consult the health monitor before the first
    /// attempt and fail fast while the service is known to be down.
    pub async fn execute(&self, address: &str, options: RequestOptions) -> Result<Value, ApiError> {
        let url = self.resolve_url(address);
        let request = self.build_request(&url, &options)?;
        let profile = options.profile.unwrap_or(self.profile);
        let base_timeout = options.base_timeout.unwrap_or(self.policy.base_timeout);
        let cancel = options.cancel.unwrap_or_default();
        let critical = self.is_critical(address);

        let mut state = AttemptState {
            attempt: 1,
            timeout: self.policy.effective_timeout(profile, base_timeout),
            last_error: None,
        };

        loop {
            if cancel.is_cancelled() {
                return Err(ApiError::Cancelled);
            }

            if critical && state.attempt == 1 {
                tokio::select! {
                    _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                    _ = self.health.probe() => {}
                }
                if self.health.should_fail_fast() {
                    let consecutive_failures = self.health.consecutive_failures();
                    warn!(url = %url, consecutive_failures, "Service unhealthy, refusing request");
                    return Err(ApiError::ConnectivityGate { consecutive_failures });
                }
            }

            debug!(
                url = %url,
                method = %request.method,
                attempt = state.attempt,
                timeout_ms = state.timeout.as_millis() as u64,
                "Sending request"
            );

            match self.attempt(request.clone(), state.timeout, &cancel).await {
                Ok(value) => {
                    if critical {
                        self.health.record_success();
                    }
                    return Ok(value);
                }
                Err(ApiError::Cancelled) => return Err(ApiError::Cancelled),
                Err(e) if e.is_retryable() && self.policy.can_retry(state.attempt) => {
                    let backoff = self.policy.backoff(profile, state.attempt);
                    warn!(
                        url = %url,
                        attempt = state.attempt,
                        backoff_ms = backoff.as_millis() as u64,
                        error = ?e,
                        "Request failed, backing off"
                    );
                    tokio::select! {
                        _ = cancel.cancelled() => return Err(ApiError::Cancelled),
                        _ = tokio::time::sleep(backoff) => {}
                    }
                    state.timeout = self.policy.next_timeout(state.timeout, state.attempt);
                    state.attempt += 1;
                    state.last_error = Some(e);
                }
                Err(e) if e.is_retryable() => {
                    warn!(
                        url = %url,
                        attempts = state.attempt,
                        error = ?e,
                        previous = ?state.last_error,
                        "Request failed after final attempt"
                    );
                    self.health.record_failure();
                    return Err(e.with_attempts(state.attempt));
                }
                Err(e) => {
                    if e.is_server_error() {
                        self.health.record_failure();
                    }
                    debug!(url = %url, error = %e, "Request failed, not retrying");
                    return Err(e);
                }
            }
        }
    }

    /// Like [`ApiClient::execute`], deserializing the body into `T`.
    pub async fn execute_json<T: DeserializeOwned>(&self, address: &str, options: RequestOptions) -> Result<T, ApiError> {
        let value = self.execute(address, options).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::Parse(format!("Unexpected response shape from {}: {}", address, e)))
    }

    /// One attempt under its own deadline. Dropping the transport future on
    /// deadline or cancellation aborts the in-flight call.
    async fn attempt(
        &self,
        request: HttpRequest,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Value, ApiError> {
        let outcome = tokio::select! {
            _ = cancel.cancelled() => return Err(ApiError::Cancelled),
            outcome = tokio::time::timeout(timeout, self.transport.send(request)) => outcome,
        };

        let response = match outcome {
            Err(_) => return Err(ApiError::Timeout { attempts: 1 }),
            Ok(Err(e)) => return Err(Self::classify_transport_error(e)),
            Ok(Ok(response)) => response,
        };

        if !response.status.is_success() {
            return Err(ApiError::from_status(response.status, &response.text()));
        }

        Self::parse_body(&response.body)
    }

    fn classify_transport_error(e: TransportError) -> ApiError {
        match e.kind {
            TransportErrorKind::Timeout => ApiError::Timeout { attempts: 1 },
            TransportErrorKind::Connect => ApiError::Transport {
                attempts: 1,
                detail: e.message,
            },
            TransportErrorKind::InvalidRequest => ApiError::InvalidRequest(e.message),
            TransportErrorKind::Protocol => ApiError::Protocol(e.message),
        }
    }

    /// Empty 2xx bodies (e.g. 204 from tracking beacons) parse as `null`.
    fn parse_body(body: &[u8]) -> Result<Value, ApiError> {
        if body.iter().all(u8::is_ascii_whitespace) {
            return Ok(Value::Null);
        }
        serde_json::from_slice(body).map_err(|e| ApiError::Parse(e.to_string()))
    }

    /// Default headers, then the bearer token, then caller headers; later
    /// values replace earlier ones with the same name.
    fn build_request(&self, url: &str, options: &RequestOptions) -> Result<HttpRequest, ApiError> {
        let mut headers = HeaderMap::new();
        headers.insert(header::ACCEPT, HeaderValue::from_static("application/json"));
        headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-cache"));
        headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));
        if options.body.is_some() {
            headers.insert(header::CONTENT_TYPE, HeaderValue::from_static("application/json"));
        }

        if let Some(ref token) = options.token {
            let value = HeaderValue::from_str(&format!("Bearer {}", token))
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid bearer token: {}", e)))?;
            headers.insert(header::AUTHORIZATION, value);
        }

        for (name, value) in &options.headers {
            let name = HeaderName::from_bytes(name.as_bytes())
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid header name {:?}: {}", name, e)))?;
            let value = HeaderValue::from_str(value)
                .map_err(|e| ApiError::InvalidRequest(format!("Invalid value for header {}: {}", name, e)))?;
            headers.insert(name, value);
        }

        Ok(HttpRequest {
            method: options.method.clone(),
            url: url.to_string(),
            headers,
            body: options.body.clone(),
        })
    }
}

impl std::fmt::Debug for ApiClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ApiClient")
            .field("base_url", &self.base_url)
            .field("policy", &self.policy)
            .field("profile", &self.profile)
            .field("critical_endpoints", &self.critical_endpoints)
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
