use std::time::Duration;

use reqwest::Method;
use serde::Serialize;
use tokio_util::sync::CancellationToken;

use super::{ApiError, ConnectionProfile};

/// Caller-supplied options for one logical request.
#[derive(Debug, Clone, Default)]
pub struct RequestOptions {
    pub method: Method,
    /// Extra headers. These win over the executor's defaults.
    pub headers: Vec<(String, String)>,
    /// JSON body, already serialized.
    pub body: Option<Vec<u8>>,
    /// Bearer token; sent as `Authorization: Bearer <token>`.
    pub token: Option<String>,
    /// Overrides the client's connection profile for this call.
    pub profile: Option<ConnectionProfile>,
    /// Overrides the client's base timeout for this call.
    pub base_timeout: Option<Duration>,
    /// Cancels the whole logical request, including pending retries.
    pub cancel: Option<CancellationToken>,
}

impl RequestOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get() -> Self {
        Self::new()
    }

    pub fn post() -> Self {
        Self::new().method(Method::POST)
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }

    pub fn json<B: Serialize + ?Sized>(mut self, body: &B) -> Result<Self, ApiError> {
        let encoded = serde_json::to_vec(body)
            .map_err(|e| ApiError::InvalidRequest(format!("Failed to serialize body: {}", e)))?;
        self.body = Some(encoded);
        Ok(self)
    }

    pub fn bearer(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    pub fn profile(mut self, profile: ConnectionProfile) -> Self {
        self.profile = Some(profile);
        self
    }

    pub fn timeout(mut self, base_timeout: Duration) -> Self {
        self.base_timeout = Some(base_timeout);
        self
    }

    pub fn cancel_token(mut self, token: CancellationToken) -> Self {
        self.cancel = Some(token);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builder() {
        let opts = RequestOptions::post()
            .header("X-Trace", "abc")
            .bearer("tok")
            .profile(ConnectionProfile::Constrained)
            .json(&json!({"email": "a@b.c"}))
            .unwrap();

        assert_eq!(opts.method, Method::POST);
        assert_eq!(opts.headers, vec![("X-Trace".to_string(), "abc".to_string())]);
        assert_eq!(opts.token.as_deref(), Some("tok"));
        assert_eq!(opts.profile, Some(ConnectionProfile::Constrained));
        assert_eq!(opts.body.as_deref(), Some(br#"{"email":"a@b.c"}"#.as_slice()));
    }

    #[test]
    fn test_default_is_get() {
        assert_eq!(RequestOptions::get().method, Method::GET);
    }
}
