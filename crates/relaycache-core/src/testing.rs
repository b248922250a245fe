//! In-memory stand-ins for the network, used by the test suites.
//!
//! `ScriptedTransport` answers requests from a per-route script instead of
//! touching the network. Each route is matched by substring against the
//! request URL; its queued behaviours are consumed in order and the last one
//! repeats forever. Requests with no matching route are refused as if the
//! host were offline.

use std::sync::{Arc, Mutex, MutexGuard};

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::HeaderMap;
use reqwest::{Method, StatusCode};
use tokio::time::Instant;

use crate::api::transport::{HttpRequest, HttpResponse, Transport, TransportError};

#[derive(Debug, Clone)]
enum Behavior {
    Respond(StatusCode, String),
    Hang,
    Refuse,
    Fail(TransportError),
}

#[derive(Debug)]
struct Route {
    pattern: String,
    script: Vec<Behavior>,
    next: usize,
}

impl Route {
    fn next_behavior(&mut self) -> Behavior {
        let idx = self.next.min(self.script.len() - 1);
        self.next += 1;
        self.script[idx].clone()
    }
}

/// A request as seen by the transport.
#[derive(Debug, Clone)]
pub struct RecordedCall {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
    pub at: Instant,
}

#[derive(Debug, Default)]
struct Inner {
    routes: Vec<Route>,
    calls: Vec<RecordedCall>,
}

#[derive(Debug, Clone, Default)]
pub struct ScriptedTransport {
    inner: Arc<Mutex<Inner>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn inner(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn push(&self, pattern: &str, behavior: Behavior) {
        let mut inner = self.inner();
        if let Some(route) = inner.routes.iter_mut().find(|r| r.pattern == pattern) {
            route.script.push(behavior);
        } else {
            inner.routes.push(Route {
                pattern: pattern.to_string(),
                script: vec![behavior],
                next: 0,
            });
        }
    }

    /// Queue a response for URLs containing `pattern`.
    pub fn respond(&self, pattern: &str, status: StatusCode, body: &str) {
        self.push(pattern, Behavior::Respond(status, body.to_string()));
    }

    /// Queue a call that never completes.
    pub fn hang(&self, pattern: &str) {
        self.push(pattern, Behavior::Hang);
    }

    /// Queue a connection failure.
    pub fn refuse(&self, pattern: &str) {
        self.push(pattern, Behavior::Refuse);
    }

    /// Queue an arbitrary transport error.
    pub fn fail(&self, pattern: &str, error: TransportError) {
        self.push(pattern, Behavior::Fail(error));
    }

    pub fn calls(&self) -> Vec<RecordedCall> {
        self.inner().calls.clone()
    }

    pub fn calls_to(&self, pattern: &str) -> usize {
        self.inner().calls.iter().filter(|c| c.url.contains(pattern)).count()
    }
}

impl Transport for ScriptedTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        let behavior = {
            let mut inner = self.inner();
            inner.calls.push(RecordedCall {
                method: request.method.clone(),
                url: request.url.clone(),
                headers: request.headers.clone(),
                body: request.body.clone(),
                at: Instant::now(),
            });
            inner
                .routes
                .iter_mut()
                .find(|r| request.url.contains(&r.pattern))
                .map(Route::next_behavior)
                .unwrap_or(Behavior::Refuse)
        };

        async move {
            match behavior {
                Behavior::Respond(status, body) => Ok(HttpResponse::new(status, body)),
                Behavior::Hang => futures::future::pending().await,
                Behavior::Refuse => Err(TransportError::connect(format!(
                    "connection refused: {}",
                    request.url
                ))),
                Behavior::Fail(error) => Err(error),
            }
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_script_advances_then_repeats_last() {
        let t = ScriptedTransport::new();
        t.respond("/events", StatusCode::INTERNAL_SERVER_ERROR, "");
        t.respond("/events", StatusCode::OK, "[]");

        let statuses: Vec<StatusCode> = futures::future::join_all(
            (0..3).map(|_| t.send(HttpRequest::get("http://x/events"))),
        )
        .await
        .into_iter()
        .map(|r| r.unwrap().status)
        .collect();
        assert_eq!(statuses, vec![StatusCode::INTERNAL_SERVER_ERROR, StatusCode::OK, StatusCode::OK]);
        assert_eq!(t.calls_to("/events"), 3);
    }

    #[tokio::test]
    async fn test_unknown_route_refused() {
        let t = ScriptedTransport::new();
        assert!(t.send(HttpRequest::get("http://x/nowhere")).await.is_err());
    }
}
