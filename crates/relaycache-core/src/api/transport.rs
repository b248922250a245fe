//! The network seam underneath the request executor and the health probe.

use std::fmt;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::FutureExt;
use reqwest::header::HeaderMap;
use reqwest::{Client, Method, StatusCode};

/// Upper bound on TCP/TLS connection setup. Per-attempt deadlines are
/// enforced by the executor, not by the HTTP client.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// A fully prepared outbound call.
#[derive(Debug, Clone)]
pub struct HttpRequest {
    pub method: Method,
    pub url: String,
    pub headers: HeaderMap,
    pub body: Option<Vec<u8>>,
}

impl HttpRequest {
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            method: Method::GET,
            url: url.into(),
            headers: HeaderMap::new(),
            body: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpResponse {
    pub status: StatusCode,
    pub body: Vec<u8>,
}

impl HttpResponse {
    pub fn new(status: StatusCode, body: impl Into<Vec<u8>>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransportErrorKind {
    /// Connection could not be established or was lost (DNS, offline, reset).
    Connect,
    /// The transport itself gave up waiting.
    Timeout,
    /// The request could not be built (bad URL, bad header).
    InvalidRequest,
    /// The server answered but the exchange could not be completed
    /// (redirect policy violation, undecodable response). Not retryable.
    Protocol,
}

#[derive(Debug, Clone)]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn connect(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Connect,
            message: message.into(),
        }
    }

    pub fn timeout(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Timeout,
            message: message.into(),
        }
    }

    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::InvalidRequest,
            message: message.into(),
        }
    }

    pub fn protocol(message: impl Into<String>) -> Self {
        Self {
            kind: TransportErrorKind::Protocol,
            message: message.into(),
        }
    }
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for TransportError {}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_builder() {
            TransportError::invalid_request(e.to_string())
        } else if e.is_timeout() {
            TransportError::timeout(e.to_string())
        } else if e.is_connect() || e.is_request() || e.is_body() {
            TransportError::connect(e.to_string())
        } else {
            TransportError::protocol(e.to_string())
        }
    }
}

/// Sends one HTTP request and reads the whole response body.
///
/// Implementations must not retry; the executor owns retry policy.
pub trait Transport: Send + Sync {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>>;
}

/// Production transport backed by a pooled `reqwest::Client`.
/// Clone is cheap - reqwest::Client uses Arc internally for connection pooling.
#[derive(Clone)]
pub struct ReqwestTransport {
    client: Client,
}

impl ReqwestTransport {
    pub fn new() -> Result<Self, TransportError> {
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()?;
        Ok(Self { client })
    }

    /// Wrap an existing client, sharing its connection pool.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

impl Transport for ReqwestTransport {
    fn send(&self, request: HttpRequest) -> BoxFuture<'_, Result<HttpResponse, TransportError>> {
        async move {
            let mut builder = self
                .client
                .request(request.method, &request.url)
                .headers(request.headers);
            if let Some(body) = request.body {
                builder = builder.body(body);
            }

            let response = builder.send().await?;
            let status = response.status();
            let body = response.bytes().await?;
            Ok(HttpResponse {
                status,
                body: body.to_vec(),
            })
        }
        .boxed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unreachable_host_is_connect_error() {
        let transport = ReqwestTransport::new().unwrap();
        // Port 9 (discard) on localhost is closed in any sane test environment
        let err = transport
            .send(HttpRequest::get("http://127.0.0.1:9/health"))
            .await
            .unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Connect);
    }

    /// Serve one redirect on a local socket and return its URL.
    fn redirecting_server() -> String {
        use std::io::{Read, Write};

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                let mut buf = [0u8; 4096];
                let _ = stream.read(&mut buf);
                let _ = stream.write_all(
                    b"HTTP/1.1 302 Found\r\nLocation: /elsewhere\r\nContent-Length: 0\r\nConnection: close\r\n\r\n",
                );
            }
        });
        format!("http://{}/start", addr)
    }

    #[tokio::test]
    async fn test_redirect_policy_failure_is_protocol_error() {
        let client = Client::builder()
            .redirect(reqwest::redirect::Policy::custom(|attempt| attempt.error("redirects disabled")))
            .build()
            .unwrap();
        let transport = ReqwestTransport::with_client(client);
        let err = transport.send(HttpRequest::get(redirecting_server())).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Protocol);
    }

    #[tokio::test]
    async fn test_bad_url_is_invalid_request() {
        let transport = ReqwestTransport::new().unwrap();
        let err = transport.send(HttpRequest::get("not a url")).await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::InvalidRequest);
    }
}
