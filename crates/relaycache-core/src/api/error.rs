use reqwest::StatusCode;
use serde::Deserialize;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    #[error("Request timed out. Please check your connection and try again.")]
    Timeout { attempts: u32 },

    #[error("Cannot connect to server. Please check your internet connection.")]
    Transport { attempts: u32, detail: String },

    #[error("{message}")]
    Http { status: u16, message: String },

    #[error("Invalid response: {0}")]
    Parse(String),

    #[error("Server is currently unreachable. Please try again shortly.")]
    ConnectivityGate { consecutive_failures: u32 },

    #[error("Request cancelled")]
    Cancelled,

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Unexpected response from server: {0}")]
    Protocol(String),
}

/// Maximum length for error response bodies in error messages
const MAX_ERROR_BODY_LENGTH: usize = 500;

/// Structured error bodies as returned by the remote service.
/// Different endpoints use different field names for the same thing.
#[derive(Debug, Deserialize)]
struct ErrorBody {
    message: Option<String>,
    detail: Option<serde_json::Value>,
    error: Option<String>,
}

impl ErrorBody {
    fn into_message(self) -> Option<String> {
        let detail = self.detail.and_then(|d| match d {
            serde_json::Value::String(s) => Some(s),
            serde_json::Value::Null => None,
            other => Some(other.to_string()),
        });
        self.message.or(detail).or(self.error).filter(|m| !m.trim().is_empty())
    }
}

impl ApiError {
    /// Truncate a response body to avoid logging excessive data
    fn truncate_body(body: &str) -> String {
        if body.len() <= MAX_ERROR_BODY_LENGTH {
            body.to_string()
        } else {
            let mut end = MAX_ERROR_BODY_LENGTH;
            while !body.is_char_boundary(end) {
                end -= 1;
            }
            format!("{}... (truncated, {} total bytes)", &body[..end], body.len())
        }
    }

    /// Build the error for a non-2xx response.
    ///
    /// Uses the structured body's `message`, `detail` or `error` field when
    /// one is present, otherwise a generic "status N" message.
    pub fn from_status(status: StatusCode, body: &str) -> Self {
        let message = serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(ErrorBody::into_message)
            .map(|m| Self::truncate_body(&m))
            .unwrap_or_else(|| format!("Request failed with status {}", status.as_u16()));
        ApiError::Http {
            status: status.as_u16(),
            message,
        }
    }

    /// Timeouts and connection failures may succeed on a later attempt.
    /// Client errors and malformed responses will not.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ApiError::Timeout { .. } | ApiError::Transport { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Http { status, .. } => Some(*status),
            _ => None,
        }
    }

    pub fn is_server_error(&self) -> bool {
        matches!(self.status(), Some(500..=599))
    }

    /// Re-stamp a retryable failure with the number of attempts made.
    pub(crate) fn with_attempts(self, attempts: u32) -> Self {
        match self {
            ApiError::Timeout { .. } => ApiError::Timeout { attempts },
            ApiError::Transport { detail, .. } => ApiError::Transport { attempts, detail },
            other => other,
        }
    }
}
