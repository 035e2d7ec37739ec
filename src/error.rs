use std::time::Duration;
use thiserror::Error;

/// Errors raised while opening or consuming a converse stream.
#[derive(Error, Debug)]
pub enum Error {
    /// Throttled by the backend. Check `retry_after` for suggested wait time.
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// Invalid, expired or missing credentials.
    #[error("unauthorized")]
    Unauthorized,

    /// Server error (5xx status codes).
    #[error("server error ({0})")]
    Server(u16),

    /// API error with backend-specific message.
    #[error("{message}")]
    Api { status: u16, message: String },

    /// Request or connection timeout.
    #[error("timeout")]
    Timeout,

    /// JSON or SSE parsing error.
    #[error("parse: {0}")]
    Parse(String),

    /// Exception frame received in the middle of a stream.
    #[error("{kind}: {message}")]
    Stream { kind: String, message: String },

    /// Missing API key for the backend.
    #[error("missing API key for {0}")]
    MissingApiKey(String),

    /// HTTP/network error.
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),

    /// Invalid configuration.
    #[error("config: {0}")]
    Config(String),
}

impl Error {
    /// Returns true if a caller may reasonably retry the whole run.
    #[inline]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Error::RateLimited { .. } | Error::Server(_) | Error::Timeout
        )
    }

    /// Create an API error from status and message.
    pub fn api(status: u16, message: impl Into<String>) -> Self {
        Self::Api {
            status,
            message: message.into(),
        }
    }

    /// Create a parse error.
    pub fn parse(msg: impl Into<String>) -> Self {
        Self::Parse(msg.into())
    }

    /// Create an error from a mid-stream exception frame.
    pub fn stream(kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Stream {
            kind: kind.into(),
            message: message.into(),
        }
    }
}
