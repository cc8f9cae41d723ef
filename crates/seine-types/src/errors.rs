//! Error taxonomy for the crawl engine.

use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Coarse failure category attached to fetch results and job logs.
///
/// The kind decides retry behaviour: `Transport`, `HttpServer` and
/// `RateLimited` outcomes go back through the retry policy, everything else
/// exits immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Network-level failure: connect, DNS, TLS, or timeout.
    Transport,
    /// 4xx response other than 408/429.
    HttpClient,
    /// 5xx or 408 response.
    HttpServer,
    /// 429 response.
    RateLimited,
    /// HTML or JSON body could not be parsed.
    Parse,
    /// Every discovered link was rejected by the filter.
    FilterReject,
    /// A store write failed.
    Persistence,
    /// The operation was cancelled.
    Cancelled,
    /// Invalid configuration or source; aborts submission.
    FatalConfig,
}

impl ErrorKind {
    /// Classify an HTTP status code. Returns `None` for success statuses.
    pub fn from_status(status: u16) -> Option<Self> {
        match status {
            200..=299 => None,
            429 => Some(Self::RateLimited),
            408 => Some(Self::HttpServer),
            400..=499 => Some(Self::HttpClient),
            _ => Some(Self::HttpServer),
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Transport | Self::HttpServer | Self::RateLimited
        )
    }
}

/// Engine error type. Per-URL fetch failures are recorded on the
/// [`FetchResult`](crate::FetchResult) rather than surfaced as `Err`; this
/// enum covers everything that crosses an API boundary.
#[derive(Error, Debug)]
pub enum CrawlError {
    #[error("transport error: {message}")]
    Transport { message: String },

    #[error("client error: HTTP {status}")]
    HttpClient { status: u16 },

    #[error("server error: HTTP {status}")]
    HttpServer { status: u16 },

    #[error("rate limited (HTTP 429)")]
    RateLimited,

    #[error("parse error: {message}")]
    Parse { message: String },

    #[error("persistence error: {message}")]
    Persistence { message: String },

    #[error("operation cancelled")]
    Cancelled,

    #[error("invalid configuration: {message}")]
    FatalConfig { message: String },

    #[error("job {0} not found")]
    JobNotFound(Uuid),

    #[error("job {id}: {message}")]
    InvalidState { id: Uuid, message: String },

    #[error("browser pool error: {message}")]
    BrowserPool { message: String },
}

impl CrawlError {
    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
        }
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::Parse {
            message: message.into(),
        }
    }

    pub fn persistence(message: impl Into<String>) -> Self {
        Self::Persistence {
            message: message.into(),
        }
    }

    pub fn fatal_config(message: impl Into<String>) -> Self {
        Self::FatalConfig {
            message: message.into(),
        }
    }

    pub fn browser_pool(message: impl Into<String>) -> Self {
        Self::BrowserPool {
            message: message.into(),
        }
    }

    pub fn invalid_state(id: Uuid, message: impl Into<String>) -> Self {
        Self::InvalidState {
            id,
            message: message.into(),
        }
    }

    /// Build the error matching a non-success HTTP status.
    pub fn from_status(status: u16) -> Self {
        match ErrorKind::from_status(status) {
            Some(ErrorKind::RateLimited) => Self::RateLimited,
            Some(ErrorKind::HttpClient) => Self::HttpClient { status },
            _ => Self::HttpServer { status },
        }
    }

    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Transport { .. } => ErrorKind::Transport,
            Self::HttpClient { .. } => ErrorKind::HttpClient,
            Self::HttpServer { .. } => ErrorKind::HttpServer,
            Self::RateLimited => ErrorKind::RateLimited,
            Self::Parse { .. } => ErrorKind::Parse,
            Self::Persistence { .. } => ErrorKind::Persistence,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::FatalConfig { .. } => ErrorKind::FatalConfig,
            Self::JobNotFound(_) | Self::InvalidState { .. } => ErrorKind::FatalConfig,
            Self::BrowserPool { .. } => ErrorKind::Transport,
        }
    }
}
