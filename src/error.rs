use serde::{Deserialize, Serialize};
use std::error::Error as _;
use thiserror::Error;

/// Errors returned by sdapi-rs operations.
#[derive(Error, Debug)]
pub enum SdError {
    /// The server returned a non-success HTTP status.
    #[error("Server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },

    /// Network-level request failure with context.
    #[error("{context}: {source}")]
    Network {
        context: String,
        source: reqwest::Error,
    },

    /// A URL could not be built or parsed.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// The request could not be assembled (bad header, unserializable body).
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The client-side deadline passed before a response arrived.
    #[error("Request timed out")]
    Timeout,

    /// The request was cancelled locally.
    #[error("Request was cancelled")]
    Cancelled,

    /// A generation job finished with a terminal failure.
    #[error("Generation failed: {message} (code: {status})")]
    GenerationFailed { message: String, status: u16 },

    /// A generation was requested while another one is still running.
    #[error("Generation already in progress")]
    GenerationInProgress,

    /// A payload field name is not part of the known payload schema.
    #[error("Field '{0}' not in payload")]
    UnknownField(String),

    /// The event channel closed before the awaited event arrived.
    #[error("Event channel closed")]
    ChannelClosed,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Downloaded bytes are not a decodable image.
    #[error("Failed to load image: {0}")]
    Image(#[from] image::ImageError),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Convenience alias.
pub type Result<T> = std::result::Result<T, SdError>;

/// Failure taxonomy shared by every fetcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum ErrorKind {
    /// Connection refused or host not found: the server process is unreachable.
    Connectivity,
    /// TLS failure, malformed response, or other protocol-level breakage.
    Protocol,
    /// Client-side deadline exceeded.
    Timeout,
    /// HTTP 4xx.
    Application,
    /// HTTP 5xx.
    Server,
    /// Local abort.
    Cancelled,
}

impl ErrorKind {
    /// Whether the fetch layer may spend retry budget on this failure.
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            ErrorKind::Connectivity | ErrorKind::Protocol | ErrorKind::Timeout | ErrorKind::Server
        )
    }

    /// Whether this failure means the server itself is gone.
    pub fn marks_server_down(self) -> bool {
        self == ErrorKind::Connectivity
    }
}

/// A classified failure: what the caller eventually sees in a failure event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Failure {
    pub kind: ErrorKind,
    pub message: String,
    /// HTTP status, or 0 when no response was received.
    pub status: u16,
}

impl Failure {
    pub fn new(kind: ErrorKind, message: impl Into<String>, status: u16) -> Self {
        Self {
            kind,
            message: message.into(),
            status,
        }
    }

    pub fn timed_out() -> Self {
        Self::new(
            ErrorKind::Timeout,
            "Request timed out. Server might be overloaded or unreachable.",
            0,
        )
    }

    pub fn cancelled() -> Self {
        Self::new(
            ErrorKind::Cancelled,
            "The request was cancelled before completion.",
            0,
        )
    }
}

/// Classify an HTTP status. Returns `None` for statuses that are not failures.
pub fn classify_status(status: u16) -> Option<Failure> {
    let message = match status {
        0..=399 => return None,
        401 => format!("Authentication required (HTTP {status}). Provide valid credentials."),
        403 => format!("Access denied (HTTP {status}). Check credentials or permissions."),
        404 => format!("Resource not found (HTTP {status}). The endpoint or file may not exist."),
        409 => format!("Request conflict (HTTP {status}). Possibly duplicate or invalid data."),
        400..=499 => format!("Request rejected by the server (HTTP {status})."),
        500 => format!("Internal server error (HTTP {status}). Try again later."),
        _ => format!("Server error (HTTP {status}). Try again later."),
    };
    let kind = if status >= 500 {
        ErrorKind::Server
    } else {
        ErrorKind::Application
    };
    Some(Failure::new(kind, message, status))
}

/// Classify a transport-level `reqwest` failure.
pub fn classify_transport(err: &reqwest::Error) -> Failure {
    let chain = source_chain(err).to_lowercase();
    let status = err.status().map(|s| s.as_u16()).unwrap_or(0);

    let (kind, message) = if err.is_timeout() {
        (
            ErrorKind::Timeout,
            "Request timed out. Server might be overloaded or unreachable.",
        )
    } else if chain.contains("dns") || chain.contains("failed to lookup address") {
        (
            ErrorKind::Connectivity,
            "Host not found. Check your server address or network.",
        )
    } else if chain.contains("certificate") || chain.contains("tls") || chain.contains("handshake")
    {
        (
            ErrorKind::Protocol,
            "SSL handshake failed. Check SSL configuration or certificates.",
        )
    } else if err.is_connect() {
        (
            ErrorKind::Connectivity,
            "Connection refused by the server. Is the server running?",
        )
    } else if chain.contains("connection closed") || chain.contains("connection reset") {
        (
            ErrorKind::Protocol,
            "Server closed the connection unexpectedly.",
        )
    } else if err.is_decode() || err.is_body() {
        (
            ErrorKind::Protocol,
            "Protocol error. The server returned an invalid response.",
        )
    } else {
        (ErrorKind::Protocol, "Temporary network failure. Please try again.")
    };

    Failure::new(kind, format!("{message} | Details: {err}"), status)
}

/// Messages of the underlying causes. The top-level message is skipped since
/// it embeds the URL.
fn source_chain(err: &reqwest::Error) -> String {
    let mut out = String::new();
    let mut source = err.source();
    while let Some(inner) = source {
        out.push_str(&inner.to_string());
        out.push_str(": ");
        source = inner.source();
    }
    out
}
