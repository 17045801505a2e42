//! Error types for the console core.

use std::path::PathBuf;

/// Result type alias using RimeError
pub type Result<T> = std::result::Result<T, RimeError>;

/// Failures talking to the console's HTTP query interface.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Could not reach the server or send the request
    #[error("connection failed: {0}")]
    Connect(String),

    /// The session was rejected (HTTP 401/403)
    #[error("authentication failed (HTTP {status}): {message}")]
    Unauthorized { status: u16, message: String },

    /// Any other non-2xx response
    #[error("server returned HTTP {status}: {message}")]
    Status { status: u16, message: String },

    /// The response body broke off mid-stream
    #[error("stream read failed: {0}")]
    Stream(String),
}

impl From<reqwest::Error> for TransportError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_body() || e.is_decode() {
            TransportError::Stream(e.to_string())
        } else {
            TransportError::Connect(e.to_string())
        }
    }
}

/// Errors from the local side: history log and I/O.
#[derive(Debug, thiserror::Error)]
pub enum RimeError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Another process holds the history log
    #[error("history file {} is locked by another process", path.display())]
    HistoryLocked { path: PathBuf },
}

impl From<&TransportError> for crate::model::RunError {
    fn from(e: &TransportError) -> Self {
        match e {
            TransportError::Unauthorized { message, .. } => {
                crate::model::RunError::authentication(None, message.clone())
            }
            other => crate::model::RunError::network(other.to_string()),
        }
    }
}
