//! Error types for the Helios client

use thiserror::Error;

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

/// Errors that can occur when talking to the master.
#[derive(Debug, Error)]
pub enum ClientError {
    /// HTTP request failed before a response arrived.
    #[error("HTTP request failed: {0}")]
    RequestFailed(#[from] reqwest::Error),

    /// The master rejected the request. `kind` is the machine-readable tag
    /// from the error body (e.g. `JOB_NOT_FOUND`).
    #[error("master error {kind} (status {status}): {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
    },

    /// Failed to decode a response body.
    #[error("failed to parse response: {0}")]
    ParseError(String),
}

impl ClientError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::Api { status: 404, .. })
    }

    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::Api { status: 409, .. })
    }

    /// The machine-readable error kind, when the master supplied one.
    pub fn kind(&self) -> Option<&str> {
        match self {
            Self::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }
}
