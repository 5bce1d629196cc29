//! Coordination store error taxonomy

use thiserror::Error;

pub type Result<T> = std::result::Result<T, StoreError>;

/// Errors surfaced by the coordination store.
///
/// `Transient` failures are safe to retry; everything else reflects actual
/// store state and must be handled by the caller. `SessionLost` is
/// process-wide: the owner has to re-bootstrap its view.
#[derive(Debug, Clone, Error)]
pub enum StoreError {
    #[error("node not found: {0}")]
    NotFound(String),

    #[error("node already exists: {0}")]
    Exists(String),

    #[error("version mismatch at {path}: expected {expected}, actual {actual}")]
    BadVersion {
        path: String,
        expected: i64,
        actual: i64,
    },

    #[error("transient store failure: {0}")]
    Transient(String),

    #[error("coordination session lost")]
    SessionLost,
}

impl StoreError {
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::Transient(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }

    pub fn is_exists(&self) -> bool {
        matches!(self, StoreError::Exists(_))
    }

    /// The store path the error refers to, when it refers to one.
    pub fn path(&self) -> Option<&str> {
        match self {
            StoreError::NotFound(p) | StoreError::Exists(p) => Some(p),
            StoreError::BadVersion { path, .. } => Some(path),
            _ => None,
        }
    }
}
