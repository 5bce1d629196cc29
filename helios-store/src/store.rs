//! The coordination store contract
//!
//! A narrow, typed interface over a hierarchical key-value service with
//! ephemeral nodes and watches. The replicated store server itself is an
//! external collaborator; everything in this process talks to it through
//! this trait, which also makes the in-memory driver interchangeable in
//! embedded deployments and tests.

use async_trait::async_trait;
use tokio::sync::{broadcast, mpsc};

use crate::error::Result;

/// Node persistence mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateMode {
    Persistent,
    /// Removed automatically when the owning session ends.
    Ephemeral,
}

/// One operation inside an atomic transaction.
#[derive(Debug, Clone)]
pub enum StoreOp {
    /// Asserts that the node exists; fails the transaction otherwise.
    Check { path: String },
    Create {
        path: String,
        data: Vec<u8>,
        mode: CreateMode,
    },
    Set { path: String, data: Vec<u8> },
    Delete {
        path: String,
        version: Option<i64>,
    },
}

impl StoreOp {
    pub fn check(path: impl Into<String>) -> Self {
        StoreOp::Check { path: path.into() }
    }

    pub fn create(path: impl Into<String>, data: Vec<u8>) -> Self {
        StoreOp::Create {
            path: path.into(),
            data,
            mode: CreateMode::Persistent,
        }
    }

    pub fn set(path: impl Into<String>, data: Vec<u8>) -> Self {
        StoreOp::Set {
            path: path.into(),
            data,
        }
    }

    pub fn delete(path: impl Into<String>) -> Self {
        StoreOp::Delete {
            path: path.into(),
            version: None,
        }
    }
}

/// What a watch observes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatchKind {
    /// Data of the node changed or the node was deleted.
    Data,
    /// Direct children were added or removed.
    Children,
    /// The node was created or deleted.
    Existence,
}

/// Edge-triggered watch notification.
///
/// Delivered at least once per relevant change; carries no payload. The
/// consumer re-reads the watched path to obtain current state.
#[derive(Debug, Clone)]
pub struct WatchEvent {
    pub path: String,
    pub kind: WatchKind,
}

/// Process-wide session lifecycle notifications.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionEvent {
    /// The session is gone; every ephemeral node owned by it has been
    /// removed on the server side.
    Lost,
    /// A fresh session is up; owners should re-register ephemerals and
    /// re-publish state.
    Reestablished,
}

/// Hierarchical coordination store.
///
/// All operations are linearizable on the server side. Watches are edge
/// triggers with at-least-once delivery.
#[async_trait]
pub trait CoordinationStore: Send + Sync {
    /// Creates a node. Fails with `NotFound` if the parent is absent and
    /// `Exists` if the node is already there.
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<()>;

    /// Replaces a node's data. Fails with `NotFound` if the node is absent.
    async fn set(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// Deletes a node, optionally guarded by an expected version. A node
    /// that still has children is refused with `Exists`.
    async fn delete(&self, path: &str, version: Option<i64>) -> Result<()>;

    /// Reads a node's data and version.
    async fn get(&self, path: &str) -> Result<(Vec<u8>, i64)>;

    /// Lists direct child names in lexicographic order.
    async fn children(&self, path: &str) -> Result<Vec<String>>;

    /// Applies all operations atomically, or none of them.
    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<()>;

    /// Registers an edge-triggered watch on `path`.
    async fn watch(&self, path: &str, kind: WatchKind) -> Result<mpsc::UnboundedReceiver<WatchEvent>>;

    /// Creates an ephemeral node bound to the current session. Re-registering
    /// a path this session already owns refreshes its data.
    async fn register_ephemeral(&self, path: &str, data: Vec<u8>) -> Result<()>;

    /// Subscribes to session lifecycle events.
    fn session_events(&self) -> broadcast::Receiver<SessionEvent>;
}
