//! In-process coordination store
//!
//! A single-node implementation of [`CoordinationStore`] backing embedded
//! deployments and the test suites. It keeps the full hierarchy in one map
//! guarded by a mutex, dispatches edge-triggered watch events on every
//! mutation, and models an expirable session so session-loss handling can
//! be exercised without a real server.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{broadcast, mpsc};
use tracing::debug;

use crate::error::{Result, StoreError};
use crate::store::{
    CoordinationStore, CreateMode, SessionEvent, StoreOp, WatchEvent, WatchKind,
};

#[derive(Debug, Clone)]
struct Node {
    data: Vec<u8>,
    version: i64,
    /// Session id for ephemeral nodes, `None` for persistent ones.
    owner_session: Option<u64>,
}

struct Watcher {
    path: String,
    kind: WatchKind,
    tx: mpsc::UnboundedSender<WatchEvent>,
}

struct Inner {
    nodes: BTreeMap<String, Node>,
    watchers: Vec<Watcher>,
    session: u64,
}

/// In-memory hierarchical store with watches, transactions, ephemeral
/// nodes and an expirable session.
pub struct MemoryStore {
    inner: Mutex<Inner>,
    session_tx: broadcast::Sender<SessionEvent>,
}

impl MemoryStore {
    pub fn new() -> Arc<Self> {
        let (session_tx, _) = broadcast::channel(16);
        Arc::new(Self {
            inner: Mutex::new(Inner {
                nodes: BTreeMap::new(),
                watchers: Vec::new(),
                session: 0,
            }),
            session_tx,
        })
    }

    /// Expires the current session: removes every ephemeral node it owned
    /// and announces the loss. Drives the same code paths a server-side
    /// session timeout would; call [`MemoryStore::reestablish_session`] to
    /// end the outage.
    pub fn expire_session(&self) {
        let events = {
            let mut inner = self.inner.lock();
            let session = inner.session;
            inner.session += 1;
            let doomed: Vec<String> = inner
                .nodes
                .iter()
                .filter(|(_, node)| node.owner_session == Some(session))
                .map(|(path, _)| path.clone())
                .collect();
            let mut events = Vec::new();
            for path in doomed {
                inner.nodes.remove(&path);
                events.extend(removal_events(&path));
            }
            inner.dispatch(&events);
            events
        };
        debug!(removed = events.len(), "session expired");
        let _ = self.session_tx.send(SessionEvent::Lost);
    }

    /// Announces a fresh session after an expiry. Owners react by
    /// re-registering ephemerals and re-publishing state.
    pub fn reestablish_session(&self) {
        let _ = self.session_tx.send(SessionEvent::Reestablished);
    }

    /// Number of live nodes; test observability.
    pub fn node_count(&self) -> usize {
        self.inner.lock().nodes.len()
    }
}

impl Inner {
    fn apply(&mut self, op: &StoreOp, events: &mut Vec<Event>) -> Result<()> {
        match op {
            StoreOp::Check { path } => {
                validate_path(path)?;
                if !self.nodes.contains_key(path) {
                    return Err(StoreError::NotFound(path.clone()));
                }
                Ok(())
            }
            StoreOp::Create { path, data, mode } => {
                validate_path(path)?;
                let parent = parent_of(path);
                if parent != "/" && !self.nodes.contains_key(parent) {
                    return Err(StoreError::NotFound(parent.to_string()));
                }
                if self.nodes.contains_key(path) {
                    return Err(StoreError::Exists(path.clone()));
                }
                let owner_session = match mode {
                    CreateMode::Persistent => None,
                    CreateMode::Ephemeral => Some(self.session),
                };
                self.nodes.insert(
                    path.clone(),
                    Node {
                        data: data.clone(),
                        version: 0,
                        owner_session,
                    },
                );
                events.extend(creation_events(path));
                Ok(())
            }
            StoreOp::Set { path, data } => {
                validate_path(path)?;
                let node = self
                    .nodes
                    .get_mut(path)
                    .ok_or_else(|| StoreError::NotFound(path.clone()))?;
                node.data = data.clone();
                node.version += 1;
                events.push(Event {
                    path: path.clone(),
                    kind: WatchKind::Data,
                });
                Ok(())
            }
            StoreOp::Delete { path, version } => {
                validate_path(path)?;
                let node = self
                    .nodes
                    .get(path)
                    .ok_or_else(|| StoreError::NotFound(path.clone()))?;
                if let Some(expected) = version {
                    if node.version != *expected {
                        return Err(StoreError::BadVersion {
                            path: path.clone(),
                            expected: *expected,
                            actual: node.version,
                        });
                    }
                }
                if let Some(child) = self.first_child(path) {
                    return Err(StoreError::Exists(child));
                }
                self.nodes.remove(path);
                events.extend(removal_events(path));
                Ok(())
            }
        }
    }

    fn first_child(&self, path: &str) -> Option<String> {
        let prefix = child_prefix(path);
        self.nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .map(|(k, _)| k.clone())
            .next()
    }

    fn dispatch(&mut self, events: &[Event]) {
        self.watchers.retain(|watcher| {
            for event in events {
                let hit = match watcher.kind {
                    WatchKind::Data | WatchKind::Existence => {
                        watcher.kind == event.kind && watcher.path == event.path
                    }
                    WatchKind::Children => {
                        event.kind == WatchKind::Children && watcher.path == event.path
                    }
                };
                if hit {
                    // Deliver the watched path; consumers re-read anyway.
                    if watcher
                        .tx
                        .send(WatchEvent {
                            path: watcher.path.clone(),
                            kind: watcher.kind,
                        })
                        .is_err()
                    {
                        return false;
                    }
                }
            }
            true
        });
    }
}

/// Internal mutation record, fanned out to watchers after the lock work.
struct Event {
    path: String,
    kind: WatchKind,
}

fn creation_events(path: &str) -> Vec<Event> {
    vec![
        Event {
            path: path.to_string(),
            kind: WatchKind::Existence,
        },
        Event {
            path: path.to_string(),
            kind: WatchKind::Data,
        },
        Event {
            path: parent_of(path).to_string(),
            kind: WatchKind::Children,
        },
    ]
}

fn removal_events(path: &str) -> Vec<Event> {
    vec![
        Event {
            path: path.to_string(),
            kind: WatchKind::Existence,
        },
        Event {
            path: path.to_string(),
            kind: WatchKind::Data,
        },
        Event {
            path: parent_of(path).to_string(),
            kind: WatchKind::Children,
        },
    ]
}

fn validate_path(path: &str) -> Result<()> {
    let ok = path.starts_with('/')
        && path.len() > 1
        && !path.ends_with('/')
        && !path.contains("//");
    if ok {
        Ok(())
    } else {
        Err(StoreError::Transient(format!("malformed path: {path}")))
    }
}

fn parent_of(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) => "/",
        Some(idx) => &path[..idx],
        None => "/",
    }
}

fn child_prefix(path: &str) -> String {
    if path == "/" {
        "/".to_string()
    } else {
        format!("{path}/")
    }
}

fn is_direct_child(key: &str, prefix: &str) -> bool {
    key.starts_with(prefix) && !key[prefix.len()..].contains('/')
}

#[async_trait]
impl CoordinationStore for MemoryStore {
    async fn create(&self, path: &str, data: Vec<u8>, mode: CreateMode) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut events = Vec::new();
        inner.apply(
            &StoreOp::Create {
                path: path.to_string(),
                data,
                mode,
            },
            &mut events,
        )?;
        inner.dispatch(&events);
        Ok(())
    }

    async fn set(&self, path: &str, data: Vec<u8>) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut events = Vec::new();
        inner.apply(
            &StoreOp::Set {
                path: path.to_string(),
                data,
            },
            &mut events,
        )?;
        inner.dispatch(&events);
        Ok(())
    }

    async fn delete(&self, path: &str, version: Option<i64>) -> Result<()> {
        let mut inner = self.inner.lock();
        let mut events = Vec::new();
        inner.apply(
            &StoreOp::Delete {
                path: path.to_string(),
                version,
            },
            &mut events,
        )?;
        inner.dispatch(&events);
        Ok(())
    }

    async fn get(&self, path: &str) -> Result<(Vec<u8>, i64)> {
        validate_path(path)?;
        let inner = self.inner.lock();
        inner
            .nodes
            .get(path)
            .map(|node| (node.data.clone(), node.version))
            .ok_or_else(|| StoreError::NotFound(path.to_string()))
    }

    async fn children(&self, path: &str) -> Result<Vec<String>> {
        if path != "/" {
            validate_path(path)?;
        }
        let inner = self.inner.lock();
        if path != "/" && !inner.nodes.contains_key(path) {
            return Err(StoreError::NotFound(path.to_string()));
        }
        let prefix = child_prefix(path);
        Ok(inner
            .nodes
            .range(prefix.clone()..)
            .take_while(|(k, _)| k.starts_with(&prefix))
            .filter(|(k, _)| is_direct_child(k, &prefix))
            .map(|(k, _)| k[prefix.len()..].to_string())
            .collect())
    }

    async fn transaction(&self, ops: Vec<StoreOp>) -> Result<()> {
        let mut inner = self.inner.lock();
        // All-or-nothing: run the ops against a scratch copy, commit only
        // if every one succeeds.
        let saved = inner.nodes.clone();
        let mut events = Vec::new();
        for op in &ops {
            if let Err(err) = inner.apply(op, &mut events) {
                inner.nodes = saved;
                return Err(err);
            }
        }
        inner.dispatch(&events);
        Ok(())
    }

    async fn watch(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        if path != "/" {
            validate_path(path)?;
        }
        let (tx, rx) = mpsc::unbounded_channel();
        self.inner.lock().watchers.push(Watcher {
            path: path.to_string(),
            kind,
            tx,
        });
        Ok(rx)
    }

    async fn register_ephemeral(&self, path: &str, data: Vec<u8>) -> Result<()> {
        validate_path(path)?;
        let mut inner = self.inner.lock();
        let session = inner.session;
        let mut events = Vec::new();
        match inner.nodes.get_mut(path) {
            Some(node) if node.owner_session == Some(session) => {
                node.data = data;
                node.version += 1;
                events.push(Event {
                    path: path.to_string(),
                    kind: WatchKind::Data,
                });
            }
            Some(_) => return Err(StoreError::Exists(path.to_string())),
            None => {
                inner.apply(
                    &StoreOp::Create {
                        path: path.to_string(),
                        data,
                        mode: CreateMode::Ephemeral,
                    },
                    &mut events,
                )?;
            }
        }
        inner.dispatch(&events);
        Ok(())
    }

    fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.session_tx.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seeded() -> Arc<MemoryStore> {
        let store = MemoryStore::new();
        store
            .create("/a", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        store
    }

    #[tokio::test]
    async fn test_create_requires_parent() {
        let store = MemoryStore::new();
        let err = store
            .create("/a/b", vec![], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_create_rejects_duplicate() {
        let store = seeded().await;
        let err = store
            .create("/a", vec![], CreateMode::Persistent)
            .await
            .unwrap_err();
        assert!(err.is_exists());
    }

    #[tokio::test]
    async fn test_set_bumps_version() {
        let store = seeded().await;
        assert_eq!(store.get("/a").await.unwrap().1, 0);
        store.set("/a", b"x".to_vec()).await.unwrap();
        let (data, version) = store.get("/a").await.unwrap();
        assert_eq!(data, b"x");
        assert_eq!(version, 1);
    }

    #[tokio::test]
    async fn test_delete_checks_version() {
        let store = seeded().await;
        store.set("/a", b"x".to_vec()).await.unwrap();
        let err = store.delete("/a", Some(0)).await.unwrap_err();
        assert!(matches!(err, StoreError::BadVersion { actual: 1, .. }));
        store.delete("/a", Some(1)).await.unwrap();
        assert!(store.get("/a").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_delete_refuses_node_with_children() {
        let store = seeded().await;
        store
            .create("/a/b", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        let err = store.delete("/a", None).await.unwrap_err();
        assert!(err.is_exists());
        store.delete("/a/b", None).await.unwrap();
        store.delete("/a", None).await.unwrap();
    }

    #[tokio::test]
    async fn test_children_sorted() {
        let store = seeded().await;
        for name in ["c", "a", "b"] {
            store
                .create(&format!("/a/{name}"), vec![], CreateMode::Persistent)
                .await
                .unwrap();
        }
        assert_eq!(store.children("/a").await.unwrap(), vec!["a", "b", "c"]);
        // Grandchildren are not direct children.
        store
            .create("/a/a/x", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        assert_eq!(store.children("/a").await.unwrap(), vec!["a", "b", "c"]);
    }

    #[tokio::test]
    async fn test_transaction_all_or_nothing() {
        let store = seeded().await;
        let err = store
            .transaction(vec![
                StoreOp::create("/a/b", vec![]),
                StoreOp::check("/missing"),
            ])
            .await
            .unwrap_err();
        assert!(err.is_not_found());
        assert!(store.get("/a/b").await.unwrap_err().is_not_found());

        store
            .transaction(vec![
                StoreOp::create("/a/b", vec![]),
                StoreOp::set("/a", b"y".to_vec()),
            ])
            .await
            .unwrap();
        assert!(store.get("/a/b").await.is_ok());
        assert_eq!(store.get("/a").await.unwrap().0, b"y");
    }

    #[tokio::test]
    async fn test_children_watch_fires_on_child_create_and_delete() {
        let store = seeded().await;
        let mut rx = store.watch("/a", WatchKind::Children).await.unwrap();
        store
            .create("/a/b", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.path, "/a");
        assert_eq!(event.kind, WatchKind::Children);

        store.delete("/a/b", None).await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_existence_watch_fires_on_create_and_delete() {
        let store = seeded().await;
        let mut rx = store.watch("/a/b", WatchKind::Existence).await.unwrap();
        store
            .create("/a/b", vec![], CreateMode::Persistent)
            .await
            .unwrap();
        assert!(rx.try_recv().is_ok());
        store.delete("/a/b", None).await.unwrap();
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_session_expiry_removes_ephemerals_and_notifies() {
        let store = seeded().await;
        let mut session_rx = store.session_events();
        let mut watch_rx = store.watch("/a/up", WatchKind::Existence).await.unwrap();

        store.register_ephemeral("/a/up", vec![]).await.unwrap();
        assert!(watch_rx.try_recv().is_ok());

        store.expire_session();
        assert!(store.get("/a/up").await.unwrap_err().is_not_found());
        assert!(watch_rx.try_recv().is_ok());
        assert_eq!(session_rx.try_recv().unwrap(), SessionEvent::Lost);
        store.reestablish_session();
        assert_eq!(session_rx.try_recv().unwrap(), SessionEvent::Reestablished);

        // The next session can take the path over again.
        store.register_ephemeral("/a/up", vec![]).await.unwrap();
        assert!(store.get("/a/up").await.is_ok());
    }

    #[tokio::test]
    async fn test_reregister_refreshes_own_ephemeral() {
        let store = seeded().await;
        store.register_ephemeral("/a/up", b"1".to_vec()).await.unwrap();
        store.register_ephemeral("/a/up", b"2".to_vec()).await.unwrap();
        assert_eq!(store.get("/a/up").await.unwrap().0, b"2");
    }

    #[tokio::test]
    async fn test_persistent_nodes_survive_session_expiry() {
        let store = seeded().await;
        store.register_ephemeral("/a/up", vec![]).await.unwrap();
        store.expire_session();
        assert!(store.get("/a").await.is_ok());
    }
}
