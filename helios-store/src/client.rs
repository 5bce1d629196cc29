//! Typed store client
//!
//! Thin convenience layer over a [`CoordinationStore`]: JSON payloads,
//! ancestor creation, and transient-failure retries for reads. Writes are
//! deliberately not retried here — a side-effecting write must only be
//! reissued by an owner that knows it is idempotent.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{broadcast, mpsc};

use crate::error::{Result, StoreError};
use crate::retry::{retry, RetryPolicy};
use crate::store::{
    CoordinationStore, CreateMode, SessionEvent, StoreOp, WatchEvent, WatchKind,
};

/// Shared handle to the process's coordination store.
#[derive(Clone)]
pub struct StoreClient {
    store: Arc<dyn CoordinationStore>,
    retry: RetryPolicy,
}

impl StoreClient {
    pub fn new(store: Arc<dyn CoordinationStore>) -> Self {
        Self {
            store,
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn raw(&self) -> &Arc<dyn CoordinationStore> {
        &self.store
    }

    // Reads, retried on transient failures.

    pub async fn get(&self, path: &str) -> Result<(Vec<u8>, i64)> {
        retry(&self.retry, "get", || self.store.get(path)).await
    }

    /// Reads and decodes a JSON node. `Ok(None)` when the node is absent.
    pub async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        match self.get(path).await {
            Ok((bytes, _)) => {
                let value = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Transient(format!("undecodable payload at {path}: {e}"))
                })?;
                Ok(Some(value))
            }
            Err(err) if err.is_not_found() => Ok(None),
            Err(err) => Err(err),
        }
    }

    pub async fn children(&self, path: &str) -> Result<Vec<String>> {
        retry(&self.retry, "children", || self.store.children(path)).await
    }

    /// Like `children`, but an absent parent reads as empty.
    pub async fn children_or_empty(&self, path: &str) -> Result<Vec<String>> {
        match self.children(path).await {
            Ok(children) => Ok(children),
            Err(err) if err.is_not_found() => Ok(Vec::new()),
            Err(err) => Err(err),
        }
    }

    pub async fn exists(&self, path: &str) -> Result<bool> {
        match self.get(path).await {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => Ok(false),
            Err(err) => Err(err),
        }
    }

    // Writes, single attempt.

    pub async fn create(&self, path: &str, data: Vec<u8>) -> Result<()> {
        self.store.create(path, data, CreateMode::Persistent).await
    }

    pub async fn create_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        self.create(path, encode(value)?).await
    }

    pub async fn set_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        self.store.set(path, encode(value)?).await
    }

    /// Creates the node or overwrites it if it is already there.
    pub async fn put_json<T: Serialize>(&self, path: &str, value: &T) -> Result<()> {
        let data = encode(value)?;
        match self.store.create(path, data.clone(), CreateMode::Persistent).await {
            Err(err) if err.is_exists() => self.store.set(path, data).await,
            other => other,
        }
    }

    pub async fn delete(&self, path: &str) -> Result<()> {
        self.store.delete(path, None).await
    }

    /// Deletes a node, treating absence as success.
    pub async fn delete_if_exists(&self, path: &str) -> Result<()> {
        match self.store.delete(path, None).await {
            Err(err) if err.is_not_found() => Ok(()),
            other => other,
        }
    }

    /// Creates every missing ancestor of `path`, then `path` itself, as
    /// empty persistent nodes. Safe to race: `Exists` is ignored.
    pub async fn ensure_path(&self, path: &str) -> Result<()> {
        let mut prefix = String::new();
        for segment in path.split('/').filter(|s| !s.is_empty()) {
            prefix.push('/');
            prefix.push_str(segment);
            match self
                .store
                .create(&prefix, Vec::new(), CreateMode::Persistent)
                .await
            {
                Ok(()) => {}
                Err(err) if err.is_exists() => {}
                Err(err) => return Err(err),
            }
        }
        Ok(())
    }

    pub async fn transaction(&self, ops: Vec<StoreOp>) -> Result<()> {
        self.store.transaction(ops).await
    }

    pub async fn watch(
        &self,
        path: &str,
        kind: WatchKind,
    ) -> Result<mpsc::UnboundedReceiver<WatchEvent>> {
        self.store.watch(path, kind).await
    }

    pub async fn register_ephemeral_json<T: Serialize>(
        &self,
        path: &str,
        value: &T,
    ) -> Result<()> {
        self.store.register_ephemeral(path, encode(value)?).await
    }

    pub fn session_events(&self) -> broadcast::Receiver<SessionEvent> {
        self.store.session_events()
    }
}

pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    serde_json::to_vec(value)
        .map_err(|e| StoreError::Transient(format!("unencodable payload: {e}")))
}

#[cfg(test)]
mod tests {
    use serde::Deserialize;

    use super::*;
    use crate::memory::MemoryStore;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Payload {
        n: u32,
    }

    fn client() -> StoreClient {
        StoreClient::new(MemoryStore::new())
    }

    #[tokio::test]
    async fn test_json_roundtrip() {
        let client = client();
        client.ensure_path("/x").await.unwrap();
        client.create_json("/x/p", &Payload { n: 7 }).await.unwrap();
        let got: Option<Payload> = client.get_json("/x/p").await.unwrap();
        assert_eq!(got, Some(Payload { n: 7 }));
        let missing: Option<Payload> = client.get_json("/x/q").await.unwrap();
        assert_eq!(missing, None);
    }

    #[tokio::test]
    async fn test_ensure_path_is_idempotent() {
        let client = client();
        client.ensure_path("/a/b/c").await.unwrap();
        client.ensure_path("/a/b/c").await.unwrap();
        assert!(client.exists("/a/b/c").await.unwrap());
    }

    #[tokio::test]
    async fn test_put_json_creates_then_overwrites() {
        let client = client();
        client.put_json("/p", &Payload { n: 1 }).await.unwrap();
        client.put_json("/p", &Payload { n: 2 }).await.unwrap();
        let got: Option<Payload> = client.get_json("/p").await.unwrap();
        assert_eq!(got, Some(Payload { n: 2 }));
    }

    #[tokio::test]
    async fn test_children_or_empty_on_missing_parent() {
        let client = client();
        assert!(client.children_or_empty("/nope").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_delete_if_exists_tolerates_absence() {
        let client = client();
        client.delete_if_exists("/nope").await.unwrap();
    }
}
