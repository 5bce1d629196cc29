//! Host registration and liveness
//!
//! Creates the host's path skeleton, publishes its info node, and holds
//! the ephemeral `up` node whose presence is what every observer reads as
//! host liveness. Re-run in full whenever the session is re-established.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use helios_core::descriptors::{AgentInfo, HostInfo, RuntimeInfo};
use helios_core::paths;
use helios_store::{StoreClient, StoreError};
use tracing::info;

/// Builds the info payload published for this agent.
pub fn host_info(
    runtime: RuntimeInfo,
    environment: BTreeMap<String, String>,
    started_at: DateTime<Utc>,
) -> HostInfo {
    HostInfo {
        agent: AgentInfo {
            version: env!("CARGO_PKG_VERSION").to_string(),
            started_at,
        },
        runtime,
        environment,
    }
}

/// Registers the host: path skeleton, info node, ephemeral liveness node.
/// Idempotent, and safe to call again after session loss.
pub async fn register_host(
    store: &StoreClient,
    host: &str,
    info: &HostInfo,
) -> Result<(), StoreError> {
    store.ensure_path(&paths::status_host_jobs(host)).await?;
    store.ensure_path(&paths::config_host_jobs(host)).await?;
    store.put_json(&paths::status_host_info(host), info).await?;
    store
        .register_ephemeral_json(&paths::status_host_up(host), &Utc::now())
        .await?;
    info!(host, "host registered");
    Ok(())
}

/// Removes the liveness node on clean shutdown so observers see DOWN
/// immediately instead of waiting for the session to expire.
pub async fn deregister_host(store: &StoreClient, host: &str) -> Result<(), StoreError> {
    store.delete_if_exists(&paths::status_host_up(host)).await?;
    info!(host, "host deregistered");
    Ok(())
}

#[cfg(test)]
mod tests {
    use helios_store::MemoryStore;

    use super::*;

    fn runtime_info() -> RuntimeInfo {
        RuntimeInfo {
            name: "fake".to_string(),
            version: "0".to_string(),
        }
    }

    #[tokio::test]
    async fn test_register_and_deregister() {
        let store = StoreClient::new(MemoryStore::new());
        let info = host_info(runtime_info(), BTreeMap::new(), Utc::now());

        register_host(&store, "h1", &info).await.unwrap();
        assert!(store.exists(&paths::status_host_up("h1")).await.unwrap());
        let published: Option<HostInfo> =
            store.get_json(&paths::status_host_info("h1")).await.unwrap();
        assert_eq!(published.unwrap().runtime, runtime_info());

        deregister_host(&store, "h1").await.unwrap();
        assert!(!store.exists(&paths::status_host_up("h1")).await.unwrap());
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let store = StoreClient::new(MemoryStore::new());
        let info = host_info(runtime_info(), BTreeMap::new(), Utc::now());
        register_host(&store, "h1", &info).await.unwrap();
        register_host(&store, "h1", &info).await.unwrap();
    }
}
