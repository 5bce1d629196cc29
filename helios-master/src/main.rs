use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use helios_master::api;
use helios_master::config::MasterConfig;
use helios_master::model::MasterModel;
use helios_master::shutdown;
use helios_store::{CoordinationStore, MemoryStore, StoreClient};

#[derive(Parser, Debug)]
#[command(name = "helios-master")]
#[command(about = "Helios master: RPC surface over the coordination store")]
struct Args {
    /// Address to bind the HTTP API to
    #[arg(long, env = "HELIOS_MASTER_BIND", default_value = "0.0.0.0:5801")]
    bind: String,

    /// Coordination store endpoints (comma separated; "memory:" embeds the
    /// in-process store)
    #[arg(long, env = "HELIOS_STORE_ENDPOINTS", default_value = "memory:")]
    store: String,

    /// Accept deployments to hosts that have never registered
    #[arg(long, env = "HELIOS_ALLOW_UNREGISTERED_HOSTS")]
    allow_unregistered_hosts: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helios_master=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let config = MasterConfig {
        bind_addr: args.bind,
        store_endpoints: args.store,
        allow_unregistered_hosts: args.allow_unregistered_hosts,
    };
    config.validate()?;

    tracing::info!("Starting Helios master");

    let store = connect_store(&config.store_endpoints)?;
    let model = Arc::new(MasterModel::new(StoreClient::new(store), config.clone()));
    model
        .bootstrap()
        .await
        .context("Failed to bootstrap the coordination store tree")?;

    let app = api::create_router(Arc::clone(&model));

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind_addr))?;
    tracing::info!("Listening on {}", config.bind_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown::shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

/// Resolves the configured endpoints to a store driver.
///
/// The replicated store server is an external collaborator; its client
/// driver is selected at deployment time behind the `CoordinationStore`
/// trait. The embedded in-process driver ships in-tree.
fn connect_store(endpoints: &str) -> Result<Arc<dyn CoordinationStore>> {
    let first = endpoints.split(',').next().unwrap_or_default().trim();
    if first.starts_with("memory") {
        tracing::info!("Using embedded in-process coordination store");
        Ok(MemoryStore::new())
    } else {
        anyhow::bail!("no coordination store driver for endpoint: {first}")
    }
}
