use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use helios_agent::config::AgentConfig;
use helios_agent::runtime::DockerCli;
use helios_agent::shutdown;
use helios_agent::supervisor::Supervisor;
use helios_store::{CoordinationStore, MemoryStore, StoreClient};

#[derive(Parser, Debug)]
#[command(name = "helios-agent")]
#[command(about = "Helios agent: reconciles deployments against the local container runtime")]
struct Args {
    /// Name this host registers under
    #[arg(long, env = "HELIOS_AGENT_NAME")]
    name: Option<String>,

    /// Coordination store endpoints (comma separated; "memory:" embeds the
    /// in-process store)
    #[arg(long, env = "HELIOS_STORE_ENDPOINTS", default_value = "memory:")]
    store: String,

    /// Container runtime endpoint (passed to docker -H); daemon default if
    /// unset
    #[arg(long, env = "HELIOS_RUNTIME_ENDPOINT")]
    runtime_endpoint: Option<String>,

    /// Range dynamic external ports are assigned from
    #[arg(long, env = "HELIOS_PORT_RANGE", default_value = "20000-20999")]
    port_range: String,

    /// History events retained per job on this host
    #[arg(long, env = "HELIOS_HISTORY_RETENTION", default_value_t = 30)]
    history_retention: usize,

    /// Environment labels reported for this host (key=value, comma
    /// separated)
    #[arg(long, env = "HELIOS_AGENT_ENVIRONMENT", default_value = "")]
    environment: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "helios_agent=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let args = Args::parse();
    let mut config = AgentConfig::default();
    if let Some(name) = args.name {
        config.name = name;
    }
    config.store_endpoints = args.store;
    config.runtime_endpoint = args.runtime_endpoint;
    config.port_range = AgentConfig::parse_port_range(&args.port_range)?;
    config.history_retention = args.history_retention;
    config.environment = AgentConfig::parse_environment(&args.environment);
    config.validate()?;

    tracing::info!(host = %config.name, "Starting Helios agent");

    let store = connect_store(&config.store_endpoints)?;
    let runtime = Arc::new(DockerCli::new(config.runtime_endpoint.clone()));

    let token = shutdown::shutdown_token();
    let (supervisor, watch_rx) = Supervisor::new(
        config,
        StoreClient::new(store),
        runtime,
        token.clone(),
    );

    supervisor.run(watch_rx).await.context("supervisor error")?;

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
