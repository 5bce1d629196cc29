//! System test harness
//!
//! Wires a real master model and real agent supervisors against one shared
//! in-process coordination store and a scripted container runtime, so the
//! full control loop (RPC write -> store -> agent watch -> task runner ->
//! status/history readback) runs exactly as in production, minus the
//! external daemons.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use helios_agent::config::AgentConfig;
use helios_agent::runtime::FakeRuntime;
use helios_agent::supervisor::Supervisor;
use helios_core::descriptors::{HostState, Job, JobId, TaskState, TaskStatus};
use helios_master::config::MasterConfig;
use helios_master::model::MasterModel;
use helios_store::{MemoryStore, StoreClient};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

pub struct AgentHandle {
    pub host: String,
    token: CancellationToken,
    join: JoinHandle<anyhow::Result<()>>,
}

/// One in-process Helios cluster: a master model, a shared store, a
/// scripted runtime, and any number of agents.
pub struct TestCluster {
    pub store: Arc<MemoryStore>,
    pub model: Arc<MasterModel>,
    pub runtime: Arc<FakeRuntime>,
    agents: Vec<AgentHandle>,
}

impl TestCluster {
    pub async fn new() -> Self {
        let store = MemoryStore::new();
        let model = Arc::new(MasterModel::new(
            StoreClient::new(store.clone()),
            MasterConfig::default(),
        ));
        model.bootstrap().await.expect("bootstrap failed");
        Self {
            store,
            model,
            runtime: FakeRuntime::new(),
            agents: Vec::new(),
        }
    }

    /// Agent configuration tuned for tests: fast reconcile and pull
    /// retries, but a long restart backoff so an exited task stays down
    /// while assertions run.
    pub fn agent_config(host: &str) -> AgentConfig {
        let mut config = AgentConfig::default();
        config.name = host.to_string();
        config.port_range = 20000..=20020;
        config.reconcile_interval = Duration::from_millis(100);
        config.pull_backoff_base = Duration::from_millis(10);
        config.pull_backoff_max = Duration::from_millis(40);
        config.restart_backoff_base = Duration::from_secs(60);
        config.restart_backoff_max = Duration::from_secs(60);
        config
    }

    pub async fn start_agent(&mut self, host: &str) {
        self.start_agent_with(Self::agent_config(host)).await;
    }

    pub async fn start_agent_with(&mut self, config: AgentConfig) {
        let host = config.name.clone();
        let token = CancellationToken::new();
        let (supervisor, watch_rx) = Supervisor::new(
            config,
            StoreClient::new(self.store.clone()),
            self.runtime.clone(),
            token.clone(),
        );
        let join = tokio::spawn(supervisor.run(watch_rx));
        self.agents.push(AgentHandle {
            host: host.clone(),
            token,
            join,
        });
        self.await_host_state(&host, HostState::Up).await;
    }

    /// Cleanly shuts one agent down (removing its liveness node).
    pub async fn stop_agent(&mut self, host: &str) {
        if let Some(pos) = self.agents.iter().position(|a| a.host == host) {
            let agent = self.agents.remove(pos);
            agent.token.cancel();
            let _ = tokio::time::timeout(Duration::from_secs(5), agent.join).await;
        }
    }

    pub async fn await_host_state(&self, host: &str, state: HostState) {
        poll_until(Duration::from_secs(5), || async {
            match self.model.host_status(host).await {
                Ok(status) if status.status == state => Some(()),
                _ => None,
            }
        })
        .await
        .unwrap_or_else(|| panic!("host {host} never reached {state:?}"));
    }

    pub async fn await_task_state(&self, host: &str, id: &JobId, state: TaskState) -> TaskStatus {
        poll_until(Duration::from_secs(5), || async {
            let status = self.model.host_status(host).await.ok()?;
            status.statuses.get(id).filter(|s| s.state == state).cloned()
        })
        .await
        .unwrap_or_else(|| panic!("task {id} on {host} never reached {state}"))
    }
}

/// Polls `f` until it yields a value or the timeout elapses.
pub async fn poll_until<T, F, Fut>(timeout: Duration, mut f: F) -> Option<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let deadline = tokio::time::Instant::now() + timeout;
    loop {
        if let Some(value) = f().await {
            return Some(value);
        }
        if tokio::time::Instant::now() >= deadline {
            return None;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// A long-running service job.
pub fn service_job(name: &str) -> Job {
    Job::builder()
        .name(name)
        .version("1")
        .image(format!("{name}:latest"))
        .command(["serve"])
        .build()
        .unwrap()
}
