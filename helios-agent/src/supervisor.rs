//! Agent supervisor
//!
//! Owns the host's slice of desired state: watches
//! `/config/hosts/<self>/jobs`, diffs it against the running task runners,
//! and spawns, re-goals or garbage-collects runners to close the gap. Also
//! holds host registration and the port allocation map.
//!
//! Watches are edge triggers delivered at least once, so every event (and
//! a periodic backstop tick) re-reads the full desired set instead of
//! trusting the event payload.

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use helios_core::descriptors::{Deployment, Goal, Job, JobId};
use helios_core::paths;
use helios_store::{SessionEvent, StoreClient, StoreError, WatchEvent, WatchKind};
use tokio::sync::{broadcast, mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::AgentConfig;
use crate::ports::PortAllocator;
use crate::registrar;
use crate::runtime::ContainerRuntime;
use crate::task_runner::TaskRunner;

struct RunnerHandle {
    goal_tx: watch::Sender<Goal>,
    join: JoinHandle<()>,
}

/// Funnels any number of store watches into one event stream.
///
/// The supervisor watches the children of its jobs directory plus the data
/// of every deployment node it has seen (a goal change touches only the
/// node's data, which a children watch does not observe).
struct WatchSet {
    store: StoreClient,
    tx: mpsc::UnboundedSender<WatchEvent>,
    watched: HashSet<(String, WatchKind)>,
}

impl WatchSet {
    fn new(store: StoreClient) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                store,
                tx,
                watched: HashSet::new(),
            },
            rx,
        )
    }

    /// Registers a watch once per (path, kind) and forwards its events.
    async fn ensure(&mut self, path: &str, kind: WatchKind) -> Result<(), StoreError> {
        if !self.watched.insert((path.to_string(), kind)) {
            return Ok(());
        }
        let mut events = self.store.watch(path, kind).await?;
        let tx = self.tx.clone();
        tokio::spawn(async move {
            while let Some(event) = events.recv().await {
                if tx.send(event).is_err() {
                    break;
                }
            }
        });
        Ok(())
    }
}

/// Reconciles desired deployments against running task runners.
pub struct Supervisor {
    config: AgentConfig,
    store: StoreClient,
    runtime: Arc<dyn ContainerRuntime>,
    runners: HashMap<JobId, RunnerHandle>,
    ports: PortAllocator,
    watches: WatchSet,
    shutdown: CancellationToken,
}

impl Supervisor {
    pub fn new(
        config: AgentConfig,
        store: StoreClient,
        runtime: Arc<dyn ContainerRuntime>,
        shutdown: CancellationToken,
    ) -> (Self, mpsc::UnboundedReceiver<WatchEvent>) {
        let ports = PortAllocator::new(config.port_range.clone());
        let (watches, watch_rx) = WatchSet::new(store.clone());
        (
            Self {
                config,
                store,
                runtime,
                runners: HashMap::new(),
                ports,
                watches,
                shutdown,
            },
            watch_rx,
        )
    }

    /// Registers the host and runs the reconcile loop until shutdown.
    pub async fn run(
        mut self,
        mut watch_rx: mpsc::UnboundedReceiver<WatchEvent>,
    ) -> Result<()> {
        self.register().await.context("initial host registration failed")?;

        let jobs_path = paths::config_host_jobs(&self.config.name);
        self.watches
            .ensure(&jobs_path, WatchKind::Children)
            .await
            .context("failed to watch desired deployments")?;
        let mut session_rx = self.store.session_events();
        let mut tick = tokio::time::interval(self.config.reconcile_interval);
        tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let shutdown = self.shutdown.clone();

        self.reconcile().await;

        loop {
            tokio::select! {
                Some(_) = watch_rx.recv() => {
                    debug!("desired deployments changed");
                    self.reconcile().await;
                }
                event = session_rx.recv() => self.handle_session_event(event).await,
                _ = tick.tick() => self.reconcile().await,
                _ = shutdown.cancelled() => break,
            }
        }

        self.drain().await;
        Ok(())
    }

    async fn register(&self) -> Result<(), StoreError> {
        let runtime_info = match self.runtime.info().await {
            Ok(info) => info,
            Err(err) => {
                return Err(StoreError::Transient(format!(
                    "container runtime unavailable: {err}"
                )))
            }
        };
        let info = registrar::host_info(
            runtime_info,
            self.config.environment.clone(),
            Utc::now(),
        );
        registrar::register_host(&self.store, &self.config.name, &info).await
    }

    async fn handle_session_event(
        &mut self,
        event: Result<SessionEvent, broadcast::error::RecvError>,
    ) {
        match event {
            Ok(SessionEvent::Lost) => {
                warn!("coordination session lost, awaiting re-establishment");
            }
            Ok(SessionEvent::Reestablished) | Err(broadcast::error::RecvError::Lagged(_)) => {
                // Either a fresh session or an event storm we fell behind
                // on; both are handled the same idempotent way: re-register
                // and re-read everything.
                info!("session re-established, re-registering host");
                if let Err(err) = self.register().await {
                    warn!(error = %err, "re-registration failed, next tick retries");
                }
                self.reconcile().await;
            }
            Err(broadcast::error::RecvError::Closed) => {}
        }
    }

    /// One reconcile pass: reap finished runners, then line the runner map
    /// up with the desired deployment set.
    async fn reconcile(&mut self) {
        self.reap_finished();

        let desired = match self.read_desired().await {
            Ok(desired) => desired,
            Err(err) => {
                warn!(error = %err, "failed to read desired deployments");
                return;
            }
        };

        for (id, deployment) in &desired {
            // Goal changes only touch the deployment node's data, which the
            // children watch does not observe.
            let node_path = paths::config_host_job(&self.config.name, id);
            if let Err(err) = self.watches.ensure(&node_path, WatchKind::Data).await {
                warn!(job = %id, error = %err, "failed to watch deployment node");
            }
            match self.runners.get(id) {
                Some(handle) => {
                    if *handle.goal_tx.borrow() != deployment.goal {
                        debug!(job = %id, goal = %deployment.goal, "forwarding goal");
                        let _ = handle.goal_tx.send(deployment.goal);
                    }
                }
                None => self.spawn_runner(id, deployment.goal).await,
            }
        }

        for (id, handle) in &self.runners {
            if !desired.contains_key(id) && *handle.goal_tx.borrow() != Goal::Undeploy {
                info!(job = %id, "deployment removed, undeploying task");
                let _ = handle.goal_tx.send(Goal::Undeploy);
            }
        }
    }

    async fn read_desired(&self) -> Result<BTreeMap<JobId, Deployment>, StoreError> {
        let jobs_path = paths::config_host_jobs(&self.config.name);
        let mut desired = BTreeMap::new();
        for child in self.store.children_or_empty(&jobs_path).await? {
            let Ok(id) = JobId::parse(&child) else {
                warn!(node = %child, "skipping unparseable deployment node");
                continue;
            };
            if let Some(deployment) = self
                .store
                .get_json::<Deployment>(&format!("{jobs_path}/{child}"))
                .await?
            {
                desired.insert(id, deployment);
            }
        }
        Ok(desired)
    }

    async fn spawn_runner(&mut self, id: &JobId, goal: Goal) {
        let job: Job = match self.store.get_json(&paths::job(id)).await {
            Ok(Some(job)) => job,
            Ok(None) => {
                warn!(job = %id, "deployment references a missing job");
                return;
            }
            Err(err) => {
                warn!(job = %id, error = %err, "failed to read job");
                return;
            }
        };

        let resolved_ports = match self.ports.allocate(id, &job.ports) {
            Ok(ports) => ports,
            Err(err) => {
                // Ports may free up when another task is undeployed; the
                // next reconcile pass retries.
                error!(job = %id, error = %err, "port allocation failed");
                return;
            }
        };

        info!(job = %id, %goal, "spawning task runner");
        let (goal_tx, join) = TaskRunner::spawn(
            job,
            resolved_ports,
            Arc::clone(&self.runtime),
            self.store.clone(),
            self.config.runner_config(),
            goal,
            self.shutdown.child_token(),
        );
        self.runners.insert(id.clone(), RunnerHandle { goal_tx, join });
    }

    fn reap_finished(&mut self) {
        let finished: Vec<JobId> = self
            .runners
            .iter()
            .filter(|(_, handle)| handle.join.is_finished())
            .map(|(id, _)| id.clone())
            .collect();
        for id in finished {
            debug!(job = %id, "reaping finished runner");
            self.runners.remove(&id);
            self.ports.release(&id);
        }
    }

    /// Clean shutdown: drop liveness first so observers see DOWN, then
    /// give runners a bounded window to wind down. Containers keep
    /// running; the next agent incarnation adopts them.
    async fn drain(&mut self) {
        if let Err(err) = registrar::deregister_host(&self.store, &self.config.name).await {
            warn!(error = %err, "failed to deregister host");
        }
        for (id, handle) in self.runners.drain() {
            if tokio::time::timeout(Duration::from_secs(5), handle.join)
                .await
                .is_err()
            {
                warn!(job = %id, "runner did not wind down in time");
            }
        }
        info!("agent drained");
    }
}
