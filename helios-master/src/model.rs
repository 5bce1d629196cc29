//! Master model
//!
//! Business logic behind the RPC surface. The model owns every write under
//! `/jobs`, `/jobrefs` and `/config`; agents own `/status` and `/history`.
//! Mutations are store transactions so concurrent operators cannot leave
//! partial state behind. Reads go through the retrying store client;
//! writes are issued exactly once.

use std::collections::BTreeMap;

use helios_core::descriptors::{
    Deployment, Goal, HostState, HostStatus, Job, JobId, TaskStatus, TaskStatusEvent,
};
use helios_core::paths;
use helios_store::{StoreClient, StoreError, StoreOp};
use thiserror::Error;
use tracing::info;

use crate::config::MasterConfig;

/// Errors surfaced by master operations.
#[derive(Debug, Error)]
pub enum MasterError {
    #[error("job already exists: {0}")]
    JobExists(JobId),

    #[error("invalid job: {0}")]
    InvalidJob(String),

    #[error("job not found: {0}")]
    JobNotFound(JobId),

    #[error("job is still deployed: {0}")]
    JobStillDeployed(JobId),

    #[error("host not found: {0}")]
    HostNotFound(String),

    #[error("host not registered: {0}")]
    HostNotRegistered(String),

    #[error("job {job} already deployed on {host}")]
    AlreadyDeployed { job: JobId, host: String },

    #[error("job {job} is not deployed on {host}")]
    DeploymentNotFound { job: JobId, host: String },

    #[error(transparent)]
    Store(#[from] StoreError),
}

/// The master's view of the coordination store.
#[derive(Clone)]
pub struct MasterModel {
    store: StoreClient,
    config: MasterConfig,
}

impl MasterModel {
    pub fn new(store: StoreClient, config: MasterConfig) -> Self {
        Self { store, config }
    }

    /// Creates the top-level tree the master and agents hang state off.
    pub async fn bootstrap(&self) -> Result<(), MasterError> {
        for base in [
            paths::JOBS,
            paths::JOB_REFS,
            paths::CONFIG_HOSTS,
            paths::STATUS_HOSTS,
            paths::HISTORY_JOBS,
        ] {
            self.store.ensure_path(base).await?;
        }
        Ok(())
    }

    /// Validates a submitted job, derives its id from the config, and
    /// stores it. Re-submitting an identical job is a no-op success.
    pub async fn create_job(&self, submitted: Job) -> Result<JobId, MasterError> {
        let id = submitted
            .rebuild_id()
            .map_err(|e| MasterError::InvalidJob(e.to_string()))?;

        // Clients may precompute the hash; a mismatch means the config was
        // altered after hashing and the submission cannot be trusted.
        if let Some(hash) = submitted.id.hash() {
            if Some(hash) != id.hash() {
                return Err(MasterError::InvalidJob(format!(
                    "submitted hash {hash} does not match config hash {}",
                    id.hash().unwrap_or_default()
                )));
            }
        }

        // Stored form always carries the derived id, whatever the client
        // put in the id field.
        let canonical = Job {
            id: id.clone(),
            ..submitted
        };
        let bytes = helios_store::client::encode(&canonical)?;
        let result = self
            .store
            .transaction(vec![
                StoreOp::create(paths::job(&id), bytes.clone()),
                StoreOp::create(paths::job_refs(&id), Vec::new()),
            ])
            .await;

        match result {
            Ok(()) => {
                info!(job = %id, "job created");
                Ok(id)
            }
            Err(StoreError::Exists(_)) => {
                // Ids are content-derived, so an existing node with the
                // same bytes is the same job.
                let (existing, _) = self.store.get(&paths::job(&id)).await?;
                if existing == bytes {
                    Ok(id)
                } else {
                    Err(MasterError::JobExists(id))
                }
            }
            Err(err) => Err(err.into()),
        }
    }

    pub async fn get_job(&self, id: &JobId) -> Result<Job, MasterError> {
        self.store
            .get_json(&paths::job(id))
            .await?
            .ok_or_else(|| MasterError::JobNotFound(id.clone()))
    }

    /// Lists stored jobs, optionally filtered by an id substring.
    pub async fn list_jobs(
        &self,
        pattern: Option<&str>,
    ) -> Result<BTreeMap<JobId, Job>, MasterError> {
        let mut jobs = BTreeMap::new();
        for child in self.store.children_or_empty(paths::JOBS).await? {
            if let Some(pattern) = pattern {
                if !child.contains(pattern) {
                    continue;
                }
            }
            let Ok(id) = JobId::parse(&child) else {
                continue;
            };
            if let Some(job) = self.store.get_json::<Job>(&paths::job(&id)).await? {
                jobs.insert(id, job);
            }
        }
        Ok(jobs)
    }

    /// Removes a job that no host deploys any more.
    pub async fn remove_job(&self, id: &JobId) -> Result<(), MasterError> {
        self.get_job(id).await?;
        if !self.store.children_or_empty(&paths::job_refs(id)).await?.is_empty() {
            return Err(MasterError::JobStillDeployed(id.clone()));
        }
        // A concurrent deploy adds a child under the refs node between the
        // check above and this transaction; the non-empty delete then fails
        // with Exists and keeps the removal atomic.
        let result = self
            .store
            .transaction(vec![
                StoreOp::delete(paths::job_refs(id)),
                StoreOp::delete(paths::job(id)),
            ])
            .await;
        match result {
            Ok(()) => {
                info!(job = %id, "job removed");
                Ok(())
            }
            Err(StoreError::Exists(_)) => Err(MasterError::JobStillDeployed(id.clone())),
            Err(StoreError::NotFound(_)) => Err(MasterError::JobNotFound(id.clone())),
            Err(err) => Err(err.into()),
        }
    }

    /// Writes a deployment for a job on a host.
    pub async fn deploy(&self, id: &JobId, host: &str, goal: Goal) -> Result<(), MasterError> {
        if !id.is_fully_qualified() {
            return Err(MasterError::InvalidJob(format!(
                "job id must be fully qualified: {id}"
            )));
        }
        if goal == Goal::Undeploy {
            return Err(MasterError::InvalidJob(
                "cannot deploy with goal UNDEPLOY".to_string(),
            ));
        }
        self.get_job(id).await?;

        if !self.store.exists(&paths::status_host(host)).await?
            && !self.config.allow_unregistered_hosts
        {
            return Err(MasterError::HostNotRegistered(host.to_string()));
        }
        // For an unregistered host this lays down the config skeleton the
        // agent will find when it first comes up.
        self.store.ensure_path(&paths::config_host_jobs(host)).await?;

        let deployment = Deployment::new(id.clone(), goal);
        let result = self
            .store
            .transaction(vec![
                StoreOp::check(paths::job(id)),
                StoreOp::create(
                    paths::config_host_job(host, id),
                    helios_store::client::encode(&deployment)?,
                ),
                StoreOp::create(paths::job_ref(id, host), Vec::new()),
            ])
            .await;

        match result {
            Ok(()) => {
                info!(job = %id, host, %goal, "job deployed");
                Ok(())
            }
            Err(StoreError::Exists(_)) => Err(MasterError::AlreadyDeployed {
                job: id.clone(),
                host: host.to_string(),
            }),
            Err(StoreError::NotFound(path))
                if path == paths::job(id) || path == paths::job_refs(id) =>
            {
                Err(MasterError::JobNotFound(id.clone()))
            }
            Err(StoreError::NotFound(_)) => Err(MasterError::HostNotFound(host.to_string())),
            Err(err) => Err(err.into()),
        }
    }

    /// Changes the goal of an existing deployment. `UNDEPLOY` removes it.
    pub async fn set_goal(&self, id: &JobId, host: &str, goal: Goal) -> Result<(), MasterError> {
        if goal == Goal::Undeploy {
            return self.undeploy(id, host).await;
        }
        self.get_job(id).await?;
        let path = paths::config_host_job(host, id);
        if !self.store.exists(&path).await? {
            return Err(MasterError::DeploymentNotFound {
                job: id.clone(),
                host: host.to_string(),
            });
        }
        let deployment = Deployment::new(id.clone(), goal);
        self.store.set_json(&path, &deployment).await?;
        info!(job = %id, host, %goal, "deployment goal updated");
        Ok(())
    }

    /// Removes the deployment; the agent garbage-collects the task.
    pub async fn undeploy(&self, id: &JobId, host: &str) -> Result<(), MasterError> {
        let result = self
            .store
            .transaction(vec![
                StoreOp::delete(paths::config_host_job(host, id)),
                StoreOp::delete(paths::job_ref(id, host)),
            ])
            .await;
        match result {
            Ok(()) => {
                info!(job = %id, host, "job undeployed");
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(MasterError::DeploymentNotFound {
                job: id.clone(),
                host: host.to_string(),
            }),
            Err(err) => Err(err.into()),
        }
    }

    /// Hosts that have registered with the cluster.
    pub async fn list_hosts(&self) -> Result<Vec<String>, MasterError> {
        Ok(self.store.children_or_empty(paths::STATUS_HOSTS).await?)
    }

    /// Aggregate view of one host: liveness, info, desired deployments and
    /// observed task statuses.
    pub async fn host_status(&self, host: &str) -> Result<HostStatus, MasterError> {
        let registered = self.store.exists(&paths::status_host(host)).await?
            || self.store.exists(&paths::config_host(host)).await?;
        if !registered {
            return Err(MasterError::HostNotFound(host.to_string()));
        }

        let status = if self.store.exists(&paths::status_host_up(host)).await? {
            HostState::Up
        } else {
            HostState::Down
        };

        let host_info: Option<helios_core::descriptors::HostInfo> =
            self.store.get_json(&paths::status_host_info(host)).await?;

        let mut jobs = BTreeMap::new();
        for child in self
            .store
            .children_or_empty(&paths::config_host_jobs(host))
            .await?
        {
            let Ok(id) = JobId::parse(&child) else {
                continue;
            };
            if let Some(deployment) = self
                .store
                .get_json::<Deployment>(&paths::config_host_job(host, &id))
                .await?
            {
                jobs.insert(id, deployment);
            }
        }

        let mut statuses = BTreeMap::new();
        for child in self
            .store
            .children_or_empty(&paths::status_host_jobs(host))
            .await?
        {
            let Ok(id) = JobId::parse(&child) else {
                continue;
            };
            if let Some(task) = self
                .store
                .get_json::<TaskStatus>(&paths::status_host_job(host, &id))
                .await?
            {
                statuses.insert(id, task);
            }
        }

        let (agent_info, runtime_info, environment) = match host_info {
            Some(info) => (Some(info.agent), Some(info.runtime), info.environment),
            None => (None, None, BTreeMap::new()),
        };

        Ok(HostStatus {
            status,
            agent_info,
            runtime_info,
            jobs,
            statuses,
            environment,
        })
    }

    /// Full history trail for a job across all hosts, ordered by timestamp.
    pub async fn job_history(&self, id: &JobId) -> Result<Vec<TaskStatusEvent>, MasterError> {
        self.get_job(id).await?;
        let mut events = Vec::new();
        for host in self
            .store
            .children_or_empty(&paths::history_job_hosts(id))
            .await?
        {
            let events_path = paths::history_events(id, &host);
            for seq in self.store.children_or_empty(&events_path).await? {
                if let Some(event) = self
                    .store
                    .get_json::<TaskStatusEvent>(&format!("{events_path}/{seq}"))
                    .await?
                {
                    events.push(event);
                }
            }
        }
        events.sort_by_key(|event| event.timestamp);
        Ok(events)
    }
}
