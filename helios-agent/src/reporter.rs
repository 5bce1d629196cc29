//! Task status publication
//!
//! Pairs the status node under `/status/hosts/<host>/jobs/<jobId>` with the
//! history trail: every transition updates both, reflecting the runtime
//! observation at the moment of write. A transient store failure never
//! fails the task; the next transition or reconcile corrects the node.

use chrono::Utc;
use helios_core::descriptors::{JobId, TaskStatus, TaskStatusEvent};
use helios_core::paths;
use helios_store::{StoreClient, StoreError};
use tracing::warn;

use crate::history::TaskHistoryWriter;

/// Publishes status and history for one (job, host) task.
pub struct StatusReporter {
    store: StoreClient,
    job: JobId,
    host: String,
    history: TaskHistoryWriter,
}

impl StatusReporter {
    pub async fn open(
        store: StoreClient,
        job: JobId,
        host: String,
        retention: usize,
    ) -> Result<Self, StoreError> {
        let history =
            TaskHistoryWriter::open(store.clone(), job.clone(), host.clone(), retention).await?;
        store.ensure_path(&paths::status_host_jobs(&host)).await?;
        Ok(Self {
            store,
            job,
            host,
            history,
        })
    }

    /// Writes the status node and appends the matching history event.
    /// Store failures are recorded and swallowed; the task keeps going.
    pub async fn publish(&mut self, status: TaskStatus) {
        let path = paths::status_host_job(&self.host, &self.job);
        if let Err(err) = self.store.put_json(&path, &status).await {
            warn!(job = %self.job, error = %err, "failed to publish task status");
        }
        let event = TaskStatusEvent {
            status,
            timestamp: Utc::now(),
            host: self.host.clone(),
        };
        if let Err(err) = self.history.append(&event).await {
            warn!(job = %self.job, error = %err, "failed to append history event");
        }
    }

    /// Removes the status node; used when the task is undeployed. History
    /// is left in place.
    pub async fn clear(&self) {
        let path = paths::status_host_job(&self.host, &self.job);
        if let Err(err) = self.store.delete_if_exists(&path).await {
            warn!(job = %self.job, error = %err, "failed to clear task status");
        }
    }
}
