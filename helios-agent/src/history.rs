//! Task history trail
//!
//! Appends one event per state transition under
//! `/history/jobs/<jobId>/hosts/<host>/events/<seq>` and prunes the trail
//! to a bounded retention. Sequence numbers are seeded from whatever is
//! already in the store so a restarted agent continues the trail instead
//! of overwriting it.

use helios_core::descriptors::{JobId, TaskStatusEvent};
use helios_core::paths;
use helios_store::{StoreClient, StoreError};
use tracing::debug;

/// Writer for one (job, host) history trail.
pub struct TaskHistoryWriter {
    store: StoreClient,
    job: JobId,
    host: String,
    next_seq: u64,
    retention: usize,
}

impl TaskHistoryWriter {
    /// Opens the trail, creating its path skeleton and seeding the next
    /// sequence number past any existing events.
    pub async fn open(
        store: StoreClient,
        job: JobId,
        host: String,
        retention: usize,
    ) -> Result<Self, StoreError> {
        let events_path = paths::history_events(&job, &host);
        store.ensure_path(&events_path).await?;
        let next_seq = store
            .children(&events_path)
            .await?
            .iter()
            .filter_map(|name| name.parse::<u64>().ok())
            .max()
            .map(|seq| seq + 1)
            .unwrap_or(0);
        Ok(Self {
            store,
            job,
            host,
            next_seq,
            retention,
        })
    }

    /// Appends an event and prunes the oldest entries beyond retention.
    pub async fn append(&mut self, event: &TaskStatusEvent) -> Result<(), StoreError> {
        let path = paths::history_event(&self.job, &self.host, self.next_seq);
        self.store.create_json(&path, event).await?;
        self.next_seq += 1;
        self.prune().await
    }

    async fn prune(&self) -> Result<(), StoreError> {
        let events_path = paths::history_events(&self.job, &self.host);
        let children = self.store.children(&events_path).await?;
        if children.len() <= self.retention {
            return Ok(());
        }
        let excess = children.len() - self.retention;
        // Children are returned sorted, and the zero-padded sequence makes
        // lexicographic order chronological.
        for name in children.iter().take(excess) {
            self.store
                .delete_if_exists(&format!("{events_path}/{name}"))
                .await?;
            debug!(job = %self.job, host = self.host, event = %name, "pruned history event");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;
    use helios_core::descriptors::{Job, TaskState, TaskStatus, ThrottleState};
    use helios_store::MemoryStore;

    use super::*;

    fn sample_event(job: &Job, state: TaskState) -> TaskStatusEvent {
        TaskStatusEvent {
            status: TaskStatus {
                state,
                container_id: None,
                throttled: ThrottleState::No,
                ports: Default::default(),
                env: Default::default(),
                exit_code: None,
                job: job.clone(),
            },
            timestamp: Utc::now(),
            host: "h1".to_string(),
        }
    }

    fn sample_job() -> Job {
        Job::builder()
            .name("web")
            .version("1")
            .image("nginx:1.25")
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn test_append_assigns_increasing_sequences() {
        let store = StoreClient::new(MemoryStore::new());
        let job = sample_job();
        let mut writer =
            TaskHistoryWriter::open(store.clone(), job.id.clone(), "h1".to_string(), 30)
                .await
                .unwrap();

        writer.append(&sample_event(&job, TaskState::Creating)).await.unwrap();
        writer.append(&sample_event(&job, TaskState::Starting)).await.unwrap();

        let events_path = paths::history_events(&job.id, "h1");
        let children = store.children(&events_path).await.unwrap();
        assert_eq!(children, vec!["0000000000", "0000000001"]);
    }

    #[tokio::test]
    async fn test_reopen_continues_after_existing_events() {
        let store = StoreClient::new(MemoryStore::new());
        let job = sample_job();
        let mut writer =
            TaskHistoryWriter::open(store.clone(), job.id.clone(), "h1".to_string(), 30)
                .await
                .unwrap();
        writer.append(&sample_event(&job, TaskState::Creating)).await.unwrap();

        let mut reopened =
            TaskHistoryWriter::open(store.clone(), job.id.clone(), "h1".to_string(), 30)
                .await
                .unwrap();
        reopened.append(&sample_event(&job, TaskState::Starting)).await.unwrap();

        let events_path = paths::history_events(&job.id, "h1");
        let children = store.children(&events_path).await.unwrap();
        assert_eq!(children.len(), 2);
        assert_eq!(children[1], "0000000001");
    }

    #[tokio::test]
    async fn test_retention_prunes_oldest() {
        let store = StoreClient::new(MemoryStore::new());
        let job = sample_job();
        let mut writer =
            TaskHistoryWriter::open(store.clone(), job.id.clone(), "h1".to_string(), 3)
                .await
                .unwrap();

        for _ in 0..5 {
            writer.append(&sample_event(&job, TaskState::Running)).await.unwrap();
        }

        let events_path = paths::history_events(&job.id, "h1");
        let children = store.children(&events_path).await.unwrap();
        assert_eq!(children, vec!["0000000002", "0000000003", "0000000004"]);
    }
}
