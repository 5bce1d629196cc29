//! Task status descriptors
//!
//! A task is the running incarnation of a deployment on one host. The agent
//! publishes a `TaskStatus` for every state transition and appends a
//! matching `TaskStatusEvent` to the job's history trail.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::job::{Job, PortMapping};

/// Lifecycle state of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskState {
    Creating,
    PullingImage,
    Starting,
    Running,
    Exited,
    Stopping,
    Stopped,
    Failed,
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskState::Creating => "CREATING",
            TaskState::PullingImage => "PULLING_IMAGE",
            TaskState::Starting => "STARTING",
            TaskState::Running => "RUNNING",
            TaskState::Exited => "EXITED",
            TaskState::Stopping => "STOPPING",
            TaskState::Stopped => "STOPPED",
            TaskState::Failed => "FAILED",
        };
        f.write_str(s)
    }
}

/// Why a task is currently being held back, if it is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ThrottleState {
    #[default]
    No,
    Flapping,
    ImageMissing,
    ImagePullFailed,
}

/// Status of a task as observed by its agent, published at
/// `/status/hosts/<host>/jobs/<jobId>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatus {
    pub state: TaskState,
    pub container_id: Option<String>,
    #[serde(default)]
    pub throttled: ThrottleState,
    #[serde(default)]
    pub ports: BTreeMap<String, PortMapping>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub exit_code: Option<i64>,
    pub job: Job,
}

/// One entry in a job's per-host history trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskStatusEvent {
    pub status: TaskStatus,
    pub timestamp: DateTime<Utc>,
    pub host: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_state_wire_format() {
        assert_eq!(
            serde_json::to_string(&TaskState::PullingImage).unwrap(),
            "\"PULLING_IMAGE\""
        );
        let state: TaskState = serde_json::from_str("\"RUNNING\"").unwrap();
        assert_eq!(state, TaskState::Running);
        assert_eq!(TaskState::PullingImage.to_string(), "PULLING_IMAGE");
    }

    #[test]
    fn test_throttle_state_defaults_to_no() {
        assert_eq!(ThrottleState::default(), ThrottleState::No);
        assert_eq!(
            serde_json::to_string(&ThrottleState::ImageMissing).unwrap(),
            "\"IMAGE_MISSING\""
        );
    }
}
