//! Host status descriptors

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::deployment::Deployment;
use super::job_id::JobId;
use super::task::TaskStatus;

/// Host liveness, derived from the presence of the ephemeral `up` node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HostState {
    Up,
    Down,
}

/// Static facts about an agent process.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentInfo {
    pub version: String,
    pub started_at: DateTime<Utc>,
}

/// Static facts about the container runtime behind an agent.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeInfo {
    pub name: String,
    pub version: String,
}

/// Payload of the persistent `/status/hosts/<host>/info` node, published by
/// the agent at startup and refreshed on change.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    pub agent: AgentInfo,
    pub runtime: RuntimeInfo,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}

/// Aggregate view of one host, assembled by the master from the status and
/// config subtrees.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostStatus {
    pub status: HostState,
    pub agent_info: Option<AgentInfo>,
    pub runtime_info: Option<RuntimeInfo>,
    #[serde(default)]
    pub jobs: BTreeMap<JobId, Deployment>,
    #[serde(default)]
    pub statuses: BTreeMap<JobId, TaskStatus>,
    #[serde(default)]
    pub environment: BTreeMap<String, String>,
}
