//! Deployment descriptors

use std::fmt;

use serde::{Deserialize, Serialize};

use super::job_id::JobId;

/// Operator intent for a deployed job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Goal {
    Start,
    Stop,
    Undeploy,
}

impl fmt::Display for Goal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Goal::Start => f.write_str("START"),
            Goal::Stop => f.write_str("STOP"),
            Goal::Undeploy => f.write_str("UNDEPLOY"),
        }
    }
}

/// Desired state of a job on one host.
///
/// Stored under `/config/hosts/<host>/jobs/<jobId>`; the host is implied by
/// the path. The deployment references its job by id only and the job is
/// looked up through the store when needed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Deployment {
    pub job: JobId,
    pub goal: Goal,
}

impl Deployment {
    pub fn new(job: JobId, goal: Goal) -> Self {
        Self { job, goal }
    }
}
