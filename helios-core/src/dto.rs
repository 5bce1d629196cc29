//! Request and response bodies for the master RPC surface
//!
//! Lightweight wire shapes shared by the master's HTTP layer and the typed
//! client. Descriptors themselves travel as-is; only the envelopes live
//! here.

use serde::{Deserialize, Serialize};

use crate::descriptors::{Goal, JobId};

/// Response to a successful job creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateJobResponse {
    pub id: JobId,
}

/// Body of deploy and set-goal requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployRequest {
    pub goal: Goal,
}

/// Query parameters for job listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListJobsQuery {
    /// Substring match against the full job id string.
    pub pattern: Option<String>,
}

/// Error body returned by the master for every failed request.
///
/// `kind` is a stable machine-readable tag; `error` is for humans.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    pub kind: String,
    pub error: String,
}
