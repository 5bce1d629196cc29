//! Coordination store layout
//!
//! The authoritative tree:
//!
//! ```text
//! /jobs/<jobId>                        Job JSON
//! /jobrefs/<jobId>/<host>              marker, backs the "still deployed" check
//! /config/hosts/<host>/jobs/<jobId>    Deployment JSON
//! /status/hosts/<host>/up              ephemeral, presence = UP
//! /status/hosts/<host>/info            HostInfo JSON
//! /status/hosts/<host>/jobs/<jobId>    TaskStatus JSON
//! /history/jobs/<jobId>/hosts/<host>/events/<seq>   TaskStatusEvent JSON
//! ```
//!
//! The master writes under `/jobs`, `/jobrefs` and `/config`; each agent
//! writes only under its own `/status/hosts/<host>` and history subtrees.

use crate::descriptors::JobId;

pub const JOBS: &str = "/jobs";
pub const JOB_REFS: &str = "/jobrefs";
pub const CONFIG_HOSTS: &str = "/config/hosts";
pub const STATUS_HOSTS: &str = "/status/hosts";
pub const HISTORY_JOBS: &str = "/history/jobs";

/// Width of a zero-padded history sequence number. Padding keeps the
/// lexicographic child ordering equal to the numeric one.
pub const HISTORY_SEQ_WIDTH: usize = 10;

pub fn job(id: &JobId) -> String {
    format!("{JOBS}/{id}")
}

pub fn job_refs(id: &JobId) -> String {
    format!("{JOB_REFS}/{id}")
}

pub fn job_ref(id: &JobId, host: &str) -> String {
    format!("{JOB_REFS}/{id}/{host}")
}

pub fn config_host(host: &str) -> String {
    format!("{CONFIG_HOSTS}/{host}")
}

pub fn config_host_jobs(host: &str) -> String {
    format!("{CONFIG_HOSTS}/{host}/jobs")
}

pub fn config_host_job(host: &str, id: &JobId) -> String {
    format!("{CONFIG_HOSTS}/{host}/jobs/{id}")
}

pub fn status_host(host: &str) -> String {
    format!("{STATUS_HOSTS}/{host}")
}

pub fn status_host_up(host: &str) -> String {
    format!("{STATUS_HOSTS}/{host}/up")
}

pub fn status_host_info(host: &str) -> String {
    format!("{STATUS_HOSTS}/{host}/info")
}

pub fn status_host_jobs(host: &str) -> String {
    format!("{STATUS_HOSTS}/{host}/jobs")
}

pub fn status_host_job(host: &str, id: &JobId) -> String {
    format!("{STATUS_HOSTS}/{host}/jobs/{id}")
}

pub fn history_job_hosts(id: &JobId) -> String {
    format!("{HISTORY_JOBS}/{id}/hosts")
}

pub fn history_events(id: &JobId, host: &str) -> String {
    format!("{HISTORY_JOBS}/{id}/hosts/{host}/events")
}

pub fn history_event(id: &JobId, host: &str, seq: u64) -> String {
    format!(
        "{}/{:0width$}",
        history_events(id, host),
        seq,
        width = HISTORY_SEQ_WIDTH
    )
}
