//! Container runtime interface
//!
//! The runtime daemon is an external collaborator; the agent drives it
//! through this trait. The production driver shells out to the `docker`
//! CLI; tests use the scripted in-memory runtime.

pub mod docker;
pub mod fake;

use std::collections::BTreeMap;
use std::time::Duration;

use async_trait::async_trait;
use helios_core::descriptors::{Protocol, RuntimeInfo};
use thiserror::Error;

pub use docker::DockerCli;
pub use fake::FakeRuntime;

/// Container label carrying the owning job id.
pub const JOB_ID_LABEL: &str = "helios.job.id";

/// Container label carrying `<host>:<jobId>`, used to adopt running
/// containers after an agent restart. Host-qualified so agents sharing a
/// daemon never adopt each other's tasks.
pub const TASK_LABEL: &str = "helios.task";

/// Errors surfaced by the container runtime.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// The image does not exist in the registry; retrying cannot help.
    #[error("image not found: {0}")]
    ImageNotFound(String),

    #[error("container not found: {0}")]
    ContainerNotFound(String),

    /// Daemon or registry hiccup; safe to retry with backoff.
    #[error("transient runtime failure: {0}")]
    Transient(String),

    #[error("runtime failure: {0}")]
    Other(String),
}

impl RuntimeError {
    pub fn is_transient(&self) -> bool {
        matches!(self, RuntimeError::Transient(_))
    }
}

pub type Result<T> = std::result::Result<T, RuntimeError>;

/// Host-side port binding handed to the runtime at container creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortBinding {
    pub internal: u16,
    pub external: u16,
    pub protocol: Protocol,
}

/// Everything needed to create a container for a task.
#[derive(Debug, Clone)]
pub struct ContainerConfig {
    pub name: String,
    pub image: String,
    pub command: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub port_bindings: Vec<PortBinding>,
    pub labels: BTreeMap<String, String>,
}

/// Observed state of one container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContainerState {
    pub id: String,
    pub running: bool,
    pub exit_code: Option<i64>,
}

/// Narrow contract over the container runtime daemon.
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Name and version of the daemon, for host info publication.
    async fn info(&self) -> Result<RuntimeInfo>;

    /// Whether the image is available locally.
    async fn image_present(&self, image: &str) -> Result<bool>;

    /// Pulls the image from its registry.
    async fn pull_image(&self, image: &str) -> Result<()>;

    /// Creates a container and returns its id. Does not start it.
    async fn create_container(&self, config: &ContainerConfig) -> Result<String>;

    async fn start_container(&self, id: &str) -> Result<()>;

    /// Signals the container and waits up to `timeout` before killing it.
    async fn stop_container(&self, id: &str, timeout: Duration) -> Result<()>;

    async fn remove_container(&self, id: &str) -> Result<()>;

    /// Blocks until the container exits; returns the exit code.
    async fn wait_container(&self, id: &str) -> Result<i64>;

    /// Observed state, or `None` if the container does not exist.
    async fn inspect_container(&self, id: &str) -> Result<Option<ContainerState>>;

    /// Finds a container carrying the given label, running or not.
    async fn find_labeled(&self, key: &str, value: &str) -> Result<Option<ContainerState>>;
}
