//! Descriptor model
//!
//! Immutable records describing jobs, deployments and observed state. These
//! are shared between the master (which persists desired state), the agent
//! (which publishes observed state) and the client.

pub mod deployment;
pub mod host;
pub mod job;
pub mod job_id;
pub mod task;

pub use deployment::{Deployment, Goal};
pub use host::{AgentInfo, HostInfo, HostState, HostStatus, RuntimeInfo};
pub use job::{Job, JobBuilder, JobValidationError, PortMapping, Protocol};
pub use job_id::{JobId, JobIdParseError};
pub use task::{TaskState, TaskStatus, TaskStatusEvent, ThrottleState};
