//! Job descriptors and content-addressed ids
//!
//! A `Job` is an immutable container specification. Its identity is derived
//! from the config itself: the persisted fields are serialized to canonical
//! JSON (sorted keys, no insignificant whitespace), hashed with SHA-1, and
//! the result is folded into the `name:version:hash` job id. Two independent
//! builds of the same config therefore always agree on the id.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha1::{Digest, Sha1};
use thiserror::Error;

use super::job_id::{JobId, JobIdParseError};

/// Transport protocol for a port mapping.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    #[default]
    #[serde(rename = "tcp")]
    Tcp,
    #[serde(rename = "udp")]
    Udp,
}

impl fmt::Display for Protocol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Protocol::Tcp => f.write_str("tcp"),
            Protocol::Udp => f.write_str("udp"),
        }
    }
}

/// Mapping from a container port to a host port.
///
/// When `external_port` is absent the agent assigns one from its configured
/// range at deploy time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal_port: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external_port: Option<u16>,
    #[serde(default)]
    pub protocol: Protocol,
}

impl PortMapping {
    /// TCP mapping with a dynamically assigned external port.
    pub fn tcp(internal_port: u16) -> Self {
        Self {
            internal_port,
            external_port: None,
            protocol: Protocol::Tcp,
        }
    }

    /// UDP mapping with a dynamically assigned external port.
    pub fn udp(internal_port: u16) -> Self {
        Self {
            internal_port,
            external_port: None,
            protocol: Protocol::Udp,
        }
    }

    /// Fixes the external port instead of leaving it to the agent.
    pub fn with_external(mut self, external_port: u16) -> Self {
        self.external_port = Some(external_port);
        self
    }
}

/// Immutable container specification.
///
/// Never mutated after construction; build one through [`Job::builder`],
/// which validates the fields and computes the content-derived id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub image: String,
    #[serde(default)]
    pub command: Vec<String>,
    #[serde(default)]
    pub env: BTreeMap<String, String>,
    #[serde(default)]
    pub ports: BTreeMap<String, PortMapping>,
}

impl Job {
    pub fn builder() -> JobBuilder {
        JobBuilder::default()
    }

    pub fn name(&self) -> &str {
        self.id.name()
    }

    pub fn version(&self) -> &str {
        self.id.version().unwrap_or_default()
    }

    /// Recomputes the id from the stored fields.
    ///
    /// Used by the master to reject submissions whose precomputed hash does
    /// not match the config they arrived with.
    pub fn rebuild_id(&self) -> Result<JobId, JobValidationError> {
        Job::builder()
            .name(self.name())
            .version(self.version())
            .image(&self.image)
            .command(self.command.clone())
            .env(self.env.clone())
            .ports(self.ports.clone())
            .build()
            .map(|job| job.id)
    }
}

/// Validation failure while building a job.
#[derive(Debug, Error)]
pub enum JobValidationError {
    #[error("missing job field: {0}")]
    MissingField(&'static str),

    #[error(transparent)]
    InvalidId(#[from] JobIdParseError),

    #[error("image is empty")]
    EmptyImage,

    #[error("invalid port mapping {name}: {reason}")]
    InvalidPort { name: String, reason: String },

    #[error("failed to serialize job config: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Builder for [`Job`]. The id is computed when `build` is called, after
/// all fields are known.
#[derive(Debug, Default)]
pub struct JobBuilder {
    name: Option<String>,
    version: Option<String>,
    image: Option<String>,
    command: Vec<String>,
    env: BTreeMap<String, String>,
    ports: BTreeMap<String, PortMapping>,
}

impl JobBuilder {
    pub fn name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn image(mut self, image: impl Into<String>) -> Self {
        self.image = Some(image.into());
        self
    }

    pub fn command<I, S>(mut self, command: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.command = command.into_iter().map(Into::into).collect();
        self
    }

    pub fn env(mut self, env: BTreeMap<String, String>) -> Self {
        self.env = env;
        self
    }

    pub fn env_var(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn ports(mut self, ports: BTreeMap<String, PortMapping>) -> Self {
        self.ports = ports;
        self
    }

    pub fn port(mut self, name: impl Into<String>, mapping: PortMapping) -> Self {
        self.ports.insert(name.into(), mapping);
        self
    }

    pub fn build(self) -> Result<Job, JobValidationError> {
        let name = self.name.ok_or(JobValidationError::MissingField("name"))?;
        let version = self
            .version
            .ok_or(JobValidationError::MissingField("version"))?;
        let image = self.image.ok_or(JobValidationError::MissingField("image"))?;
        if image.is_empty() {
            return Err(JobValidationError::EmptyImage);
        }
        for (port_name, mapping) in &self.ports {
            if port_name.is_empty() {
                return Err(JobValidationError::InvalidPort {
                    name: port_name.clone(),
                    reason: "port name is empty".to_string(),
                });
            }
            if mapping.internal_port == 0 {
                return Err(JobValidationError::InvalidPort {
                    name: port_name.clone(),
                    reason: "internal port is zero".to_string(),
                });
            }
        }

        let id = JobId::new(&name, &version)?;
        let config = canonical_config(&name, &version, &image, &self.command, &self.env, &self.ports)?;
        let config_hash = sha1_hex(&config);
        let input = format!("{name}:{version}:{config_hash}");
        let job_hash = sha1_hex(input.as_bytes());

        Ok(Job {
            id: id.with_hash(job_hash),
            image,
            command: self.command,
            env: self.env,
            ports: self.ports,
        })
    }
}

/// Canonical serialization of the hashed config fields.
///
/// The key set is fixed: `command`, `env`, `image`, `name`, `version`, with
/// `ports` joining only when non-empty. Empty `command` and `env` stay in
/// the output; dropping them would silently change every hash.
fn canonical_config(
    name: &str,
    version: &str,
    image: &str,
    command: &[String],
    env: &BTreeMap<String, String>,
    ports: &BTreeMap<String, PortMapping>,
) -> Result<Vec<u8>, serde_json::Error> {
    // serde_json's Map keeps keys sorted, which together with compact
    // output gives the canonical form.
    let mut config = Map::new();
    config.insert("command".to_string(), serde_json::to_value(command)?);
    config.insert("env".to_string(), serde_json::to_value(env)?);
    config.insert("image".to_string(), Value::String(image.to_string()));
    config.insert("name".to_string(), Value::String(name.to_string()));
    config.insert("version".to_string(), Value::String(version.to_string()));
    if !ports.is_empty() {
        config.insert("ports".to_string(), serde_json::to_value(ports)?);
    }
    serde_json::to_vec(&Value::Object(config))
}

fn sha1_hex(bytes: &[u8]) -> String {
    hex::encode(Sha1::digest(bytes))
}
