//! Agent configuration
//!
//! Only the store endpoints and the runtime endpoint are required;
//! everything else has defaults tuned for production and overridable for
//! tests.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;
use std::time::Duration;

use anyhow::Result;

use crate::task_runner::TaskRunnerConfig;

/// Runtime configuration for the agent.
#[derive(Debug, Clone)]
pub struct AgentConfig {
    /// Name this host registers under.
    pub name: String,

    /// Coordination store endpoints, comma separated. `memory:` selects
    /// the embedded in-process store.
    pub store_endpoints: String,

    /// Container runtime endpoint; `None` uses the daemon default.
    pub runtime_endpoint: Option<String>,

    /// Range dynamic external ports are assigned from.
    pub port_range: RangeInclusive<u16>,

    /// History events retained per (job, host).
    pub history_retention: usize,

    /// Backstop reconcile interval; watches drive reconciliation, the
    /// tick covers dropped edges.
    pub reconcile_interval: Duration,

    pub pull_max_attempts: u32,
    pub pull_backoff_base: Duration,
    pub pull_backoff_max: Duration,

    pub restart_backoff_base: Duration,
    pub restart_backoff_max: Duration,
    /// Runs at least this long reset the restart backoff.
    pub healthy_run_threshold: Duration,

    /// Grace period given to a container on stop before it is killed.
    pub stop_timeout: Duration,

    /// Labels reported in the host's environment (e.g. site, rack).
    pub environment: BTreeMap<String, String>,
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            name: default_host_name(),
            store_endpoints: "memory:".to_string(),
            runtime_endpoint: None,
            port_range: 20000..=20999,
            history_retention: 30,
            reconcile_interval: Duration::from_secs(5),
            pull_max_attempts: 6,
            pull_backoff_base: Duration::from_secs(1),
            pull_backoff_max: Duration::from_secs(30),
            restart_backoff_base: Duration::from_secs(1),
            restart_backoff_max: Duration::from_secs(30),
            healthy_run_threshold: Duration::from_secs(120),
            stop_timeout: Duration::from_secs(10),
            environment: BTreeMap::new(),
        }
    }
}

fn default_host_name() -> String {
    std::env::var("HOSTNAME").unwrap_or_else(|_| "localhost".to_string())
}

impl AgentConfig {
    pub fn validate(&self) -> Result<()> {
        if self.name.is_empty() {
            anyhow::bail!("agent name cannot be empty");
        }
        if self.name.contains('/') {
            anyhow::bail!("agent name cannot contain '/'");
        }
        if self.store_endpoints.is_empty() {
            anyhow::bail!("store_endpoints cannot be empty");
        }
        if self.port_range.is_empty() {
            anyhow::bail!("port_range cannot be empty");
        }
        if self.history_retention == 0 {
            anyhow::bail!("history_retention must be greater than 0");
        }
        if self.pull_max_attempts == 0 {
            anyhow::bail!("pull_max_attempts must be greater than 0");
        }
        Ok(())
    }

    /// Parses a `lo-hi` port range argument.
    pub fn parse_port_range(raw: &str) -> Result<RangeInclusive<u16>> {
        let (lo, hi) = raw
            .split_once('-')
            .ok_or_else(|| anyhow::anyhow!("port range must look like 20000-20999"))?;
        let lo: u16 = lo.trim().parse()?;
        let hi: u16 = hi.trim().parse()?;
        if lo > hi {
            anyhow::bail!("port range start exceeds end");
        }
        Ok(lo..=hi)
    }

    /// Parses `key=value,key=value` environment labels.
    pub fn parse_environment(raw: &str) -> BTreeMap<String, String> {
        raw.split(',')
            .filter_map(|pair| {
                let (key, value) = pair.split_once('=')?;
                let key = key.trim();
                if key.is_empty() {
                    return None;
                }
                Some((key.to_string(), value.trim().to_string()))
            })
            .collect()
    }

    pub fn runner_config(&self) -> TaskRunnerConfig {
        TaskRunnerConfig {
            host: self.name.clone(),
            history_retention: self.history_retention,
            pull_max_attempts: self.pull_max_attempts,
            pull_backoff_base: self.pull_backoff_base,
            pull_backoff_max: self.pull_backoff_max,
            restart_backoff_base: self.restart_backoff_base,
            restart_backoff_max: self.restart_backoff_max,
            healthy_run_threshold: self.healthy_run_threshold,
            stop_timeout: self.stop_timeout,
        }
    }
}
