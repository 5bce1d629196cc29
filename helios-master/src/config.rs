//! Master configuration

use anyhow::Result;

/// Runtime configuration for the master service.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Address the RPC surface binds to.
    pub bind_addr: String,

    /// Coordination store endpoints, comma separated. `memory:` selects the
    /// embedded in-process store.
    pub store_endpoints: String,

    /// Accept deployments to hosts that have never registered, recording
    /// them as pending until an agent comes up. Strict (off) by default.
    pub allow_unregistered_hosts: bool,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0:5801".to_string(),
            store_endpoints: "memory:".to_string(),
            allow_unregistered_hosts: false,
        }
    }
}

impl MasterConfig {
    pub fn validate(&self) -> Result<()> {
        if self.bind_addr.is_empty() {
            anyhow::bail!("bind_addr cannot be empty");
        }
        if self.store_endpoints.is_empty() {
            anyhow::bail!("store_endpoints cannot be empty");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(MasterConfig::default().validate().is_ok());
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let mut config = MasterConfig::default();
        config.store_endpoints = String::new();
        assert!(config.validate().is_err());
    }
}
