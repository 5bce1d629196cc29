//! Host port allocation
//!
//! The supervisor owns one allocator per agent. Mappings without a fixed
//! external port get one from the configured range; fixed ports are
//! reserved so two tasks cannot claim the same one. Allocations are held
//! for the life of the task and released when the runner is collected.

use std::collections::BTreeMap;
use std::ops::RangeInclusive;

use helios_core::descriptors::{JobId, PortMapping};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PortAllocationError {
    #[error("external port {0} is already in use")]
    PortInUse(u16),

    #[error("no free ports left in the allocation range")]
    Exhausted,
}

/// Tracks which external ports are claimed by which job on this host.
#[derive(Debug)]
pub struct PortAllocator {
    range: RangeInclusive<u16>,
    allocated: BTreeMap<u16, JobId>,
}

impl PortAllocator {
    pub fn new(range: RangeInclusive<u16>) -> Self {
        Self {
            range,
            allocated: BTreeMap::new(),
        }
    }

    /// Resolves a job's port mappings, reserving fixed external ports and
    /// assigning dynamic ones from the range. On any failure nothing is
    /// reserved.
    pub fn allocate(
        &mut self,
        job: &JobId,
        ports: &BTreeMap<String, PortMapping>,
    ) -> Result<BTreeMap<String, PortMapping>, PortAllocationError> {
        let mut claimed: Vec<u16> = Vec::new();
        let mut resolved = BTreeMap::new();

        let result = (|| {
            // Fixed ports first so dynamic assignment can avoid them.
            for (name, mapping) in ports {
                if let Some(external) = mapping.external_port {
                    self.claim(job, external, &mut claimed)?;
                    resolved.insert(name.clone(), *mapping);
                }
            }
            for (name, mapping) in ports {
                if mapping.external_port.is_none() {
                    let external = self.next_free(&claimed)?;
                    self.claim(job, external, &mut claimed)?;
                    resolved.insert(name.clone(), mapping.with_external(external));
                }
            }
            Ok(())
        })();

        match result {
            Ok(()) => Ok(resolved),
            Err(err) => {
                for port in claimed {
                    self.allocated.remove(&port);
                }
                Err(err)
            }
        }
    }

    /// Releases every port held by the given job.
    pub fn release(&mut self, job: &JobId) {
        self.allocated.retain(|_, owner| owner != job);
    }

    pub fn allocated_count(&self) -> usize {
        self.allocated.len()
    }

    fn claim(
        &mut self,
        job: &JobId,
        port: u16,
        claimed: &mut Vec<u16>,
    ) -> Result<(), PortAllocationError> {
        if self.allocated.contains_key(&port) {
            return Err(PortAllocationError::PortInUse(port));
        }
        self.allocated.insert(port, job.clone());
        claimed.push(port);
        Ok(())
    }

    fn next_free(&self, claimed: &[u16]) -> Result<u16, PortAllocationError> {
        self.range
            .clone()
            .find(|port| !self.allocated.contains_key(port) && !claimed.contains(port))
            .ok_or(PortAllocationError::Exhausted)
    }
}
