//! Port mapping validation
//!
//! Only literal numeric `host:container` mappings are accepted. Across the
//! whole project a container port belongs to one service and a host port
//! maps to one container port.

use std::collections::BTreeMap;

use crate::compose::project::PortMapping;
use crate::error::CompilationError;
use crate::k8s::ContainerPort;

/// Project-wide port bookkeeping
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PortTable {
    host_to_container: BTreeMap<u16, u16>,
    container_owner: BTreeMap<u16, String>,
}

impl PortTable {
    /// Empty table
    pub fn new() -> Self {
        Self::default()
    }

    /// Validate one mapping of `service` and record it.
    ///
    /// Returns the container port so the caller can add it to the container.
    pub fn register(&mut self, service: &str, mapping: &PortMapping) -> Result<u16, CompilationError> {
        let (published, container_port) = match (&mapping.published, mapping.target) {
            (Some(published), Some(target)) if target > 0 => (published, target),
            _ => {
                return Err(CompilationError::PortFormat {
                    service: service.to_string(),
                })
            }
        };
        let host_port = published
            .parse::<u16>()
            .ok()
            .filter(|p| *p > 0)
            .ok_or_else(|| CompilationError::HostPortInvalid {
                published: published.clone(),
            })?;

        if let Some(owner) = self.container_owner.get(&container_port) {
            if owner != service {
                return Err(CompilationError::ContainerPortConflict {
                    port: container_port,
                    first: owner.clone(),
                    second: service.to_string(),
                });
            }
        }
        if let Some(&prev) = self.host_to_container.get(&host_port) {
            if prev != container_port {
                return Err(CompilationError::HostPortConflict {
                    port: host_port,
                    first: prev,
                    second: container_port,
                });
            }
        }

        self.container_owner
            .insert(container_port, service.to_string());
        self.host_to_container.insert(host_port, container_port);
        Ok(container_port)
    }

    /// Container port a host port maps to
    pub fn container_port(&self, host_port: u16) -> Option<u16> {
        self.host_to_container.get(&host_port).copied()
    }

    /// `(host, container)` pairs in ascending host-port order
    pub fn mappings(&self) -> impl Iterator<Item = (u16, u16)> + '_ {
        self.host_to_container.iter().map(|(h, c)| (*h, *c))
    }

    /// True when no port was published
    pub fn is_empty(&self) -> bool {
        self.host_to_container.is_empty()
    }
}

/// Add a container port unless the container already lists it
pub fn push_container_port(ports: &mut Vec<ContainerPort>, port: u16) {
    if !ports.iter().any(|p| p.container_port == port) {
        ports.push(ContainerPort {
            container_port: port,
        });
    }
}
