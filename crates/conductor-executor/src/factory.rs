//! Picks the driver for a test's execution type, falling back to the
//! subprocess driver when a container driver could not be constructed
//! (e.g. no Docker daemon reachable on this agent).

use crate::container::ContainerDriver;
use crate::runner::{Driver, DriverConfig};
use crate::shell::SubprocessDriver;
use conductor_core::run::ExecutionType;
use std::sync::Arc;
use tracing::warn;

pub struct DriverRegistry {
    drivers: Vec<Arc<dyn Driver>>,
}

impl DriverRegistry {
    pub fn new(config: DriverConfig, docker_available: bool) -> Self {
        let mut drivers: Vec<Arc<dyn Driver>> = Vec::new();
        if docker_available {
            match ContainerDriver::new(config.clone()) {
                Ok(driver) => drivers.push(Arc::new(driver)),
                Err(e) => warn!(error = %e, "container driver unavailable, falling back to subprocess only"),
            }
        }
        drivers.push(Arc::new(SubprocessDriver::new(config)));
        Self { drivers }
    }

    pub fn for_execution_type(&self, execution_type: ExecutionType) -> Option<Arc<dyn Driver>> {
        self.drivers
            .iter()
            .find(|d| d.can_handle(execution_type))
            .cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn falls_back_to_subprocess_when_docker_disabled() {
        let registry = DriverRegistry::new(DriverConfig::default(), false);
        assert!(registry.for_execution_type(ExecutionType::Subprocess).is_some());
        assert!(registry.for_execution_type(ExecutionType::Container).is_none());
    }
}
