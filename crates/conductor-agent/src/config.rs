//! Agent configuration, read entirely from the environment so the agent
//! binary can run unmodified across hosts.

use conductor_core::agent::AgentCapabilities;
use conductor_core::{Error, Result};
use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub control_plane_url: String,
    pub token: Option<String>,
    pub max_parallel: u32,
    pub network_zones: Vec<String>,
    pub docker_enabled: bool,
    pub labels: Vec<String>,
    pub workspace_dir: PathBuf,
    pub heartbeat_interval_secs: u64,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self> {
        let control_plane_url = required_env("CONDUCTOR_AGENT_CONTROL_PLANE_URL")?;
        let token = std::env::var("CONDUCTOR_AGENT_TOKEN").ok();
        let max_parallel = optional_env("CONDUCTOR_AGENT_MAX_PARALLEL", 4)?;
        let network_zones = comma_separated_env("CONDUCTOR_AGENT_NETWORK_ZONES");
        let docker_enabled = optional_env("CONDUCTOR_AGENT_DOCKER_ENABLED", false)?;
        let labels = comma_separated_env("CONDUCTOR_AGENT_LABELS");
        let workspace_dir = std::env::var("CONDUCTOR_AGENT_WORKSPACE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("/var/conductor/workspace"));
        let heartbeat_interval_secs = optional_env("CONDUCTOR_AGENT_HEARTBEAT_INTERVAL_SECONDS", 30)?;

        Ok(Self {
            control_plane_url,
            token,
            max_parallel,
            network_zones,
            docker_enabled,
            labels,
            workspace_dir,
            heartbeat_interval_secs,
        })
    }

    pub fn capabilities(&self) -> AgentCapabilities {
        AgentCapabilities {
            max_parallel: self.max_parallel,
            network_zones: self.network_zones.clone(),
            docker_available: self.docker_enabled,
        }
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key).map_err(|_| Error::Internal(format!("missing required environment variable {key}")))
}

fn optional_env<T: std::str::FromStr>(key: &str, default: T) -> Result<T> {
    match std::env::var(key) {
        Ok(value) => value
            .parse()
            .map_err(|_| Error::Internal(format!("invalid value for environment variable {key}"))),
        Err(_) => Ok(default),
    }
}

fn comma_separated_env(key: &str) -> Vec<String> {
    std::env::var(key)
        .ok()
        .map(|value| {
            value
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect()
        })
        .unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn comma_separated_env_trims_and_drops_empties() {
        unsafe {
            std::env::set_var("CONDUCTOR_AGENT_TEST_ZONES", "us-east, , eu-west");
        }
        let zones = comma_separated_env("CONDUCTOR_AGENT_TEST_ZONES");
        assert_eq!(zones, vec!["us-east".to_string(), "eu-west".to_string()]);
        unsafe {
            std::env::remove_var("CONDUCTOR_AGENT_TEST_ZONES");
        }
    }
}
