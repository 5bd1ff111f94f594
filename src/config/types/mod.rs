//! Configuration types module

pub mod sandbox;

use serde::{Deserialize, Serialize};

use sandbox::{ContainerConfig, ExecutionEnv, HostConfig, DEFAULT_TIMEOUT_SECS};

/// Main application configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Which executor handles requests
    #[serde(default)]
    pub execution_env: ExecutionEnv,

    /// Timeout applied when a request leaves it unset or zero
    #[serde(default = "default_timeout")]
    pub default_timeout_secs: u64,

    /// Host executor settings
    #[serde(default)]
    pub host: HostConfig,

    /// Container executor settings
    #[serde(default)]
    pub container: ContainerConfig,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            execution_env: ExecutionEnv::default(),
            default_timeout_secs: default_timeout(),
            host: HostConfig::default(),
            container: ContainerConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from the config file and environment overrides
    pub fn from_env() -> crate::error::Result<Self> {
        crate::config::load_config()
    }
}

fn default_timeout() -> u64 {
    DEFAULT_TIMEOUT_SECS
}
