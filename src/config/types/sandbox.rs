//! Sandbox configuration types
//!
//! Configuration for the host and container executors

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

use crate::sandbox::PythonVersion;

/// Default wall-clock limit for user code
pub const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Combined stdout/stderr ceiling on the host path
pub const DEFAULT_MAX_OUTPUT_BYTES: usize = 10 * 1024 * 1024;

/// Execution environment type
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionEnv {
    /// Run against the host interpreter, in a virtualenv when possible
    #[default]
    Host,
    /// Run in an ephemeral Docker container
    Container,
}

impl std::str::FromStr for ExecutionEnv {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "host" | "local" | "os" => Ok(ExecutionEnv::Host),
            "container" | "docker" => Ok(ExecutionEnv::Container),
            _ => Err(crate::error::Error::Config(format!(
                "Invalid execution environment: {}. Valid: host, container",
                s
            ))),
        }
    }
}

impl std::fmt::Display for ExecutionEnv {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExecutionEnv::Host => write!(f, "host"),
            ExecutionEnv::Container => write!(f, "container"),
        }
    }
}

/// Host executor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HostConfig {
    /// Interpreter used when a request does not pick one
    #[serde(default)]
    pub python_version: PythonVersion,
    /// Parent directory for per-run workspaces (system temp dir when unset)
    #[serde(default)]
    pub temp_dir: Option<PathBuf>,
    /// Combined stdout/stderr capture ceiling in bytes
    #[serde(default = "default_max_output")]
    pub max_output_bytes: usize,
    /// Bound for `python -m venv`
    #[serde(with = "humantime_serde", default = "default_venv_timeout")]
    pub venv_timeout: Duration,
    /// Bound for `python -m venv --copies`
    #[serde(with = "humantime_serde", default = "default_copies_venv_timeout")]
    pub copies_venv_timeout: Duration,
    /// Try to create a virtualenv before falling back to the host interpreter
    #[serde(default = "default_true")]
    pub use_isolated_env: bool,
}

impl Default for HostConfig {
    fn default() -> Self {
        HostConfig {
            python_version: PythonVersion::default(),
            temp_dir: None,
            max_output_bytes: default_max_output(),
            venv_timeout: default_venv_timeout(),
            copies_venv_timeout: default_copies_venv_timeout(),
            use_isolated_env: true,
        }
    }
}

impl HostConfig {
    /// Directory under which workspaces are created
    pub fn workspace_root(&self) -> PathBuf {
        self.temp_dir.clone().unwrap_or_else(std::env::temp_dir)
    }
}

fn default_max_output() -> usize {
    DEFAULT_MAX_OUTPUT_BYTES
}

fn default_venv_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_copies_venv_timeout() -> Duration {
    Duration::from_secs(120)
}

fn default_true() -> bool {
    true
}

/// Container (Docker) configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContainerConfig {
    /// Base image every run starts from
    #[serde(default = "default_image")]
    pub image: String,
    /// Memory limit
    #[serde(default = "default_memory")]
    pub memory_limit: String,
    /// CPU limit (fraction of one core)
    #[serde(default = "default_cpu")]
    pub cpu_limit: f64,
    /// Network mode (package installs need outbound access)
    #[serde(default = "default_network")]
    pub network: String,
    /// Unprivileged account created inside the container when installing packages
    #[serde(default = "default_sandbox_user")]
    pub sandbox_user: String,
}

impl Default for ContainerConfig {
    fn default() -> Self {
        ContainerConfig {
            image: default_image(),
            memory_limit: default_memory(),
            cpu_limit: default_cpu(),
            network: default_network(),
            sandbox_user: default_sandbox_user(),
        }
    }
}

impl ContainerConfig {
    /// Memory limit in bytes, if the configured string parses
    pub fn memory_bytes(&self) -> Option<i64> {
        parse_memory_limit(&self.memory_limit)
    }

    /// CPU limit expressed in Docker's nano-CPU units
    pub fn nano_cpus(&self) -> i64 {
        (self.cpu_limit * 1_000_000_000.0) as i64
    }
}

fn default_image() -> String {
    "python:3.11-slim".to_string()
}

fn default_memory() -> String {
    "512m".to_string()
}

fn default_cpu() -> f64 {
    0.5
}

fn default_network() -> String {
    "bridge".to_string()
}

fn default_sandbox_user() -> String {
    "sandbox".to_string()
}

/// Parse a memory limit string (e.g., "512m", "1g") to bytes.
///
/// `None` when the string is malformed, not positive, or overflows `i64`.
pub fn parse_memory_limit(limit: &str) -> Option<i64> {
    let limit = limit.trim().to_lowercase();
    let (num_str, unit) = if limit.ends_with('g') || limit.ends_with("gb") {
        (limit.trim_end_matches(|c| c == 'g' || c == 'b'), 'g')
    } else if limit.ends_with('m') || limit.ends_with("mb") {
        (limit.trim_end_matches(|c| c == 'm' || c == 'b'), 'm')
    } else if limit.ends_with('k') || limit.ends_with("kb") {
        (limit.trim_end_matches(|c| c == 'k' || c == 'b'), 'k')
    } else {
        (limit.trim_end_matches('b'), 'b')
    };

    let num: i64 = num_str.parse().ok()?;
    if num <= 0 {
        return None;
    }

    let multiplier: i64 = match unit {
        'g' => 1024 * 1024 * 1024,
        'm' => 1024 * 1024,
        'k' => 1024,
        _ => 1,
    };
    num.checked_mul(multiplier)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execution_env_parsing() {
        assert_eq!("host".parse::<ExecutionEnv>().unwrap(), ExecutionEnv::Host);
        assert_eq!(
            "docker".parse::<ExecutionEnv>().unwrap(),
            ExecutionEnv::Container
        );
        assert!("wasm".parse::<ExecutionEnv>().is_err());
    }

    #[test]
    fn test_container_defaults() {
        let config = ContainerConfig::default();
        assert_eq!(config.memory_bytes(), Some(512 * 1024 * 1024));
        assert_eq!(config.nano_cpus(), 500_000_000);
        assert_eq!(config.image, "python:3.11-slim");
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("512m"), Some(512 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_memory_limit("256MB"), Some(256 * 1024 * 1024));
        assert_eq!(parse_memory_limit("1024k"), Some(1024 * 1024));
        assert_eq!(parse_memory_limit("1024"), Some(1024));
        assert_eq!(parse_memory_limit("lots"), None);
        assert_eq!(parse_memory_limit("0m"), None);
    }

    #[test]
    fn test_parse_memory_limit_rejects_overflow() {
        assert_eq!(parse_memory_limit("9999999999999g"), None);
        assert_eq!(parse_memory_limit("99999999999999999m"), None);
        assert_eq!(parse_memory_limit("8589934591g"), Some(8_589_934_591 * 1024 * 1024 * 1024));
    }

    #[test]
    fn test_host_config_durations_deserialize() {
        let config: HostConfig =
            serde_json::from_str(r#"{"venv_timeout": "5s", "copies_venv_timeout": "2m"}"#)
                .unwrap();
        assert_eq!(config.venv_timeout, Duration::from_secs(5));
        assert_eq!(config.copies_venv_timeout, Duration::from_secs(120));
        assert_eq!(config.max_output_bytes, DEFAULT_MAX_OUTPUT_BYTES);
        assert!(config.use_isolated_env);
    }
}
