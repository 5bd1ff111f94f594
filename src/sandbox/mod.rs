//! Sandbox module - single-run Python execution
//!
//! Two executors share one request/result contract:
//! - Host: a throwaway workspace and virtualenv on this machine
//! - Container: an ephemeral, resource-capped Docker container

mod container;
pub(crate) mod engine;
mod executor;
mod host;
mod normalize;
mod probe;
mod process;
mod venv;

pub use container::{build_run_command, container_spec, ContainerExecutor, RunCommand};
pub use engine::shared_engine;
pub use executor::{
    parse_requirements, CodeExecutor, ExecutionRequest, ExecutionResult, PythonVersion,
};
pub use host::HostExecutor;
pub use normalize::{decode_output, normalize, normalize_failure, RawOutput};
pub use probe::{EnvironmentProbe, SystemProbe};
pub use process::{run_bounded, ProcessOutcome};
pub use venv::{create_isolated_env, VenvStrategy, VirtualEnv};

use crate::config::{Config, ExecutionEnv};
use crate::error::Result;

/// Create an executor based on the configuration
pub async fn create_executor(config: &Config) -> Result<Box<dyn CodeExecutor>> {
    match config.execution_env {
        ExecutionEnv::Host => {
            let executor = HostExecutor::from_config(config);
            Ok(Box::new(executor))
        }
        ExecutionEnv::Container => {
            let executor = ContainerExecutor::from_config(config).await?;
            Ok(Box::new(executor))
        }
    }
}
