//! Configuration module
//!
//! - types/mod.rs: top-level `Config`
//! - types/sandbox.rs: host and container executor settings
//! - io.rs: Configuration loading and saving
//! - validation.rs: Configuration validation
//! - paths.rs: Configuration file paths

mod io;
mod paths;
mod types;
mod validation;

pub use types::Config;

pub use types::sandbox::{
    parse_memory_limit, ContainerConfig, ExecutionEnv, HostConfig, DEFAULT_MAX_OUTPUT_BYTES,
    DEFAULT_TIMEOUT_SECS,
};

pub use io::{apply_env_overrides, load_config, load_config_from_path, save_config};
pub use paths::{config_dir, config_path};
pub use validation::{validate_config, ConfigValidationResult, ValidationIssue};
