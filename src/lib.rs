//! # pyrun
//!
//! Run a piece of Python code exactly once and get a structured result back.
//!
//! ## Features
//!
//! - **Host execution:** per-run workspace and virtualenv, with fallback to the
//!   host interpreter when isolation tooling is missing
//! - **Container execution:** disposable Docker containers with memory and CPU
//!   caps; user code runs unprivileged
//! - **Uniform results:** stdout decoded as JSON when possible, one envelope
//!   for both paths
//! - **Guaranteed cleanup:** workspaces and containers never outlive a run

pub mod config;
pub mod error;
pub mod sandbox;

pub use config::Config;
pub use error::{Error, Result};
pub use sandbox::{create_executor, CodeExecutor, ExecutionRequest, ExecutionResult};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const NAME: &str = env!("CARGO_PKG_NAME");
