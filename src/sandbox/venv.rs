//! Isolated interpreter environments
//!
//! Virtualenv creation is tried with escalating strategies. Each attempt has
//! its own deadline, separate from the run timeout.

use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};

use super::process::run_bounded;
use crate::config::HostConfig;

/// Output cap for venv tooling; only used for diagnostics
const TOOLING_OUTPUT_BYTES: usize = 64 * 1024;

/// Ways of creating a virtualenv, in escalation order
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VenvStrategy {
    /// `python -m venv <dir>`
    Standard,
    /// `python -m venv --copies <dir>`, for filesystems without symlinks
    Copies,
}

impl VenvStrategy {
    /// All strategies in the order they are attempted
    pub fn chain() -> [VenvStrategy; 2] {
        [VenvStrategy::Standard, VenvStrategy::Copies]
    }

    pub fn args(&self, target: &Path) -> Vec<String> {
        let mut args = vec!["-m".to_string(), "venv".to_string()];
        if *self == VenvStrategy::Copies {
            args.push("--copies".to_string());
        }
        args.push(target.to_string_lossy().into_owned());
        args
    }

    pub fn timeout(&self, config: &HostConfig) -> Duration {
        match self {
            VenvStrategy::Standard => config.venv_timeout,
            VenvStrategy::Copies => config.copies_venv_timeout,
        }
    }
}

impl std::fmt::Display for VenvStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VenvStrategy::Standard => write!(f, "standard"),
            VenvStrategy::Copies => write!(f, "copies"),
        }
    }
}

/// A created virtualenv
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualEnv {
    pub root: PathBuf,
    pub strategy: VenvStrategy,
}

impl VirtualEnv {
    pub fn python(&self) -> PathBuf {
        venv_executable(&self.root, "python")
    }

    pub fn pip(&self) -> PathBuf {
        venv_executable(&self.root, "pip")
    }
}

/// Path of an executable inside a virtualenv, per platform layout
pub fn venv_executable(root: &Path, name: &str) -> PathBuf {
    if cfg!(windows) {
        root.join("Scripts").join(format!("{}.exe", name))
    } else {
        root.join("bin").join(name)
    }
}

/// Try each strategy in turn. `None` means every strategy failed and the
/// caller should fall back to the host interpreter.
pub async fn create_isolated_env(
    interpreter: &Path,
    target: &Path,
    config: &HostConfig,
) -> Option<VirtualEnv> {
    for strategy in VenvStrategy::chain() {
        debug!("Creating virtualenv at {} ({})", target.display(), strategy);

        let mut command = Command::new(interpreter);
        command.args(strategy.args(target));

        match run_bounded(command, strategy.timeout(config), TOOLING_OUTPUT_BYTES).await {
            Ok(outcome) if outcome.success() => {
                let env = VirtualEnv {
                    root: target.to_path_buf(),
                    strategy,
                };
                if env.python().exists() {
                    info!("Virtualenv created with {} strategy", strategy);
                    return Some(env);
                }
                warn!(
                    "{} strategy reported success but {} is missing",
                    strategy,
                    env.python().display()
                );
            }
            Ok(outcome) if outcome.timed_out => {
                warn!("{} strategy timed out", strategy);
            }
            Ok(outcome) => {
                warn!(
                    "{} strategy failed (exit {:?}): {}",
                    strategy,
                    outcome.exit_code,
                    outcome.stderr.trim()
                );
            }
            Err(e) => {
                warn!("{} strategy could not start: {}", strategy, e);
            }
        }

        if target.exists() {
            if let Err(e) = tokio::fs::remove_dir_all(target).await {
                warn!("Failed to clear partial virtualenv {}: {}", target.display(), e);
            }
        }
    }

    warn!("All virtualenv strategies failed; using the host interpreter");
    None
}
