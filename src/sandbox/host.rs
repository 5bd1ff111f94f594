//! Host execution
//!
//! Runs code against a Python installation on this machine. Each run gets a
//! fresh workspace directory and, when possible, a throwaway virtualenv.
//! There is no memory or CPU cap on this path; use the container executor
//! for untrusted code.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::executor::{CodeExecutor, ExecutionRequest, ExecutionResult, PythonVersion};
use super::normalize::{exit_error_message, normalize, normalize_failure, RawOutput};
use super::probe::{EnvironmentProbe, SystemProbe};
use super::process::run_bounded;
use super::venv::create_isolated_env;
use crate::config::{Config, HostConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::{Error, Result};

const SCRIPT_FILE: &str = "script.py";
const MANIFEST_FILE: &str = "requirements.txt";
const VENV_DIR: &str = "venv";

/// Per-run scratch directory, removed when the run ends
struct Workspace {
    path: PathBuf,
    removed: bool,
}

impl Workspace {
    async fn create(root: &Path) -> Result<Self> {
        let path = root.join(format!("pyrun-{}", Uuid::new_v4()));
        tokio::fs::create_dir_all(&path).await.map_err(|e| {
            Error::Sandbox(format!(
                "Failed to create workspace {}: {}",
                path.display(),
                e
            ))
        })?;
        debug!("Created workspace {}", path.display());
        Ok(Workspace {
            path,
            removed: false,
        })
    }

    fn script(&self) -> PathBuf {
        self.path.join(SCRIPT_FILE)
    }

    fn manifest(&self) -> PathBuf {
        self.path.join(MANIFEST_FILE)
    }

    fn venv(&self) -> PathBuf {
        self.path.join(VENV_DIR)
    }

    /// Best-effort recursive delete; failures are logged only
    async fn cleanup(mut self) {
        match tokio::fs::remove_dir_all(&self.path).await {
            Ok(()) => debug!("Removed workspace {}", self.path.display()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Failed to remove workspace {}: {}", self.path.display(), e),
        }
        self.removed = true;
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if self.removed {
            return;
        }
        // Reached when the run future is dropped before cleanup ran.
        if let Err(e) = std::fs::remove_dir_all(&self.path) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!("Failed to remove workspace {}: {}", self.path.display(), e);
            }
        }
    }
}

/// Interpreter chosen for a run
#[derive(Debug, Clone)]
struct Toolchain {
    python: PathBuf,
    isolated: bool,
}

/// Host executor
pub struct HostExecutor {
    config: HostConfig,
    default_timeout_secs: u64,
    probe: Arc<dyn EnvironmentProbe>,
}

impl HostExecutor {
    /// Create a host executor that probes the real system
    pub fn new(config: HostConfig) -> Self {
        HostExecutor {
            config,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
            probe: Arc::new(SystemProbe::new()),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(config.host.clone()).with_default_timeout(config.default_timeout_secs)
    }

    /// Replace the environment probe
    pub fn with_probe(mut self, probe: Arc<dyn EnvironmentProbe>) -> Self {
        self.probe = probe;
        self
    }

    pub fn with_default_timeout(mut self, secs: u64) -> Self {
        self.default_timeout_secs = secs;
        self
    }

    /// The request's interpreter, or the configured one when it has none
    fn select_version(&self, requested: PythonVersion) -> PythonVersion {
        match requested {
            PythonVersion::Default => self.config.python_version,
            other => other,
        }
    }

    fn find_host_python(&self, version: PythonVersion) -> Option<PathBuf> {
        let (name, path) = version
            .candidates()
            .into_iter()
            .find_map(|name| self.probe.find_executable(name).map(|path| (name, path)))?;
        if version != PythonVersion::Default && name != version.executable() {
            warn!(
                "{} not found; falling back to {} ({})",
                version.executable(),
                name,
                path.display()
            );
        }
        Some(path)
    }

    async fn pip_available(&self, python: &Path) -> bool {
        let probe = Arc::clone(&self.probe);
        let python = python.to_path_buf();
        tokio::task::spawn_blocking(move || probe.has_pip(&python))
            .await
            .unwrap_or(false)
    }

    async fn resolve_toolchain(
        &self,
        workspace: &Workspace,
        version: PythonVersion,
    ) -> Result<Toolchain> {
        let host_python = self.find_host_python(version).ok_or_else(|| {
            Error::Sandbox(format!(
                "Python interpreter not found (looked for {}). Install Python or select another interpreter version.",
                version.candidates().join(", ")
            ))
        })?;

        if self.probe.is_containerized() {
            info!("Running inside a container; skipping virtualenv creation");
        } else if !self.config.use_isolated_env {
            debug!("Virtualenv creation disabled by configuration");
        } else if let Some(env) =
            create_isolated_env(&host_python, &workspace.venv(), &self.config).await
        {
            return Ok(Toolchain {
                python: env.python(),
                isolated: true,
            });
        }

        Ok(Toolchain {
            python: host_python,
            isolated: false,
        })
    }

    /// Install into the interpreter that will run the script.
    /// `Some` carries the failure result that ends the run.
    async fn install_requirements(
        &self,
        workspace: &Workspace,
        python: &Path,
        timeout: Duration,
    ) -> Result<Option<ExecutionResult>> {
        info!("Installing dependencies with {} -m pip", python.display());

        let mut command = Command::new(python);
        command
            .args(["-m", "pip", "install"])
            .arg("--disable-pip-version-check")
            .arg("--no-input")
            .arg("-r")
            .arg(workspace.manifest())
            .current_dir(&workspace.path);

        let outcome = run_bounded(command, timeout, self.config.max_output_bytes).await?;

        if outcome.timed_out {
            return Ok(Some(normalize_failure(
                outcome.into_raw(),
                format!(
                    "Dependency installation timed out after {} seconds",
                    timeout.as_secs()
                ),
            )));
        }

        if !outcome.success() {
            let reason = exit_error_message(&outcome.stderr, outcome.exit_code);
            return Ok(Some(normalize_failure(
                outcome.into_raw(),
                format!("Failed to install dependencies: {}", reason),
            )));
        }

        if outcome.stderr.contains("WARNING") {
            warn!("pip reported warnings: {}", outcome.stderr.trim());
        }

        Ok(None)
    }

    async fn run_in_workspace(
        &self,
        workspace: &Workspace,
        request: &ExecutionRequest,
        timeout: Duration,
    ) -> Result<ExecutionResult> {
        tokio::fs::write(workspace.script(), &request.code).await?;
        if request.has_requirements() {
            tokio::fs::write(workspace.manifest(), request.manifest()).await?;
        }

        let version = self.select_version(request.python_version);
        let toolchain = self.resolve_toolchain(workspace, version).await?;
        debug!(
            "Using {} (isolated: {})",
            toolchain.python.display(),
            toolchain.isolated
        );

        if request.has_requirements() {
            if !self.pip_available(&toolchain.python).await {
                return Ok(normalize_failure(
                    RawOutput::default(),
                    format!(
                        "Dependencies were requested but pip is not available for {}. \
                         Install pip for the selected interpreter or remove the requirements.",
                        toolchain.python.display()
                    ),
                ));
            }
            if let Some(failed) = self
                .install_requirements(workspace, &toolchain.python, timeout)
                .await?
            {
                return Ok(failed);
            }
        }

        let mut command = Command::new(&toolchain.python);
        command
            .arg(workspace.script())
            .current_dir(&workspace.path)
            .env("PYTHONUNBUFFERED", "1")
            .env("PYTHONDONTWRITEBYTECODE", "1");

        let outcome = run_bounded(command, timeout, self.config.max_output_bytes).await?;

        if outcome.timed_out {
            return Ok(normalize_failure(
                outcome.into_raw(),
                format!("Execution timed out after {} seconds", timeout.as_secs()),
            ));
        }

        if !outcome.success() {
            let error = exit_error_message(&outcome.stderr, outcome.exit_code);
            return Ok(normalize_failure(outcome.into_raw(), error));
        }

        Ok(normalize(outcome.into_raw(), request.capture_output))
    }
}

#[async_trait]
impl CodeExecutor for HostExecutor {
    fn name(&self) -> &str {
        "host"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        if let Err(e) = request.validate() {
            return Ok(normalize_failure(RawOutput::default(), e.to_string()));
        }

        let timeout = request.effective_timeout(self.default_timeout_secs);

        let workspace = match Workspace::create(&self.config.workspace_root()).await {
            Ok(workspace) => workspace,
            Err(e) => return Ok(normalize_failure(RawOutput::default(), e.to_string())),
        };

        let result = self.run_in_workspace(&workspace, &request, timeout).await;
        workspace.cleanup().await;

        Ok(result.unwrap_or_else(|e| normalize_failure(RawOutput::default(), e.to_string())))
    }
}
