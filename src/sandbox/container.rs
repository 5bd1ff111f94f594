//! Docker container-based execution
//!
//! Each run gets a fresh, auto-removed container with memory and CPU caps.
//! Nothing is mounted from the host: the only inputs crossing into the
//! container are the code, the requirement list and the resource limits.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine as _;
use bollard::container::{
    AttachContainerOptions, AttachContainerResults, Config, CreateContainerOptions,
    KillContainerOptions, LogOutput, RemoveContainerOptions, StartContainerOptions,
    WaitContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::image::CreateImageOptions;
use bollard::Docker;
use futures::StreamExt;
use std::time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::engine::{is_conflict, is_not_found, is_unreachable, shared_engine, translate_error};
use super::executor::{CodeExecutor, ExecutionRequest, ExecutionResult};
use super::normalize::{exit_error_message, normalize, normalize_failure, RawOutput};
use crate::config::{Config as PyrunConfig, ContainerConfig, DEFAULT_TIMEOUT_SECS};
use crate::error::{Error, Result};

/// Env var carrying the base64-encoded user code
pub const CODE_ENV: &str = "PYRUN_CODE_B64";

/// Env var carrying the fixed Python snippet that decodes and runs the code
const BOOTSTRAP_ENV: &str = "PYRUN_BOOTSTRAP";

const BOOTSTRAP: &str = "import base64, os; \
    exec(compile(base64.b64decode(os.environ['PYRUN_CODE_B64']).decode('utf-8'), '<code>', 'exec'))";

/// Head start given to the wait request before the container is started
const WAIT_REGISTRATION_GRACE: Duration = Duration::from_millis(100);

/// Account used for code that needs no package installation
const NOBODY: &str = "nobody";

/// What the container runs, and as whom
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunCommand {
    pub cmd: Vec<String>,
    pub env: Vec<String>,
    /// `None` runs as the image's default (root) user
    pub user: Option<String>,
}

/// Quote a value for POSIX sh
pub fn shell_quote(value: &str) -> String {
    format!("'{}'", value.replace('\'', r"'\''"))
}

/// Build the container command for a request.
///
/// Without requirements the code is passed straight to `python -c` and runs
/// as `nobody`. With requirements a shell sequence creates `sandbox_user`,
/// makes sure pip exists, installs the packages as root and then drops to
/// `sandbox_user` before decoding and running the code. The code itself is
/// never interpolated into the shell text.
pub fn build_run_command(request: &ExecutionRequest, sandbox_user: &str) -> RunCommand {
    let mut env = vec![
        "PYTHONUNBUFFERED=1".to_string(),
        "PYTHONDONTWRITEBYTECODE=1".to_string(),
    ];

    if !request.has_requirements() {
        return RunCommand {
            cmd: vec!["python".to_string(), "-c".to_string(), request.code.clone()],
            env,
            user: Some(NOBODY.to_string()),
        };
    }

    env.push(format!("{}={}", CODE_ENV, BASE64.encode(request.code.as_bytes())));
    env.push(format!("{}={}", BOOTSTRAP_ENV, BOOTSTRAP));
    env.push("PIP_ROOT_USER_ACTION=ignore".to_string());

    let user = shell_quote(sandbox_user);
    let packages = request
        .requirements
        .iter()
        .map(|spec| shell_quote(spec))
        .collect::<Vec<_>>()
        .join(" ");

    let script = [
        "set -e".to_string(),
        format!(
            "useradd --create-home --shell /bin/sh {user} >/dev/null 2>&1 || adduser -D {user} >/dev/null 2>&1"
        ),
        "python -m pip --version >/dev/null 2>&1 || python -m ensurepip --upgrade >/dev/null 2>&1"
            .to_string(),
        format!(
            "python -m pip install --quiet --no-cache-dir --disable-pip-version-check {packages}"
        ),
        format!("exec su -s /bin/sh {user} -c 'exec python -c \"${}\"'", BOOTSTRAP_ENV),
    ]
    .join("\n");

    RunCommand {
        cmd: vec!["sh".to_string(), "-c".to_string(), script],
        env,
        user: None,
    }
}

/// Container creation body for a run: auto-removed, capped, no mounts
pub fn container_spec(config: &ContainerConfig, run: RunCommand) -> Config<String> {
    let memory = config.memory_bytes();

    Config {
        image: Some(config.image.clone()),
        cmd: Some(run.cmd),
        env: Some(run.env),
        user: run.user,
        attach_stdout: Some(true),
        attach_stderr: Some(true),
        tty: Some(false),
        host_config: Some(bollard::service::HostConfig {
            memory,
            memory_swap: memory,
            nano_cpus: Some(config.nano_cpus()),
            network_mode: Some(config.network.clone()),
            auto_remove: Some(true),
            security_opt: Some(vec!["no-new-privileges:true".to_string()]),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Split `repo[:tag]` for a pull; registry ports and digests are kept intact
pub fn split_image_ref(image: &str) -> (&str, &str) {
    if image.contains('@') {
        return (image, "");
    }
    match image.rsplit_once(':') {
        Some((repo, tag)) if !tag.contains('/') => (repo, tag),
        _ => (image, "latest"),
    }
}

fn pull_error(image: &str, err: BollardError) -> Error {
    if is_unreachable(&err) {
        return translate_error(err);
    }

    let message = err.to_string();
    let lower = message.to_lowercase();
    let missing = is_not_found(&err)
        || lower.contains("not found")
        || lower.contains("manifest unknown")
        || lower.contains("pull access denied")
        || lower.contains("repository does not exist");

    if missing {
        Error::ImageNotFound(format!(
            "{} could not be pulled ({}). Check network connectivity and the image name.",
            image, message
        ))
    } else {
        Error::Container(format!("Failed to pull image {}: {}", image, message))
    }
}

/// Docker container executor
pub struct ContainerExecutor {
    /// Docker client
    docker: Docker,
    /// Container configuration
    config: ContainerConfig,
    default_timeout_secs: u64,
}

impl ContainerExecutor {
    /// Create an executor on the shared engine handle
    pub async fn new(config: &ContainerConfig) -> Result<Self> {
        let docker = shared_engine().await?;
        Ok(Self::with_client(docker, config.clone()))
    }

    pub async fn from_config(config: &PyrunConfig) -> Result<Self> {
        let mut executor = Self::new(&config.container).await?;
        executor.default_timeout_secs = config.default_timeout_secs;
        Ok(executor)
    }

    /// Create an executor on an existing client
    pub fn with_client(docker: Docker, config: ContainerConfig) -> Self {
        ContainerExecutor {
            docker,
            config,
            default_timeout_secs: DEFAULT_TIMEOUT_SECS,
        }
    }

    /// Ensure the base image is available, pulling it if needed
    async fn ensure_image(&self) -> Result<()> {
        let image = &self.config.image;

        match self.docker.inspect_image(image).await {
            Ok(_) => {
                debug!("Image {} present locally", image);
                return Ok(());
            }
            Err(e) if is_unreachable(&e) => return Err(translate_error(e)),
            Err(e) => info!("Image {} not available locally ({}); pulling", image, e),
        }

        let (from_image, tag) = split_image_ref(image);
        let options = CreateImageOptions {
            from_image: from_image.to_string(),
            tag: tag.to_string(),
            ..Default::default()
        };

        let mut stream = self.docker.create_image(Some(options), None, None);
        while let Some(result) = stream.next().await {
            match result {
                Ok(info) => {
                    if let Some(status) = info.status {
                        debug!(
                            progress = info.progress.as_deref().unwrap_or(""),
                            "Pull {}: {}", image, status
                        );
                    }
                }
                Err(e) => return Err(pull_error(image, e)),
            }
        }

        info!("Image {} pulled", image);
        Ok(())
    }

    async fn run_container(&self, request: &ExecutionRequest) -> Result<ExecutionResult> {
        self.ensure_image().await?;

        let timeout = request.effective_timeout(self.default_timeout_secs);
        let name = format!("pyrun-{}", Uuid::new_v4());
        let run = build_run_command(request, &self.config.sandbox_user);

        self.docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                container_spec(&self.config, run),
            )
            .await
            .map_err(translate_error)?;
        debug!("Created container {}", name);

        let result = self.drive(&name, timeout).await;

        // Auto-removal normally handles this; a forced remove covers runs
        // that never started or were killed mid-way.
        self.remove_quietly(&name).await;

        result
    }

    /// Attach, start, and race the run against the deadline
    async fn drive(&self, name: &str, timeout: Duration) -> Result<ExecutionResult> {
        let AttachContainerResults { mut output, .. } = self
            .docker
            .attach_container(
                name,
                Some(AttachContainerOptions::<String> {
                    stdout: Some(true),
                    stderr: Some(true),
                    stream: Some(true),
                    logs: Some(true),
                    ..Default::default()
                }),
            )
            .await
            .map_err(translate_error)?;

        // Registered before start so an auto-removed container still reports its status.
        let docker = self.docker.clone();
        let wait_name = name.to_string();
        let mut wait_task = tokio::spawn(async move { wait_exit_code(&docker, &wait_name).await });
        tokio::time::sleep(WAIT_REGISTRATION_GRACE).await;

        if let Err(e) = self
            .docker
            .start_container(name, None::<StartContainerOptions<String>>)
            .await
        {
            wait_task.abort();
            return Err(translate_error(e));
        }
        debug!("Started container {}", name);

        let mut stdout = String::new();
        let mut stderr = String::new();

        let race = tokio::time::timeout(timeout, async {
            while let Some(frame) = output.next().await {
                match frame {
                    Ok(LogOutput::StdOut { message }) => {
                        stdout.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(LogOutput::StdErr { message }) => {
                        stderr.push_str(&String::from_utf8_lossy(&message));
                    }
                    Ok(_) => {}
                    Err(e) => {
                        warn!("Error reading container output: {}", e);
                        break;
                    }
                }
            }
            (&mut wait_task).await
        })
        .await;

        let joined = match race {
            Ok(joined) => joined,
            Err(_) => {
                warn!("Container {} timed out after {:?}, killing", name, timeout);
                wait_task.abort();
                self.kill_quietly(name).await;
                return Ok(normalize_failure(
                    RawOutput::new(stdout, stderr).timed_out(),
                    format!("Execution timed out after {} seconds", timeout.as_secs()),
                ));
            }
        };

        let exit_code = joined.map_err(|e| Error::Internal(format!("Wait task failed: {}", e)))??;

        if exit_code.is_none() {
            warn!("Exit status of {} unavailable", name);
        }
        Ok(exit_result(exit_code, stdout, stderr))
    }

    async fn kill_quietly(&self, name: &str) {
        match self
            .docker
            .kill_container(name, None::<KillContainerOptions<String>>)
            .await
        {
            Ok(()) => debug!("Killed container {}", name),
            Err(e) if is_not_found(&e) || is_conflict(&e) => {}
            Err(e) => warn!("Failed to kill container {}: {}", name, e),
        }
    }

    async fn remove_quietly(&self, name: &str) {
        let options = RemoveContainerOptions {
            force: true,
            ..Default::default()
        };
        match self.docker.remove_container(name, Some(options)).await {
            Ok(()) => debug!("Removed container {}", name),
            Err(e) if is_not_found(&e) || is_conflict(&e) => {}
            Err(e) => warn!("Failed to remove container {}: {}", name, e),
        }
    }
}

/// Envelope for a container that ran to completion. An unknown exit status
/// is a failure: the code may have exited non-zero.
fn exit_result(exit_code: Option<i64>, stdout: String, stderr: String) -> ExecutionResult {
    match exit_code {
        Some(0) => normalize(RawOutput::new(stdout, stderr).with_exit_code(0), true),
        Some(code) => {
            let error = exit_error_message(&stderr, Some(code));
            normalize_failure(RawOutput::new(stdout, stderr).with_exit_code(code), error)
        }
        None => normalize_failure(
            RawOutput::new(stdout, stderr),
            "Exit status unavailable: the container was removed before it could be read",
        ),
    }
}

/// Wait for the container to be removed and return its exit code.
///
/// `None` when the container was already gone before the wait registered.
async fn wait_exit_code(docker: &Docker, name: &str) -> Result<Option<i64>> {
    let options = WaitContainerOptions {
        condition: "removed",
    };
    let mut stream = docker.wait_container(name, Some(options));

    match stream.next().await {
        Some(Ok(response)) => Ok(Some(response.status_code)),
        // The client reports non-zero exits as errors
        Some(Err(BollardError::DockerContainerWaitError { code, .. })) => Ok(Some(code)),
        Some(Err(e)) if is_not_found(&e) => {
            debug!("Container {} was removed before the wait registered", name);
            Ok(None)
        }
        Some(Err(e)) => Err(translate_error(e)),
        None => Ok(None),
    }
}

#[async_trait]
impl CodeExecutor for ContainerExecutor {
    fn name(&self) -> &str {
        "container"
    }

    async fn execute(&self, request: ExecutionRequest) -> Result<ExecutionResult> {
        if let Err(e) = request.validate() {
            return Ok(normalize_failure(RawOutput::default(), e.to_string()));
        }

        match self.run_container(&request).await {
            Ok(result) => Ok(result),
            // Engine and image problems are the caller's to handle
            Err(e @ (Error::EngineUnavailable(_) | Error::ImageNotFound(_))) => Err(e),
            Err(e) => Ok(normalize_failure(RawOutput::default(), e.to_string())),
        }
    }
}
