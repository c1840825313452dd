//! Isolated out-of-process code runners
//!
//! [`DockerSandbox`] runs each snippet in a throwaway container with no
//! network, a read-only root filesystem, a small no-exec scratch tmpfs, the
//! `nobody` user, every capability dropped and privilege escalation disabled.

use std::path::{Path, PathBuf};
use std::process::{Output, Stdio};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::task::JoinHandle;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use super::policy::ExecutionPolicy;
use crate::config::SandboxConfig;
use crate::error::SandboxFailure;

/// Separator placed between stdout and stderr in merged output
pub const STDERR_MARKER: &str = "\n--- STDERR ---\n";

/// Timeout for runtime probes (`--version`, image inspect, kill)
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);

/// How long a pipe may stay open after its process is gone
const PIPE_DRAIN: Duration = Duration::from_millis(500);

/// Exit code the container runtime uses for its own failures
const RUNTIME_ERROR_EXIT: i32 = 125;

/// Exit code of a container killed by the OOM killer (128 + SIGKILL)
const OOM_KILL_EXIT: i32 = 137;

/// Captured result of a run that exited on its own
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SandboxOutput {
    /// stdout, then stderr after [`STDERR_MARKER`]
    pub output: String,
    pub exit_code: i32,
}

/// A runner for untrusted code
#[async_trait]
pub trait Sandbox: Send + Sync {
    /// Run `code` under `policy`, blocking until it exits or times out
    async fn run(&self, code: &str, policy: &ExecutionPolicy) -> Result<SandboxOutput, SandboxFailure>;

    /// Check that the isolation runtime can be reached
    async fn health_check(&self) -> Result<(), SandboxFailure>;

    fn name(&self) -> &'static str;
}

/// Container-backed sandbox using the docker CLI
#[derive(Debug, Clone)]
pub struct DockerSandbox {
    runtime: String,
    image: String,
    scratch_dir: PathBuf,
}

impl DockerSandbox {
    pub fn new(config: &SandboxConfig) -> Self {
        Self {
            runtime: config.runtime.clone(),
            image: config.image.clone(),
            scratch_dir: std::env::temp_dir(),
        }
    }

    async fn kill_container(&self, name: &str) {
        let mut command = Command::new(&self.runtime);
        command.args(["kill", name]);
        if let Err(e) = run_with_timeout(command, PROBE_TIMEOUT).await {
            debug!(container = name, error = %e, "Container kill failed");
        }
    }
}

#[async_trait]
impl Sandbox for DockerSandbox {
    #[instrument(skip(self, code), fields(bytes = code.len(), timeout_secs = policy.timeout_secs()))]
    async fn run(&self, code: &str, policy: &ExecutionPolicy) -> Result<SandboxOutput, SandboxFailure> {
        let run_id = Uuid::new_v4().simple().to_string();
        let script = ScratchFile::create(&self.scratch_dir, &run_id, code).await?;
        let container = format!("classroom-exec-{}", run_id);

        let mut command = Command::new(&self.runtime);
        command.args(docker_args(policy, &self.image, script.path(), &container));

        let result = run_with_timeout(command, policy.timeout).await;
        if matches!(result, Err(SandboxFailure::Timeout { .. })) {
            // Killing the CLI client leaves the container running
            self.kill_container(&container).await;
        }

        classify(result?)
    }

    async fn health_check(&self) -> Result<(), SandboxFailure> {
        let mut version = Command::new(&self.runtime);
        version.arg("--version");
        let output = run_with_timeout(version, PROBE_TIMEOUT).await.map_err(|e| {
            SandboxFailure::Unavailable(format!("{} is not available: {}", self.runtime, e))
        })?;
        if !output.status.success() {
            return Err(SandboxFailure::Unavailable(format!(
                "{} is not available",
                self.runtime
            )));
        }

        let mut inspect = Command::new(&self.runtime);
        inspect.args(["image", "inspect", self.image.as_str()]);
        let output = run_with_timeout(inspect, PROBE_TIMEOUT).await?;
        if !output.status.success() {
            return Err(SandboxFailure::Unavailable(format!(
                "{} image not found, please run: {} pull {}",
                self.image, self.runtime, self.image
            )));
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "docker"
    }
}

/// Arguments for `docker run` enforcing the policy's containment
pub fn docker_args(
    policy: &ExecutionPolicy,
    image: &str,
    script: &Path,
    container: &str,
) -> Vec<String> {
    let file_name = script
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "main.py".to_string());
    let in_container = format!("/app/{}", file_name);

    let mut args: Vec<String> = ["run", "--rm", "--name", container]
        .iter()
        .map(|arg| arg.to_string())
        .collect();
    if !policy.network {
        args.push("--network".to_string());
        args.push("none".to_string());
    }
    args.extend(
        [
            "--read-only",
            "--tmpfs",
            "/tmp:rw,noexec,nosuid,size=10m",
            "--user",
            "nobody",
            "--cap-drop",
            "ALL",
            "--security-opt",
            "no-new-privileges",
        ]
        .iter()
        .map(|arg| arg.to_string()),
    );
    if policy.memory_mb > 0 {
        args.push("--memory".to_string());
        args.push(format!("{}m", policy.memory_mb));
    }
    if policy.cpus > 0.0 {
        args.push("--cpus".to_string());
        args.push(format!("{:.2}", policy.cpus));
    }
    args.push("-v".to_string());
    args.push(format!("{}:{}:ro", script.display(), in_container));
    args.push(image.to_string());
    args.push("python".to_string());
    args.push(in_container);

    args
}

/// Map a finished run onto its outcome
///
/// Any exit code the program chose is a normal completion. Only a runtime
/// failure, an OOM kill or death by signal is a failure, and the latter two
/// keep whatever was printed.
fn classify(output: Output) -> Result<SandboxOutput, SandboxFailure> {
    let merged = merge_output(&output.stdout, &output.stderr);
    match output.status.code() {
        Some(RUNTIME_ERROR_EXIT) => Err(SandboxFailure::Unavailable(
            String::from_utf8_lossy(&output.stderr).trim().to_string(),
        )),
        Some(OOM_KILL_EXIT) => Err(SandboxFailure::AbnormalExit {
            code: OOM_KILL_EXIT,
            output: merged,
        }),
        Some(code) => Ok(SandboxOutput {
            output: merged,
            exit_code: code,
        }),
        None => Err(SandboxFailure::AbnormalExit {
            code: -1,
            output: merged,
        }),
    }
}

/// Concatenate stdout and stderr; the marker only appears when both are present
pub fn merge_output(stdout: &[u8], stderr: &[u8]) -> String {
    let mut merged = String::from_utf8_lossy(stdout).into_owned();
    if !stderr.is_empty() {
        if !merged.is_empty() {
            merged.push_str(STDERR_MARKER);
        }
        merged.push_str(&String::from_utf8_lossy(stderr));
    }
    merged
}

/// Spawn `command` and wait for it, killing the child if `limit` elapses
///
/// On timeout the output read so far is kept in the failure.
pub async fn run_with_timeout(mut command: Command, limit: Duration) -> Result<Output, SandboxFailure> {
    command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true);

    let mut child = command.spawn().map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => SandboxFailure::Unavailable(e.to_string()),
        _ => SandboxFailure::Spawn(e.to_string()),
    })?;

    let stdout = PipeCapture::spawn(child.stdout.take());
    let stderr = PipeCapture::spawn(child.stderr.take());

    let waited = tokio::time::timeout(limit, child.wait()).await;
    match waited {
        Ok(Ok(status)) => Ok(Output {
            status,
            stdout: stdout.finish().await,
            stderr: stderr.finish().await,
        }),
        Ok(Err(e)) => Err(SandboxFailure::Spawn(e.to_string())),
        Err(_) => {
            warn!(timeout_secs = limit.as_secs(), "Sandboxed process timed out");
            if let Err(e) = child.kill().await {
                debug!(error = %e, "Failed to kill timed out process");
            }
            let stdout = stdout.finish().await;
            let stderr = stderr.finish().await;
            Err(SandboxFailure::Timeout {
                seconds: limit.as_secs(),
                output: merge_output(&stdout, &stderr),
            })
        }
    }
}

/// Background reader for one child pipe that keeps what it has read so far
struct PipeCapture {
    buffer: Arc<Mutex<Vec<u8>>>,
    task: Option<JoinHandle<()>>,
}

impl PipeCapture {
    fn spawn<R>(pipe: Option<R>) -> Self
    where
        R: AsyncRead + Unpin + Send + 'static,
    {
        let buffer = Arc::new(Mutex::new(Vec::new()));
        let task = pipe.map(|mut pipe| {
            let buffer = buffer.clone();
            tokio::spawn(async move {
                let mut chunk = vec![0u8; 8192];
                loop {
                    match pipe.read(&mut chunk).await {
                        Ok(0) => break,
                        Ok(n) => buffer.lock().extend_from_slice(&chunk[..n]),
                        Err(e) => {
                            debug!(error = %e, "Pipe read failed");
                            break;
                        }
                    }
                }
            })
        });

        Self { buffer, task }
    }

    /// Wait briefly for EOF, then take everything captured
    ///
    /// A grandchild holding the pipe open must not stall the caller.
    async fn finish(mut self) -> Vec<u8> {
        if let Some(task) = self.task.take() {
            let abort = task.abort_handle();
            if tokio::time::timeout(PIPE_DRAIN, task).await.is_err() {
                abort.abort();
            }
        }
        std::mem::take(&mut *self.buffer.lock())
    }
}

/// Source file mounted into the container, removed on drop
struct ScratchFile {
    path: PathBuf,
}

impl ScratchFile {
    async fn create(dir: &Path, run_id: &str, code: &str) -> Result<Self, SandboxFailure> {
        let path = dir.join(format!("python_exec_{}.py", run_id));
        tokio::fs::write(&path, code)
            .await
            .map_err(|e| SandboxFailure::Spawn(format!("failed to write script: {}", e)))?;
        Ok(Self { path })
    }

    fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for ScratchFile {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            debug!(path = %self.path.display(), error = %e, "Failed to remove script");
        }
    }
}
