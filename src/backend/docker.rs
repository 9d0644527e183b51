//! Docker CLI implementation of the image backend.
//!
//! Every invocation streams stdout into the log, keeps stderr for error
//! reports, and is spawned with `kill_on_drop` so that a caller-side timeout or
//! an operator interrupt terminates the underlying `docker` process.

use super::limits::ContainerLimits;
use super::{BuildRequest, ImageBackend, ImageId, ManifestRequest, Removal, VolumeBinding};
use crate::error::{ReleaseError, Result};
use crate::gate::Credential;
use std::process::{ExitStatus, Stdio};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::time::timeout;
use uuid::Uuid;

/// Timeout for Docker info check (5 seconds)
/// Quick daemon availability check shouldn't take long
pub const DOCKER_INFO_TIMEOUT: Duration = Duration::from_secs(5);

/// Timeout for local image queries and removals
const DOCKER_QUERY_TIMEOUT: Duration = Duration::from_secs(30);

/// Lines of stderr kept for error messages
const STDERR_TAIL_LINES: usize = 40;

/// Platform-specific Docker startup instructions
#[cfg(target_os = "macos")]
const DOCKER_START_HELP: &str = "Start Docker Desktop from Applications or Spotlight";

#[cfg(target_os = "linux")]
const DOCKER_START_HELP: &str = "Start Docker daemon: sudo systemctl start docker";

#[cfg(target_os = "windows")]
const DOCKER_START_HELP: &str = "Start Docker Desktop from the Start menu";

#[cfg(not(any(target_os = "macos", target_os = "linux", target_os = "windows")))]
const DOCKER_START_HELP: &str = "Start the Docker daemon";

/// Checks if Docker is installed and the daemon is running.
pub async fn check_docker_available() -> Result<()> {
    if let Err(e) = which::which("docker") {
        return Err(ReleaseError::execution_failed(
            "docker",
            format!(
                "Docker command not found: {}\n\
                 \n\
                 Docker does not appear to be installed.\n\
                 Install from: https://docs.docker.com/get-docker/",
                e
            ),
        ));
    }

    let status_result = timeout(
        DOCKER_INFO_TIMEOUT,
        Command::new("docker")
            .arg("info")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(true)
            .status(),
    )
    .await;

    match status_result {
        Err(_) => Err(ReleaseError::execution_failed(
            "docker info",
            format!(
                "Docker daemon check timed out after {} seconds.\n\
                 {}",
                DOCKER_INFO_TIMEOUT.as_secs(),
                DOCKER_START_HELP
            ),
        )),
        Ok(Ok(status)) if status.success() => Ok(()),
        Ok(Ok(status)) => Err(ReleaseError::execution_failed(
            "docker info",
            format!(
                "Docker daemon is not responding (exit code: {}).\n\
                 {}",
                status.code().unwrap_or(-1),
                DOCKER_START_HELP
            ),
        )),
        Ok(Err(e)) => Err(ReleaseError::execution_failed("docker info", e.to_string())),
    }
}

/// Captured result of one `docker` invocation.
#[derive(Debug)]
struct DockerOutcome {
    status: ExitStatus,
    stdout: Vec<String>,
    stderr: Vec<String>,
}

impl DockerOutcome {
    fn stderr_tail(&self) -> String {
        let skip = self.stderr.len().saturating_sub(STDERR_TAIL_LINES);
        self.stderr[skip..].join("\n")
    }

    fn failure(&self, command: &str) -> ReleaseError {
        let stderr = self.stderr_tail();
        ReleaseError::execution_failed(
            command,
            format!(
                "exit code {}{}",
                self.status.code().unwrap_or(-1),
                if stderr.is_empty() {
                    String::new()
                } else {
                    format!("\nstderr:\n{}", stderr)
                }
            ),
        )
    }
}

/// Image backend driving the Docker CLI.
#[derive(Debug, Clone)]
pub struct DockerBackend {
    limits: ContainerLimits,
}

impl DockerBackend {
    /// Creates a backend applying `limits` to every container it runs.
    pub fn with_limits(limits: ContainerLimits) -> Self {
        Self { limits }
    }

    /// Resource limits applied to extraction containers
    pub fn limits(&self) -> &ContainerLimits {
        &self.limits
    }

    /// Spawns `docker {args}`, streaming stdout into the log under `label`.
    async fn docker(&self, label: &str, args: &[String], stdin: Option<&str>) -> Result<DockerOutcome> {
        log::debug!("[{}] docker {}", label, args.join(" "));

        let mut child = Command::new("docker")
            .args(args)
            .stdin(if stdin.is_some() {
                Stdio::piped()
            } else {
                Stdio::null()
            })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReleaseError::execution_failed(format!("docker {}", args[0]), e.to_string()))?;

        if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
            pipe.write_all(input.as_bytes()).await?;
            // Closing stdin signals end of input
            drop(pipe);
        }

        // Background task to capture stderr while stdout streams in the foreground
        let stderr_label = label.to_string();
        let stderr_handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut captured = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    log::debug!("[{}] {}", stderr_label, line);
                    captured.push(line);
                }
                captured
            })
        });

        let mut stdout_lines = Vec::new();
        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::info!("[{}] {}", label, line);
                stdout_lines.push(line);
            }
        }

        let status = child.wait().await.map_err(|e| {
            ReleaseError::execution_failed(format!("docker {}", args[0]), e.to_string())
        })?;

        let stderr = match stderr_handle {
            Some(handle) => handle.await.unwrap_or_default(),
            None => Vec::new(),
        };

        Ok(DockerOutcome {
            status,
            stdout: stdout_lines,
            stderr,
        })
    }

    /// Whether a local image with this name exists.
    async fn image_exists(&self, name: &str) -> Result<bool> {
        let args = vec![
            "image".to_string(),
            "inspect".to_string(),
            "--format".to_string(),
            "{{.Id}}".to_string(),
            name.to_string(),
        ];
        let outcome = timeout(DOCKER_QUERY_TIMEOUT, self.docker(name, &args, None))
            .await
            .map_err(|_| {
                ReleaseError::execution_failed(
                    "docker image inspect",
                    format!("timed out after {} seconds", DOCKER_QUERY_TIMEOUT.as_secs()),
                )
            })??;
        Ok(outcome.status.success())
    }

    fn run_args(&self, container_name: &str, image: &str, binding: &VolumeBinding) -> Vec<String> {
        let mut args = vec![
            "run".to_string(),
            "--name".to_string(),
            container_name.to_string(),
            "--rm".to_string(),
            // The run only copies staged files out
            "--network".to_string(),
            "none".to_string(),
            "--security-opt".to_string(),
            "no-new-privileges".to_string(),
            "--cap-drop".to_string(),
            "ALL".to_string(),
            "--memory".to_string(),
            self.limits.memory.clone(),
            "--memory-swap".to_string(),
            self.limits.memory_swap.clone(),
            "--cpus".to_string(),
            self.limits.cpus.clone(),
            "--pids-limit".to_string(),
            self.limits.pids_limit.to_string(),
            "-v".to_string(),
            format!("{}:{}:rw", binding.host.display(), binding.container),
        ];

        // Files written to the bind mount belong to the invoking user
        #[cfg(unix)]
        {
            args.push("--user".to_string());
            args.push(format!(
                "{}:{}",
                users::get_current_uid(),
                users::get_current_gid()
            ));
        }

        args.push(image.to_string());
        args
    }
}

impl ImageBackend for DockerBackend {
    async fn build(&self, request: &BuildRequest) -> Result<ImageId> {
        let primary = request.tags.first().ok_or_else(|| {
            ReleaseError::execution_failed("docker build", "no image name given")
        })?;

        let mut args = vec!["build".to_string()];
        if let Some(platform) = &request.platform {
            args.push("--platform".to_string());
            args.push(platform.clone());
        }
        args.push("-f".to_string());
        args.push(request.descriptor.display().to_string());
        for tag in &request.tags {
            args.push("-t".to_string());
            args.push(tag.clone());
        }
        args.push(request.context.display().to_string());

        let outcome = self.docker(&request.label, &args, None).await?;
        if !outcome.status.success() {
            return Err(outcome.failure(&format!("docker build {}", primary)));
        }

        let inspect = self
            .docker(
                &request.label,
                &[
                    "image".to_string(),
                    "inspect".to_string(),
                    "--format".to_string(),
                    "{{.Id}}".to_string(),
                    primary.clone(),
                ],
                None,
            )
            .await?;
        if !inspect.status.success() {
            return Err(inspect.failure(&format!("docker image inspect {}", primary)));
        }

        let id = inspect
            .stdout
            .first()
            .map(|line| line.trim().to_string())
            .unwrap_or_else(|| primary.clone());
        Ok(ImageId(id))
    }

    async fn run(&self, image: &str, binding: &VolumeBinding) -> Result<i32> {
        let container_name = format!("finder-release-extract-{}", Uuid::new_v4());
        let args = self.run_args(&container_name, image, binding);
        let outcome = self.docker(image, &args, None).await?;
        if !outcome.status.success() {
            log::warn!(
                "Container {} exited with {}: {}",
                container_name,
                outcome.status.code().unwrap_or(-1),
                outcome.stderr_tail()
            );
        }
        Ok(outcome.status.code().unwrap_or(-1))
    }

    async fn push(&self, reference: &str) -> Result<()> {
        let args = vec!["push".to_string(), reference.to_string()];
        let outcome = self.docker(reference, &args, None).await?;
        if !outcome.status.success() {
            return Err(outcome.failure(&format!("docker push {}", reference)));
        }
        Ok(())
    }

    async fn login(&self, registry: &str, credential: &Credential) -> Result<()> {
        let args = vec![
            "login".to_string(),
            registry.to_string(),
            "--username".to_string(),
            credential.username.clone(),
            "--password-stdin".to_string(),
        ];
        let outcome = self.docker(registry, &args, Some(credential.token())).await?;
        if !outcome.status.success() {
            return Err(crate::error::GateError::LoginFailed {
                registry: registry.to_string(),
                reason: outcome.stderr_tail(),
            }
            .into());
        }
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<Removal> {
        if !self.image_exists(name).await? {
            return Ok(Removal::Absent);
        }

        let args = vec![
            "image".to_string(),
            "rm".to_string(),
            "--force".to_string(),
            name.to_string(),
        ];
        let outcome = timeout(DOCKER_QUERY_TIMEOUT, self.docker(name, &args, None))
            .await
            .map_err(|_| {
                ReleaseError::execution_failed(
                    format!("docker image rm {}", name),
                    format!("timed out after {} seconds", DOCKER_QUERY_TIMEOUT.as_secs()),
                )
            })??;

        if outcome.status.success() {
            Ok(Removal::Removed)
        } else if outcome.stderr.iter().any(|l| l.contains("No such image")) {
            // Removed concurrently between inspect and rm
            Ok(Removal::Absent)
        } else {
            Err(outcome.failure(&format!("docker image rm {}", name)))
        }
    }

    async fn build_manifest(&self, request: &ManifestRequest) -> Result<()> {
        let primary = request.tags.first().ok_or_else(|| {
            ReleaseError::execution_failed("docker buildx build", "no manifest name given")
        })?;

        let mut args = vec![
            "buildx".to_string(),
            "build".to_string(),
            "--platform".to_string(),
            request.platforms.join(","),
            "-f".to_string(),
            request.descriptor.display().to_string(),
        ];
        for tag in &request.tags {
            args.push("-t".to_string());
            args.push(tag.clone());
        }
        args.push("--push".to_string());
        args.push(request.context.display().to_string());

        let outcome = self.docker("manifest", &args, None).await?;
        if !outcome.status.success() {
            return Err(crate::error::PublishError::ManifestFailed {
                reference: primary.clone(),
                reason: outcome.stderr_tail(),
            }
            .into());
        }
        Ok(())
    }
}
