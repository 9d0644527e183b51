//! Native packager invoked as a subprocess.

use super::{NativeBuildOutput, NativeBuilder};
use crate::error::{ReleaseError, Result};
use crate::target::TargetMatrix;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Runs `{program…} {target_argument}` in `working_dir`.
///
/// The packager writes into `dist/{platform}/{arch}` below its working
/// directory; that path is what [`NativeBuilder::invoke`] reports.
#[derive(Debug, Clone)]
pub struct CommandNativeBuilder {
    program: Vec<String>,
    working_dir: PathBuf,
}

impl CommandNativeBuilder {
    /// Creates a builder. `program` must contain at least the executable.
    pub fn new(program: Vec<String>, working_dir: impl Into<PathBuf>) -> Result<Self> {
        if program.is_empty() {
            return Err(crate::error::ConfigError::InvalidValue {
                field: "native_command".to_string(),
                reason: "command must not be empty".to_string(),
            }
            .into());
        }
        Ok(Self {
            program,
            working_dir: working_dir.into(),
        })
    }

    fn command_line(&self, target_argument: &str) -> String {
        format!("{} {}", self.program.join(" "), target_argument)
    }
}

impl NativeBuilder for CommandNativeBuilder {
    async fn invoke(&self, target_argument: &str) -> Result<NativeBuildOutput> {
        let spec = TargetMatrix::resolve(&TargetMatrix::parse(target_argument)?)?;
        let command_line = self.command_line(target_argument);
        log::info!("Native build: {}", command_line);

        let mut child = Command::new(&self.program[0])
            .args(&self.program[1..])
            .arg(target_argument)
            .current_dir(&self.working_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| ReleaseError::execution_failed(&command_line, e.to_string()))?;

        let stderr_handle = child.stderr.take().map(|stderr| {
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                let mut captured = Vec::new();
                while let Ok(Some(line)) = lines.next_line().await {
                    captured.push(line);
                }
                captured
            })
        });

        if let Some(stdout) = child.stdout.take() {
            let mut lines = BufReader::new(stdout).lines();
            while let Ok(Some(line)) = lines.next_line().await {
                log::info!("[{}] {}", target_argument, line);
            }
        }

        let status = child
            .wait()
            .await
            .map_err(|e| ReleaseError::execution_failed(&command_line, e.to_string()))?;

        if !status.success() {
            let stderr = match stderr_handle {
                Some(handle) => handle.await.unwrap_or_default(),
                None => Vec::new(),
            };
            return Err(ReleaseError::execution_failed(
                command_line,
                format!(
                    "exit code {}\n{}",
                    status.code().unwrap_or(-1),
                    stderr.join("\n")
                ),
            ));
        }

        Ok(NativeBuildOutput {
            output_dir: self.working_dir.join(spec.native_dist_dir()),
        })
    }
}
