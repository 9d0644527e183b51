//! Scripted backend and native builder for command-level unit tests.

use super::{
    BuildRequest, ImageBackend, ImageId, ManifestRequest, NativeBuildOutput, NativeBuilder,
    Removal, VolumeBinding,
};
use crate::error::{ReleaseError, Result};
use crate::gate::Credential;
use crate::target::TargetMatrix;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

/// Records an ordered event log.
#[derive(Debug, Default)]
pub(crate) struct ScriptedBackend {
    events: Mutex<Vec<String>>,
    build_delay: Option<Duration>,
    failing_removals: bool,
}

/// Logs `build stopped` when a build future ends, however it ends.
struct BuildStopped<'a> {
    events: &'a Mutex<Vec<String>>,
    label: String,
}

impl Drop for BuildStopped<'_> {
    fn drop(&mut self) {
        if let Ok(mut events) = self.events.lock() {
            events.push(format!("build stopped {}", self.label));
        }
    }
}

impl ScriptedBackend {
    pub(crate) fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    pub(crate) fn with_failing_removals(mut self) -> Self {
        self.failing_removals = true;
        self
    }

    pub(crate) fn events(&self) -> Vec<String> {
        self.events.lock().map(|e| e.clone()).unwrap_or_default()
    }

    fn record(&self, event: String) {
        if let Ok(mut events) = self.events.lock() {
            events.push(event);
        }
    }
}

impl ImageBackend for ScriptedBackend {
    async fn build(&self, request: &BuildRequest) -> Result<ImageId> {
        self.record(format!("build started {}", request.label));
        let _stopped = BuildStopped {
            events: &self.events,
            label: request.label.clone(),
        };
        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        Ok(ImageId(format!("sha256:{}", request.label)))
    }

    async fn run(&self, image: &str, _binding: &VolumeBinding) -> Result<i32> {
        self.record(format!("run {}", image));
        Ok(0)
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.record(format!("push {}", reference));
        Ok(())
    }

    async fn login(&self, registry: &str, _credential: &Credential) -> Result<()> {
        self.record(format!("login {}", registry));
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<Removal> {
        self.record(format!("remove {}", name));
        if self.failing_removals {
            return Err(ReleaseError::execution_failed(
                format!("docker rmi {}", name),
                "permission denied",
            ));
        }
        Ok(Removal::Absent)
    }

    async fn build_manifest(&self, request: &ManifestRequest) -> Result<()> {
        self.record(format!("manifest {}", request.tags.join(",")));
        Ok(())
    }
}

/// Writes a one-file native output under `root` for every invocation.
#[derive(Debug)]
pub(crate) struct ScriptedNative {
    pub(crate) root: PathBuf,
}

impl NativeBuilder for ScriptedNative {
    async fn invoke(&self, target_argument: &str) -> Result<NativeBuildOutput> {
        let key = TargetMatrix::parse(target_argument)?;
        let output_dir = self.root.join(TargetMatrix::resolve(&key)?.native_dist_dir());
        std::fs::create_dir_all(&output_dir)?;
        std::fs::write(output_dir.join("agent-integrations-finder"), target_argument)?;
        Ok(NativeBuildOutput { output_dir })
    }
}
