//! In-memory image backend and native builder for flow tests.

#![allow(dead_code)]

use finder_release::backend::{
    BuildRequest, ImageBackend, ImageId, ManifestRequest, NativeBuildOutput, NativeBuilder,
    Removal, VolumeBinding,
};
use finder_release::config::{ConfigOverrides, OrchestratorConfig};
use finder_release::context::RunContext;
use finder_release::error::{ReleaseError, Result};
use finder_release::gate::{Credential, DEFAULT_TOKEN_VAR, PushGate};
use finder_release::descriptor::ignore_file_name;
use finder_release::identity::RunIdentity;
use finder_release::target::TargetMatrix;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use std::time::Duration;

/// Name of the file every extraction container writes
pub const ARTIFACT_NAME: &str = "agent-integrations-finder";

/// One recorded backend call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Build {
        label: String,
        platform: Option<String>,
        tags: Vec<String>,
    },
    Run {
        image: String,
    },
    Push(String),
    Login(String),
    Remove(String),
    Manifest {
        platforms: Vec<String>,
        tags: Vec<String>,
    },
}

/// Records every call and keeps a set of "local images".
#[derive(Debug, Default)]
pub struct FakeBackend {
    calls: Mutex<Vec<Call>>,
    images: Mutex<BTreeSet<String>>,
    failing_builds: BTreeSet<String>,
    build_delay: Option<Duration>,
    requires_native_output: bool,
    ignore_rules: Mutex<Vec<String>>,
}

impl FakeBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds whose label is `label` fail.
    pub fn failing_build(mut self, label: &str) -> Self {
        self.failing_builds.insert(label.to_string());
        self
    }

    /// Every build sleeps this long before succeeding.
    pub fn with_build_delay(mut self, delay: Duration) -> Self {
        self.build_delay = Some(delay);
        self
    }

    /// Platform-pinned builds and manifests fail unless the native output they
    /// read from the context is present when they finish.
    pub fn requiring_native_output(mut self) -> Self {
        self.requires_native_output = true;
        self
    }

    /// Contents of the descriptor ignore files seen during builds.
    pub fn ignore_rules(&self) -> Vec<String> {
        self.ignore_rules.lock().expect("ignore rules lock").clone()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn build_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|c| matches!(c, Call::Build { .. } | Call::Manifest { .. }))
            .count()
    }

    pub fn images(&self) -> BTreeSet<String> {
        self.images.lock().expect("images lock").clone()
    }

    pub fn has_image(&self, name: &str) -> bool {
        self.images().contains(name)
    }

    fn record(&self, call: Call) {
        self.calls.lock().expect("calls lock").push(call);
    }
}

impl ImageBackend for FakeBackend {
    async fn build(&self, request: &BuildRequest) -> Result<ImageId> {
        self.record(Call::Build {
            label: request.label.clone(),
            platform: request.platform.clone(),
            tags: request.tags.clone(),
        });
        assert!(
            request.descriptor.is_file() || request.descriptor.ends_with("Dockerfile"),
            "descriptor {} must exist while building",
            request.descriptor.display()
        );
        if let Some(name) = request.descriptor.file_name().and_then(|n| n.to_str())
            && let Ok(rules) =
                std::fs::read_to_string(request.descriptor.with_file_name(ignore_file_name(name)))
        {
            self.ignore_rules.lock().expect("ignore rules lock").push(rules);
        }

        if let Some(delay) = self.build_delay {
            tokio::time::sleep(delay).await;
        }
        if self.requires_native_output
            && let Some(platform) = &request.platform
        {
            require_native_output(&request.context, platform)?;
        }
        if self.failing_builds.contains(&request.label) {
            return Err(ReleaseError::execution_failed(
                "docker build",
                format!("simulated failure for {}", request.label),
            ));
        }

        let mut images = self.images.lock().expect("images lock");
        images.extend(request.tags.iter().cloned());
        Ok(ImageId(format!("sha256:{}", request.label)))
    }

    async fn run(&self, image: &str, binding: &VolumeBinding) -> Result<i32> {
        self.record(Call::Run {
            image: image.to_string(),
        });
        // Let concurrent extractions interleave
        tokio::task::yield_now().await;
        write_artifacts(&binding.host, image)?;
        Ok(0)
    }

    async fn push(&self, reference: &str) -> Result<()> {
        self.record(Call::Push(reference.to_string()));
        Ok(())
    }

    async fn login(&self, registry: &str, _credential: &Credential) -> Result<()> {
        self.record(Call::Login(registry.to_string()));
        Ok(())
    }

    async fn remove_image(&self, name: &str) -> Result<Removal> {
        self.record(Call::Remove(name.to_string()));
        let removed = self.images.lock().expect("images lock").remove(name);
        Ok(if removed {
            Removal::Removed
        } else {
            Removal::Absent
        })
    }

    async fn build_manifest(&self, request: &ManifestRequest) -> Result<()> {
        self.record(Call::Manifest {
            platforms: request.platforms.clone(),
            tags: request.tags.clone(),
        });
        if self.requires_native_output {
            for platform in &request.platforms {
                require_native_output(&request.context, platform)?;
            }
        }
        Ok(())
    }
}

/// `dist/linux/{arch}/agent-integrations-finder` must exist for `platform`.
fn require_native_output(context: &Path, platform: &str) -> Result<()> {
    let arch = match platform {
        "linux/amd64" => "x86_64",
        "linux/arm64" => "aarch64",
        other => panic!("unexpected platform {}", other),
    };
    let binary = context.join("dist").join("linux").join(arch).join(ARTIFACT_NAME);
    if binary.is_file() {
        Ok(())
    } else {
        Err(ReleaseError::execution_failed(
            "docker build",
            format!("{} is missing from the context", binary.display()),
        ))
    }
}

/// Every container writes the same relative paths; contents name the image.
fn write_artifacts(host: &Path, image: &str) -> Result<()> {
    std::fs::create_dir_all(host.join("lib"))?;
    std::fs::write(host.join(ARTIFACT_NAME), image)?;
    std::fs::write(host.join("lib").join("shared.txt"), image)?;
    Ok(())
}

/// Native builder that records invocations, writes a one-file output under
/// `{root}/dist/{platform}/{arch}` and fails for chosen arguments.
#[derive(Debug)]
pub struct FakeNativeBuilder {
    root: PathBuf,
    invocations: Mutex<Vec<String>>,
    failing: BTreeSet<String>,
}

impl FakeNativeBuilder {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            invocations: Mutex::default(),
            failing: BTreeSet::new(),
        }
    }

    pub fn failing(mut self, target_argument: &str) -> Self {
        self.failing.insert(target_argument.to_string());
        self
    }

    pub fn invocations(&self) -> Vec<String> {
        self.invocations.lock().expect("invocations lock").clone()
    }
}

impl NativeBuilder for FakeNativeBuilder {
    async fn invoke(&self, target_argument: &str) -> Result<NativeBuildOutput> {
        self.invocations
            .lock()
            .expect("invocations lock")
            .push(target_argument.to_string());
        if self.failing.contains(target_argument) {
            return Err(ReleaseError::execution_failed(
                format!("build.py {}", target_argument),
                "exit code 1",
            ));
        }
        let key = TargetMatrix::parse(target_argument)?;
        let output_dir = self.root.join(TargetMatrix::resolve(&key)?.native_dist_dir());
        std::fs::create_dir_all(&output_dir)?;
        std::fs::write(output_dir.join(ARTIFACT_NAME), target_argument)?;
        Ok(NativeBuildOutput { output_dir })
    }
}

pub fn snapshot() -> RunIdentity {
    RunIdentity::new("8be54df8", None).expect("valid identity")
}

pub fn release() -> RunIdentity {
    RunIdentity::new("8be54df8", Some("v1.0.0".to_string())).expect("valid identity")
}

/// Configuration rooted in `root`, with the given timeouts.
pub fn config_in(root: &Path, build_timeout_secs: u64) -> OrchestratorConfig {
    OrchestratorConfig::resolve(
        None,
        ConfigOverrides {
            context: Some(root.to_path_buf()),
            package_dir: Some(root.join("packages")),
            work_dir: Some(root.join("work")),
            parallelism: Some(4),
            build_timeout_secs: Some(build_timeout_secs),
            push_timeout_secs: Some(60),
            ..ConfigOverrides::default()
        },
    )
    .expect("valid test configuration")
}

pub fn context(
    root: &Path,
    identity: RunIdentity,
    credential: Option<Credential>,
) -> RunContext {
    RunContext::new(
        identity,
        PushGate::new(credential, DEFAULT_TOKEN_VAR),
        config_in(root, 60),
    )
}

pub fn credential() -> Credential {
    Credential::new("bot", "s3cret")
}
