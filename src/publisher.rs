//! Multi-architecture image publish flow.
//!
//! For each architecture: run the native build on the host, then build a
//! platform-pinned image of the tool tagged per the tag policy. After every
//! architecture has finished, the multi-platform manifest is built and pushed
//! in one operation, but only if every architecture succeeded.
//!
//! The native packager writes into a `dist/` tree inside the build context that
//! every architecture shares, and it may wipe that tree when it starts. One
//! architecture at a time therefore holds the host workspace, from its native
//! build until its image is built. Each native output is also copied under
//! [`OrchestratorConfig::native_snapshot_root`] and put back before the
//! manifest build, which reads all of them at once.
//!
//! [`OrchestratorConfig::native_snapshot_root`]: crate::config::OrchestratorConfig::native_snapshot_root

use crate::backend::{BuildRequest, ImageBackend, ManifestRequest, NativeBuilder};
use crate::context::RunContext;
use crate::error::{BuildStage, PublishError, ReleaseError, Result, TargetError};
use crate::extract::merge_tree;
use crate::fanout::{FanOutSummary, run_bounded, with_timeout};
use crate::tags::ImageReference;
use crate::target::{Arch, TargetMatrix};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::Mutex;

/// What a publish run does.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishPlan {
    /// Architectures to build, in manifest order
    pub architectures: Vec<Arch>,
    /// Build per-architecture images locally
    pub build_images: bool,
    /// Build and push the multi-platform manifest
    pub push_manifest: bool,
    /// Push each architecture's tags individually
    pub push_arch_tags: bool,
}

impl PublishPlan {
    /// Local images only, nothing leaves the machine.
    pub fn local(architectures: Vec<Arch>) -> Self {
        Self {
            architectures,
            build_images: true,
            push_manifest: false,
            push_arch_tags: false,
        }
    }

    /// Local images for one architecture, optionally pushed under its own tags.
    pub fn single(arch: Arch, push: bool) -> Self {
        Self {
            architectures: vec![arch],
            build_images: true,
            push_manifest: false,
            push_arch_tags: push,
        }
    }

    /// Every architecture, then the manifest.
    pub fn release(push_arch_tags: bool) -> Self {
        Self {
            architectures: Arch::PUBLISH_SET.to_vec(),
            build_images: true,
            push_manifest: true,
            push_arch_tags,
        }
    }

    /// Native builds for every architecture, then the manifest. No local
    /// per-architecture images.
    pub fn manifest_only() -> Self {
        Self {
            architectures: Arch::PUBLISH_SET.to_vec(),
            build_images: false,
            push_manifest: true,
            push_arch_tags: false,
        }
    }

    /// Whether anything is pushed, and so a credential is required
    pub fn requires_credential(&self) -> bool {
        self.push_manifest || self.push_arch_tags
    }
}

/// Outcome for one architecture.
#[derive(Debug)]
pub struct ArchitectureBuildResult {
    /// Architecture
    pub arch: Arch,
    /// Primary (content-derived) image reference
    pub image: ImageReference,
    /// Every reference the image was tagged with
    pub tags: Vec<ImageReference>,
    /// Build outcome; a failed per-architecture push is recorded here too
    pub outcome: Result<()>,
    /// Where the native build left its output
    pub native_output: Option<PathBuf>,
    /// References pushed individually
    pub pushed: Vec<ImageReference>,
}

/// Outcome of a publish run.
#[derive(Debug)]
pub struct PublishReport {
    /// One entry per planned architecture, in architecture order
    pub architectures: Vec<ArchitectureBuildResult>,
    /// Manifest outcome; `None` when the plan does not push a manifest
    pub manifest: Option<Result<Vec<ImageReference>>>,
}

impl PublishReport {
    /// True if every architecture and the manifest (when planned) succeeded
    pub fn is_success(&self) -> bool {
        self.architectures.iter().all(|r| r.outcome.is_ok())
            && !matches!(self.manifest, Some(Err(_)))
    }

    /// Per-architecture summary, with the manifest as an extra entry
    pub fn summary(&self) -> FanOutSummary {
        let mut summary = FanOutSummary::default();
        for result in &self.architectures {
            match &result.outcome {
                Ok(()) => summary.succeeded.push(result.arch.to_string()),
                Err(e) => summary.failed.push((result.arch.to_string(), e.to_string())),
            }
        }
        match &self.manifest {
            Some(Ok(_)) => summary.succeeded.push("manifest".to_string()),
            Some(Err(e)) => summary.failed.push(("manifest".to_string(), e.to_string())),
            None => {}
        }
        summary
    }
}

/// Drives the publish flow.
pub struct ImagePublisher<B, N> {
    backend: Arc<B>,
    native: Arc<N>,
    context: Arc<RunContext>,
    host_workspace: Arc<Mutex<()>>,
}

impl<B, N> ImagePublisher<B, N>
where
    B: ImageBackend + 'static,
    N: NativeBuilder + 'static,
{
    /// Creates a publisher.
    pub fn new(backend: Arc<B>, native: Arc<N>, context: Arc<RunContext>) -> Self {
        Self {
            backend,
            native,
            context,
            host_workspace: Arc::new(Mutex::new(())),
        }
    }

    /// Runs `plan`.
    ///
    /// Returns `Err` only for pre-flight failures (missing credential, failed
    /// login). Build and push failures are reported in the [`PublishReport`].
    pub async fn publish(&self, plan: &PublishPlan) -> Result<PublishReport> {
        let config = &self.context.config;
        let identity = &self.context.identity;

        if plan.requires_credential() {
            self.context.gate.authorize()?;
            self.context
                .gate
                .login(self.backend.as_ref(), &config.repository.registry)
                .await?;
        }

        let build_images = plan.build_images;
        let mut results: BTreeMap<Arch, Result<PathBuf>> = run_bounded(
            plan.architectures.clone(),
            config.parallelism,
            &self.context.tasks,
            |arch| {
                let backend = Arc::clone(&self.backend);
                let native = Arc::clone(&self.native);
                let context = Arc::clone(&self.context);
                let host_workspace = Arc::clone(&self.host_workspace);
                async move {
                    build_architecture(
                        backend.as_ref(),
                        native.as_ref(),
                        &context,
                        &host_workspace,
                        arch,
                        build_images,
                    )
                    .await
                }
            },
        )
        .await;

        let mut architectures: Vec<ArchitectureBuildResult> = plan
            .architectures
            .iter()
            .map(|&arch| {
                let (outcome, native_output) = match results.remove(&arch) {
                    Some(Ok(dir)) => (Ok(()), Some(dir)),
                    Some(Err(e)) => (Err(e), None),
                    None => (
                        Err(ReleaseError::build_failed(
                            arch.operator_token(),
                            BuildStage::NativeBuild,
                            "no result recorded",
                        )),
                        None,
                    ),
                };
                ArchitectureBuildResult {
                    arch,
                    image: config.repository.primary_ref(identity, Some(arch)),
                    tags: ordered_refs(&self.context, Some(arch)),
                    outcome,
                    native_output,
                    pushed: Vec::new(),
                }
            })
            .collect();

        let manifest = if plan.push_manifest {
            let failed: Vec<String> = architectures
                .iter()
                .filter(|r| r.outcome.is_err())
                .map(|r| r.arch.to_string())
                .collect();
            if failed.is_empty() {
                Some(self.push_manifest(&architectures).await)
            } else {
                log::error!(
                    "Skipping manifest for {}: {} failed",
                    identity,
                    failed.join(", ")
                );
                Some(Err(PublishError::ManifestAborted { failed }.into()))
            }
        } else {
            None
        };

        if plan.push_arch_tags {
            for result in architectures.iter_mut().filter(|r| r.outcome.is_ok()) {
                let label = result.arch.operator_token();
                for reference in result.tags.clone() {
                    let pushed = with_timeout(
                        label,
                        "push",
                        config.push_timeout,
                        self.backend.push(&reference.to_string()),
                    )
                    .await;
                    match pushed {
                        Ok(()) => {
                            log::info!("Pushed {}", reference);
                            result.pushed.push(reference);
                        }
                        Err(e) => {
                            result.outcome = Err(e.at_stage(label, BuildStage::Push));
                            break;
                        }
                    }
                }
            }
        }

        Ok(PublishReport {
            architectures,
            manifest,
        })
    }

    async fn push_manifest(&self, built: &[ArchitectureBuildResult]) -> Result<Vec<ImageReference>> {
        let config = &self.context.config;
        let primary = config.repository.primary_ref(&self.context.identity, None);
        let references = ordered_refs(&self.context, None);

        let _workspace = self.host_workspace.lock().await;
        let snapshots = config.native_snapshot_root(&self.context.identity);
        for result in built {
            if let Some(dir) = &result.native_output {
                replace_tree(&snapshots.join(result.arch.operator_token()), dir).map_err(|e| {
                    PublishError::ManifestFailed {
                        reference: primary.to_string(),
                        reason: format!("restoring {} native output: {}", result.arch, e),
                    }
                })?;
            }
        }

        let platforms = Arch::PUBLISH_SET
            .iter()
            .filter_map(|&arch| TargetMatrix::linux_for(arch).container_platform)
            .map(str::to_string)
            .collect();

        let request = ManifestRequest {
            descriptor: config.dockerfile.clone(),
            context: config.context.clone(),
            platforms,
            tags: references.iter().map(ToString::to_string).collect(),
        };

        log::info!("Pushing manifest {}", primary);
        with_timeout(
            "manifest",
            "manifest push",
            config.push_timeout,
            self.backend.build_manifest(&request),
        )
        .await
        .map_err(|e| match e {
            ReleaseError::Publish(_) => e,
            other => PublishError::ManifestFailed {
                reference: primary.to_string(),
                reason: other.to_string(),
            }
            .into(),
        })?;

        Ok(references)
    }
}

/// Native build plus (optionally) the platform-pinned image build for one architecture.
///
/// `host_workspace` is held throughout. Returns the native output directory.
pub async fn build_architecture<B: ImageBackend, N: NativeBuilder>(
    backend: &B,
    native: &N,
    context: &RunContext,
    host_workspace: &Mutex<()>,
    arch: Arch,
    build_image: bool,
) -> Result<PathBuf> {
    let config = &context.config;
    let spec = TargetMatrix::linux_for(arch);
    let label = arch.operator_token();

    let _workspace = host_workspace.lock().await;
    log::debug!("{}: holding the host workspace", label);

    let output = with_timeout(
        label,
        "native build",
        config.build_timeout,
        native.invoke(spec.native_build_argument),
    )
    .await
    .map_err(|e| e.at_stage(label, BuildStage::NativeBuild))?;
    if !output.output_dir.is_dir() {
        return Err(ReleaseError::build_failed(
            label,
            BuildStage::NativeBuild,
            format!("no native output in {}", output.output_dir.display()),
        ));
    }
    log::info!("{}: native output in {}", label, output.output_dir.display());

    let snapshot = config.native_snapshot_root(&context.identity).join(label);
    replace_tree(&output.output_dir, &snapshot)
        .map_err(|e| e.at_stage(label, BuildStage::NativeBuild))?;

    if !build_image {
        return Ok(output.output_dir);
    }

    let platform = spec.container_platform.ok_or_else(|| {
        ReleaseError::from(TargetError::NotContainerBuildable {
            key: spec.key.to_string(),
        })
    })?;

    let request = BuildRequest {
        label: label.to_string(),
        descriptor: config.dockerfile.clone(),
        context: config.context.clone(),
        platform: Some(platform.to_string()),
        tags: ordered_refs(context, Some(arch))
            .iter()
            .map(ToString::to_string)
            .collect(),
    };

    let image = with_timeout(label, "image build", config.build_timeout, backend.build(&request))
        .await
        .map_err(|e| e.at_stage(label, BuildStage::ImageBuild))?;
    log::info!("{}: built {} ({})", label, request.tags.join(", "), image.0);
    Ok(output.output_dir)
}

/// Replaces `destination` with a copy of `source`.
fn replace_tree(source: &Path, destination: &Path) -> Result<()> {
    if destination.exists() {
        std::fs::remove_dir_all(destination)?;
    }
    merge_tree(source, destination)?;
    Ok(())
}

/// Tag-policy references with the content-derived one first.
fn ordered_refs(context: &RunContext, arch: Option<Arch>) -> Vec<ImageReference> {
    let repository = &context.config.repository;
    let primary = repository.primary_ref(&context.identity, arch);
    let mut references = vec![primary.clone()];
    references.extend(
        repository
            .image_refs_for(&context.identity, arch)
            .into_iter()
            .filter(|r| *r != primary),
    );
    references
}
