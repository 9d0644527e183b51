//! Artifact extraction flow.
//!
//! Per target: synthesize a descriptor, build a throwaway builder image from
//! it, run that image once to copy the staged native output onto the host,
//! merge the copy into `{package_dir}/{target}/`, archive that directory as a
//! standalone distributable, then discard the image, the descriptor and the
//! staging directory whatever happened before.

mod archive;
mod merge;

pub use archive::{PackageArchive, archive_name, write_archive};
pub use merge::{MergedArtifact, merge_tree, sha256_file};

use crate::backend::{BuildRequest, ImageBackend, VolumeBinding};
use crate::cleanup::CleanupWarning;
use crate::context::RunContext;
use crate::descriptor::{BuildDescriptor, OUTPUT_MOUNT, builder_image_name, ignore_rules};
use crate::error::{BuildStage, ReleaseError, Result};
use crate::fanout::{FanOutSummary, run_bounded, with_timeout};
use crate::target::{TargetKey, TargetMatrix};
use path_absolutize::Absolutize;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};

/// Files one target contributed to the package directory.
#[derive(Debug, Clone, Serialize)]
pub struct TargetArtifacts {
    /// Target key
    pub target: String,
    /// `{package_dir}/{target}`
    pub directory: PathBuf,
    /// Merged files with checksums
    pub files: Vec<MergedArtifact>,
    /// Standalone archive of `directory`
    pub archive: PackageArchive,
}

/// Results of an extraction run.
#[derive(Debug)]
pub struct ExtractionReport {
    /// Outcome per requested target
    pub results: BTreeMap<TargetKey, Result<TargetArtifacts>>,
    /// Intermediates that could not be discarded
    pub warnings: Vec<CleanupWarning>,
}

impl ExtractionReport {
    /// Success/failure summary in target order
    pub fn summary(&self) -> FanOutSummary {
        FanOutSummary::from_results(&self.results)
    }
}

/// Runs the extraction flow against an image backend.
pub struct ArtifactExtractor<B> {
    backend: Arc<B>,
    context: Arc<RunContext>,
}

impl<B: ImageBackend + 'static> ArtifactExtractor<B> {
    /// Creates an extractor.
    pub fn new(backend: Arc<B>, context: Arc<RunContext>) -> Self {
        Self { backend, context }
    }

    /// Extracts every target concurrently. A failed target does not stop the others.
    pub async fn extract_all(&self, targets: Vec<TargetKey>) -> ExtractionReport {
        let warnings = Arc::new(Mutex::new(Vec::new()));

        let results = run_bounded(
            targets,
            self.context.config.parallelism,
            &self.context.tasks,
            |key| {
                let backend = Arc::clone(&self.backend);
                let context = Arc::clone(&self.context);
                let warnings = Arc::clone(&warnings);
                async move { extract_target(backend.as_ref(), &context, key, &warnings).await }
            },
        )
        .await;

        let warnings = match warnings.lock() {
            Ok(mut guard) => std::mem::take(&mut *guard),
            Err(poisoned) => std::mem::take(&mut *poisoned.into_inner()),
        };

        ExtractionReport { results, warnings }
    }
}

/// Extracts one target. Intermediates are discarded on every path.
pub async fn extract_target<B: ImageBackend>(
    backend: &B,
    context: &RunContext,
    key: TargetKey,
    warnings: &Mutex<Vec<CleanupWarning>>,
) -> Result<TargetArtifacts> {
    let config = &context.config;
    let target = key.to_string();
    let spec = TargetMatrix::resolve(&key)?;

    let descriptor = BuildDescriptor::for_target(spec, &context.identity, &config.descriptor)
        .map_err(|e| e.at_stage(&target, BuildStage::Descriptor))?;
    let guard = ignore_rules(&config.context, &config.context_exclusions())
        .and_then(|rules| descriptor.materialize(&config.work_dir, &rules))
        .map_err(|e| e.at_stage(&target, BuildStage::Descriptor))?;

    let image = builder_image_name(&config.builder_image_prefix, &key, &context.identity);
    let staging = config.staging_root().join(&target);

    let outcome: Result<TargetArtifacts> = async {
        let request = BuildRequest {
            label: target.clone(),
            descriptor: guard.path().to_path_buf(),
            context: config.context.clone(),
            platform: spec.container_platform.map(str::to_string),
            tags: vec![image.clone()],
        };
        with_timeout(&target, "image build", config.build_timeout, backend.build(&request))
            .await
            .map_err(|e| e.at_stage(&target, BuildStage::ImageBuild))?;

        // Fresh staging directory so stale files from an earlier run are not merged
        if staging.exists() {
            std::fs::remove_dir_all(&staging)
                .map_err(|e| ReleaseError::from(e).at_stage(&target, BuildStage::Extract))?;
        }
        std::fs::create_dir_all(&staging)
            .map_err(|e| ReleaseError::from(e).at_stage(&target, BuildStage::Extract))?;

        let host = staging
            .absolutize()
            .map_err(|e| ReleaseError::from(e).at_stage(&target, BuildStage::Extract))?
            .into_owned();
        let binding = VolumeBinding {
            host,
            container: OUTPUT_MOUNT.to_string(),
        };
        let code = with_timeout(&target, "extraction", config.build_timeout, backend.run(&image, &binding))
            .await
            .map_err(|e| e.at_stage(&target, BuildStage::Extract))?;
        if code != 0 {
            return Err(ReleaseError::build_failed(
                &target,
                BuildStage::Extract,
                format!("extraction container exited with code {}", code),
            ));
        }

        let directory = config.package_dir.join(&target);
        let files = merge_tree(&staging, &directory)
            .map_err(|e| e.at_stage(&target, BuildStage::Merge))?;
        log::info!("{}: merged {} file(s) into {}", target, files.len(), directory.display());

        let source = directory.clone();
        let output_dir = config.package_dir.clone();
        let archive = tokio::task::spawn_blocking(move || write_archive(&key, &source, &output_dir))
            .await
            .map_err(|e| ReleaseError::build_failed(&target, BuildStage::Archive, e.to_string()))?
            .map_err(|e| e.at_stage(&target, BuildStage::Archive))?;
        log::info!("{}: archived as {}", target, archive.path.display());

        Ok(TargetArtifacts {
            target: target.clone(),
            directory,
            files,
            archive,
        })
    }
    .await;

    let mut discarded = Vec::new();
    if let Err(e) = backend.remove_image(&image).await {
        discarded.push(CleanupWarning::new(image.clone(), e.to_string()));
    }
    let descriptor_path = guard.path().display().to_string();
    if let Err(e) = guard.discard() {
        discarded.push(CleanupWarning::new(descriptor_path, e.to_string()));
    }
    if staging.exists()
        && let Err(e) = std::fs::remove_dir_all(&staging)
    {
        discarded.push(CleanupWarning::new(staging.display().to_string(), e.to_string()));
    }
    if !discarded.is_empty() {
        match warnings.lock() {
            Ok(mut guard) => guard.extend(discarded),
            Err(poisoned) => poisoned.into_inner().extend(discarded),
        }
    }

    outcome
}
