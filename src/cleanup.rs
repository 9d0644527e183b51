//! Best-effort removal of everything a run could have created.
//!
//! Every name removed here is reconstructed from the run identity, so cleanup
//! works the same after a normal run, an interrupted run, or in a later
//! process.

use crate::backend::{ImageBackend, Removal};
use crate::config::OrchestratorConfig;
use crate::descriptor::{builder_image_name, descriptor_name, ignore_file_name, remove_if_present};
use crate::identity::RunIdentity;
use crate::target::{Arch, TargetMatrix};
use serde::Serialize;
use std::fmt;
use std::path::Path;

/// A removal that failed. Logged and reported, never raised.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CleanupWarning {
    /// Image name or path that could not be removed
    pub subject: String,
    /// Why
    pub reason: String,
}

impl CleanupWarning {
    /// Creates a warning and logs it.
    pub fn new(subject: impl Into<String>, reason: impl Into<String>) -> Self {
        let warning = Self {
            subject: subject.into(),
            reason: reason.into(),
        };
        log::warn!("Cleanup: {}", warning);
        warning
    }
}

impl fmt::Display for CleanupWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "could not remove {}: {}", self.subject, self.reason)
    }
}

/// What a cleanup pass did.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    /// Images and files that existed and were removed
    pub removed: Vec<String>,
    /// Names that were already gone
    pub absent: Vec<String>,
    /// Removals that failed
    pub warnings: Vec<CleanupWarning>,
}

impl CleanupReport {
    /// True if nothing failed
    pub fn is_clean(&self) -> bool {
        self.warnings.is_empty()
    }

    async fn remove_image<B: ImageBackend>(&mut self, backend: &B, name: String) {
        match backend.remove_image(&name).await {
            Ok(Removal::Removed) => self.removed.push(name),
            Ok(Removal::Absent) => self.absent.push(name),
            Err(e) => self.warnings.push(CleanupWarning::new(name, e.to_string())),
        }
    }

    fn remove_file(&mut self, path: &Path) {
        let name = path.display().to_string();
        if !path.exists() {
            self.absent.push(name);
            return;
        }
        match remove_if_present(path) {
            Ok(()) => self.removed.push(name),
            Err(e) => self.warnings.push(CleanupWarning::new(name, e.to_string())),
        }
    }

    fn remove_dir(&mut self, path: &Path) {
        let name = path.display().to_string();
        if !path.exists() {
            self.absent.push(name);
            return;
        }
        match std::fs::remove_dir_all(path) {
            Ok(()) => self.removed.push(name),
            Err(e) => self.warnings.push(CleanupWarning::new(name, e.to_string())),
        }
    }
}

/// Removes every image, descriptor and staging directory derived from `scope`.
///
/// Covers publish images for every architecture and the manifest, the native
/// output snapshots, extraction builder images for every target, their
/// descriptors with ignore files, and staging directories. The package
/// directory is never touched. Running it twice
/// removes nothing the second time.
pub async fn cleanup<B: ImageBackend>(
    backend: &B,
    scope: &RunIdentity,
    config: &OrchestratorConfig,
) -> CleanupReport {
    let mut report = CleanupReport::default();

    let publish_refs = Arch::PUBLISH_SET
        .into_iter()
        .map(Some)
        .chain(std::iter::once(None))
        .flat_map(|arch| config.repository.image_refs_for(scope, arch));
    for reference in publish_refs {
        report.remove_image(backend, reference.to_string()).await;
    }
    report.remove_dir(&config.native_snapshot_root(scope));

    let staging_root = config.staging_root();
    for key in TargetMatrix::all_keys() {
        report
            .remove_image(
                backend,
                builder_image_name(&config.builder_image_prefix, &key, scope),
            )
            .await;
        let descriptor = descriptor_name(&key, scope);
        report.remove_file(&config.work_dir.join(ignore_file_name(&descriptor)));
        report.remove_file(&config.work_dir.join(descriptor));
        report.remove_dir(&staging_root.join(key.to_string()));
    }

    log::info!(
        "Cleanup for {}: {} removed, {} already absent, {} warning(s)",
        scope,
        report.removed.len(),
        report.absent.len(),
        report.warnings.len()
    );
    report
}
