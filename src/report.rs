//! Persisted record of an extraction run.

use crate::cleanup::CleanupWarning;
use crate::error::Result;
use crate::extract::{ExtractionReport, MergedArtifact, PackageArchive};
use crate::identity::RunIdentity;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::path::{Path, PathBuf};

/// File name of the report inside the package directory
pub const REPORT_FILE: &str = "run-report.json";

/// Outcome of one target.
#[derive(Debug, Clone, Serialize)]
pub struct TargetEntry {
    /// Target key
    pub target: String,
    /// Whether the target was extracted and merged
    pub success: bool,
    /// Error message for failed targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Merged files with checksums
    pub files: Vec<MergedArtifact>,
    /// Standalone archive, for successful targets
    #[serde(skip_serializing_if = "Option::is_none")]
    pub archive: Option<PackageArchive>,
}

/// `run-report.json`
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    /// Short commit hash of the run
    pub short_hash: String,
    /// Release tag, if the commit is exactly tagged
    pub exact_tag: Option<String>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the report was assembled
    pub finished_at: DateTime<Utc>,
    /// Per-target outcomes in target order
    pub targets: Vec<TargetEntry>,
    /// Intermediates that could not be removed
    pub cleanup_warnings: Vec<CleanupWarning>,
}

impl RunReport {
    /// Builds the report from an extraction run.
    pub fn from_extraction(
        identity: &RunIdentity,
        started_at: DateTime<Utc>,
        extraction: &ExtractionReport,
    ) -> Self {
        let targets = extraction
            .results
            .iter()
            .map(|(key, result)| match result {
                Ok(artifacts) => TargetEntry {
                    target: key.to_string(),
                    success: true,
                    error: None,
                    files: artifacts.files.clone(),
                    archive: Some(artifacts.archive.clone()),
                },
                Err(e) => TargetEntry {
                    target: key.to_string(),
                    success: false,
                    error: Some(e.to_string()),
                    files: Vec::new(),
                    archive: None,
                },
            })
            .collect();

        Self {
            short_hash: identity.short_hash().to_string(),
            exact_tag: identity.exact_tag().map(str::to_string),
            started_at,
            finished_at: Utc::now(),
            targets,
            cleanup_warnings: extraction.warnings.clone(),
        }
    }

    /// Writes the report as pretty JSON to `{package_dir}/run-report.json`.
    pub fn write(&self, package_dir: &Path) -> Result<PathBuf> {
        std::fs::create_dir_all(package_dir)?;
        let path = package_dir.join(REPORT_FILE);
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(&path, json)?;
        log::debug!("Wrote run report to {}", path.display());
        Ok(path)
    }
}
