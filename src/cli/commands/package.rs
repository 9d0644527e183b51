//! `package <targets…|all>`: artifact extraction.

use super::helpers::print_summary;
use crate::backend::DockerBackend;
use crate::cli::RuntimeConfig;
use crate::context::RunContext;
use crate::error::Result;
use crate::extract::ArtifactExtractor;
use crate::report::RunReport;
use crate::target::{TargetKey, TargetMatrix};
use chrono::Utc;
use std::sync::Arc;

/// Resolves operator input to target keys. `all` expands to the full matrix.
///
/// Duplicates are dropped; an unknown name fails the whole command.
pub(super) fn parse_targets(inputs: &[String]) -> Result<Vec<TargetKey>> {
    if inputs.iter().any(|t| t == "all") {
        return Ok(TargetMatrix::all_keys());
    }

    let mut keys = Vec::new();
    for input in inputs {
        let key = TargetMatrix::parse(input)?;
        if !keys.contains(&key) {
            keys.push(key);
        }
    }
    Ok(keys)
}

/// Extracts `targets` into the package directory and writes the run report.
pub(super) async fn run_package(
    config: &RuntimeConfig,
    targets: Vec<TargetKey>,
    context: Arc<RunContext>,
    backend: Arc<DockerBackend>,
) -> Result<i32> {
    let started_at = Utc::now();
    let settings = &context.config;

    config.section(&format!("package {}", context.identity));
    config.progress_println(&format!(
        "Extracting {} target(s) into {}, up to {} at a time",
        targets.len(),
        settings.package_dir.display(),
        settings.parallelism
    ));
    let limits = backend.limits();
    config.info_println(&format!(
        "Extraction containers: memory {} (with swap {}), {} CPU(s), {} pids",
        limits.memory, limits.memory_swap, limits.cpus, limits.pids_limit
    ));

    let extractor = ArtifactExtractor::new(backend, Arc::clone(&context));
    let extraction = extractor.extract_all(targets).await;

    for artifacts in extraction.results.values().flatten() {
        config.verbose_println(&format!(
            "{}: {} file(s) in {}",
            artifacts.target,
            artifacts.files.len(),
            artifacts.directory.display()
        ));
        for file in &artifacts.files {
            config.verbose_println(&format!("  {}  {}", file.sha256, file.path.display()));
        }
        config.indent(&format!(
            "{}  {}",
            artifacts.archive.sha256,
            artifacts.archive.path.display()
        ));
    }
    for warning in &extraction.warnings {
        config.warning_println(&warning.to_string());
    }

    let report = RunReport::from_extraction(&context.identity, started_at, &extraction);
    let path = report.write(&settings.package_dir)?;
    config.progress_println(&format!("Run report: {}", path.display()));

    let summary = extraction.summary();
    print_summary(config, &summary);
    Ok(if summary.is_success() { 0 } else { 1 })
}
