//! `cleanup`: remove everything built for the current commit.

use crate::backend::ImageBackend;
use crate::cleanup::{CleanupReport, cleanup};
use crate::cli::RuntimeConfig;
use crate::context::RunContext;

/// The `cleanup` command. Removals that fail are printed as warnings and do
/// not change the exit code.
pub(super) async fn execute_cleanup<B: ImageBackend>(
    config: &RuntimeConfig,
    context: &RunContext,
    backend: &B,
) -> i32 {
    let report = run_cleanup(config, context, backend).await;
    if !report.is_clean() {
        config.warning_println(&format!(
            "{} name(s) could not be removed; remove them by hand or re-run cleanup",
            report.warnings.len()
        ));
    }
    0
}

/// Runs cleanup for the run's scope and prints what happened.
///
/// Used by the `cleanup` command and after an interrupt.
pub(super) async fn run_cleanup<B: ImageBackend>(
    config: &RuntimeConfig,
    context: &RunContext,
    backend: &B,
) -> CleanupReport {
    config.progress_println(&format!("Cleaning up images for {}", context.identity));
    let report = cleanup(backend, &context.identity, &context.config).await;

    for name in &report.removed {
        config.indent(&format!("removed {}", name));
    }
    config.verbose_println(&format!("{} name(s) already absent", report.absent.len()));
    for warning in &report.warnings {
        config.warning_println(&warning.to_string());
    }
    report
}
