//! Shared setup for commands that build or push.

use crate::backend::{DockerBackend, check_docker_available};
use crate::cli::{Args, RuntimeConfig};
use crate::config::{FileConfig, OrchestratorConfig};
use crate::context::RunContext;
use crate::error::{ReleaseError, Result};
use crate::fanout::FanOutSummary;
use crate::gate::{PushGate, credential_from_env};
use crate::identity::RunIdentity;
use std::sync::Arc;

/// Loads `release.toml` (if any) and layers the command line over it.
pub(super) fn load_config(args: &Args) -> Result<OrchestratorConfig> {
    let file = FileConfig::load(args.global.config.as_deref())?;
    OrchestratorConfig::resolve(file, args.overrides())
}

/// Builds the run context and backend.
///
/// Order matters: a pushing command without a credential fails here, before
/// Docker or git are consulted and long before any build.
pub(super) async fn prepare(
    args: &Args,
    config: &RuntimeConfig,
) -> Result<(Arc<RunContext>, Arc<DockerBackend>)> {
    let orchestrator = load_config(args)?;

    let credential = credential_from_env(&orchestrator.token_var, &orchestrator.user_var);
    let gate = PushGate::new(credential, orchestrator.token_var.clone());
    if args.command.pushes() {
        gate.authorize()?;
        config.verbose_println(&format!(
            "Registry credential found in {}",
            orchestrator.token_var
        ));
    }

    check_docker_available().await?;

    let identity = RunIdentity::detect(&orchestrator.context).await?;
    config.progress_println(&format!("Commit {}", identity));

    let backend = Arc::new(DockerBackend::with_limits(orchestrator.limits.clone()));
    Ok((
        Arc::new(RunContext::new(identity, gate, orchestrator)),
        backend,
    ))
}

/// Prints the end-of-run summary with an enumerated list of failures.
pub(super) fn print_summary(config: &RuntimeConfig, summary: &FanOutSummary) {
    config.section("Summary");
    for key in &summary.succeeded {
        config.success_println(key);
    }
    for (index, (key, error)) in summary.failed.iter().enumerate() {
        config.error_println(&format!("{}. {}: {}", index + 1, key, error));
    }
    if summary.is_success() {
        config.success_println(&format!("{} succeeded", summary.succeeded.len()));
    } else {
        config.error_println(&format!(
            "{} succeeded, {} failed",
            summary.succeeded.len(),
            summary.failed.len()
        ));
    }
}

/// Prints recovery suggestions for an error.
pub(super) fn print_suggestions(config: &RuntimeConfig, error: &ReleaseError) {
    let suggestions = error.recovery_suggestions();
    if !suggestions.is_empty() {
        config.println("\n💡 Recovery suggestions:");
        for suggestion in suggestions {
            config.println(&format!("  • {}", suggestion));
        }
    }
    if !error.is_recoverable() {
        config.println("  • Re-running with the same arguments and configuration will fail the same way");
    }
}
