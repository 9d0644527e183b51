//! Command execution.
//!
//! Building commands are raced against Ctrl-C. On interrupt the command future
//! is dropped, which aborts in-flight build tasks and kills their child
//! processes. Cleanup for the run's scope starts once the run's task tracker
//! reports every aborted task gone.

mod cleanup;
mod helpers;
mod images;
mod package;
mod targets;

use crate::backend::ImageBackend;
use crate::cli::{Args, Command, RuntimeConfig};
use crate::context::RunContext;
use crate::error::{CliError, Result};
use std::future::Future;
use std::sync::Arc;

use cleanup::{execute_cleanup, run_cleanup};
use helpers::{prepare, print_suggestions};
use images::run_publish;
use package::{parse_targets, run_package};
use targets::execute_targets;

/// Execute the main command based on parsed arguments
pub async fn execute_command(args: Args) -> Result<i32> {
    if let Err(validation_error) = args.validate() {
        let output = super::OutputManager::new(false, false);
        output.error(&format!("Invalid arguments: {}", validation_error));
        return Ok(1);
    }

    let config = RuntimeConfig::from(&args);

    match dispatch(&args, &config).await {
        Ok(exit_code) => {
            if exit_code == 0 && !matches!(args.command, Command::Targets) {
                config.success_println(&format!(
                    "Command '{}' completed successfully",
                    args.command.name()
                ));
            }
            Ok(exit_code)
        }
        Err(e) => {
            config.error_println(&format!("Command '{}' failed: {}", args.command.name(), e));
            print_suggestions(&config, &e);
            Ok(if matches!(e, crate::error::ReleaseError::Cli(CliError::Interrupted)) {
                130
            } else {
                1
            })
        }
    }
}

async fn dispatch(args: &Args, config: &RuntimeConfig) -> Result<i32> {
    match &args.command {
        Command::Targets => {
            execute_targets(config);
            Ok(0)
        }
        Command::Cleanup => {
            let (context, backend) = prepare(args, config).await?;
            Ok(execute_cleanup(config, &context, backend.as_ref()).await)
        }
        Command::Package { targets } => {
            let keys = parse_targets(targets)?;
            let (context, backend) = prepare(args, config).await?;
            interruptible(
                config,
                &context,
                backend.as_ref(),
                run_package(config, keys, Arc::clone(&context), Arc::clone(&backend)),
                interrupt_signal(),
            )
            .await
        }
        Command::Build
        | Command::Push { .. }
        | Command::Manifest
        | Command::Amd64 { .. }
        | Command::Arm64 { .. } => {
            let (context, backend) = prepare(args, config).await?;
            interruptible(
                config,
                &context,
                backend.as_ref(),
                run_publish(args, config, Arc::clone(&context), Arc::clone(&backend)),
                interrupt_signal(),
            )
            .await
        }
    }
}

/// Runs `work` unless `interrupt` resolves first; then waits for the run's
/// tasks to stop, cleans up and fails.
async fn interruptible<B: ImageBackend>(
    config: &RuntimeConfig,
    context: &RunContext,
    backend: &B,
    work: impl Future<Output = Result<i32>>,
    interrupt: impl Future<Output = ()>,
) -> Result<i32> {
    tokio::select! {
        result = work => return result,
        () = interrupt => {}
    }

    // `work` is dropped at this point; its tasks are aborted but may still be unwinding
    config.warning_println("Interrupted, waiting for in-flight builds to stop");
    context.tasks.close();
    context.tasks.wait().await;

    config.warning_println("Removing everything built in this run");
    run_cleanup(config, context, backend).await;
    Err(CliError::Interrupted.into())
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn interrupt_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        log::warn!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::testing::{ScriptedBackend, ScriptedNative};
    use crate::config::{ConfigOverrides, OrchestratorConfig};
    use crate::gate::{DEFAULT_TOKEN_VAR, PushGate};
    use crate::identity::RunIdentity;
    use crate::publisher::{ImagePublisher, PublishPlan};
    use crate::target::Arch;
    use clap::Parser;
    use std::time::Duration;

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_interrupt_cleans_up_after_builds_have_stopped() {
        let root = tempfile::tempdir().expect("tempdir");
        let args = Args::try_parse_from(["finder_release", "--quiet", "build"]).expect("args");
        let config = RuntimeConfig::from(&args);
        let context = Arc::new(RunContext::new(
            RunIdentity::new("8be54df8", None).expect("identity"),
            PushGate::new(None, DEFAULT_TOKEN_VAR),
            OrchestratorConfig::resolve(
                None,
                ConfigOverrides {
                    context: Some(root.path().to_path_buf()),
                    package_dir: Some(root.path().join("packages")),
                    work_dir: Some(root.path().join("work")),
                    parallelism: Some(2),
                    ..ConfigOverrides::default()
                },
            )
            .expect("config"),
        ));
        let backend = Arc::new(ScriptedBackend::default().with_build_delay(Duration::from_secs(60)));
        let native = Arc::new(ScriptedNative {
            root: root.path().to_path_buf(),
        });

        let publisher = ImagePublisher::new(Arc::clone(&backend), native, Arc::clone(&context));
        let plan = PublishPlan::local(Arch::PUBLISH_SET.to_vec());
        let work = async {
            publisher.publish(&plan).await?;
            Ok(0)
        };

        let result = interruptible(
            &config,
            &context,
            backend.as_ref(),
            work,
            tokio::time::sleep(Duration::from_millis(300)),
        )
        .await;
        assert!(matches!(
            result,
            Err(crate::error::ReleaseError::Cli(CliError::Interrupted))
        ));

        let events = backend.events();
        let started = events.iter().filter(|e| e.starts_with("build started")).count();
        let stopped: Vec<usize> = events
            .iter()
            .enumerate()
            .filter(|(_, e)| e.starts_with("build stopped"))
            .map(|(i, _)| i)
            .collect();
        let first_removal = events
            .iter()
            .position(|e| e.starts_with("remove "))
            .expect("cleanup ran");

        assert!(started >= 1);
        assert_eq!(stopped.len(), started);
        assert!(stopped.iter().all(|&i| i < first_removal), "{:#?}", events);
        assert!(context.tasks.is_empty());
    }
}
