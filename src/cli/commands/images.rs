//! `build`, `push`, `manifest`, `amd64` and `arm64`.

use super::helpers::{print_suggestions, print_summary};
use crate::backend::{CommandNativeBuilder, DockerBackend};
use crate::cli::{Args, Command, RuntimeConfig};
use crate::context::RunContext;
use crate::error::Result;
use crate::publisher::{ImagePublisher, PublishPlan};
use crate::target::Arch;
use std::sync::Arc;

fn plan_for(command: &Command, push_arch_tags: bool) -> PublishPlan {
    if let Some(arch) = command.single_arch() {
        return PublishPlan::single(arch, command.pushes());
    }
    match command {
        Command::Push { .. } => PublishPlan::release(push_arch_tags),
        Command::Manifest => PublishPlan::manifest_only(),
        _ => PublishPlan::local(Arch::PUBLISH_SET.to_vec()),
    }
}

/// Executes the image publish flow for the parsed command.
pub(super) async fn run_publish(
    args: &Args,
    config: &RuntimeConfig,
    context: Arc<RunContext>,
    backend: Arc<DockerBackend>,
) -> Result<i32> {
    let settings = &context.config;
    let plan = plan_for(&args.command, settings.push_arch_tags);
    let native = Arc::new(CommandNativeBuilder::new(
        settings.native_command.clone(),
        settings.context.clone(),
    )?);

    config.section(&format!("{} {}", args.command.name(), context.identity));
    for arch in &plan.architectures {
        config.indent(&format!(
            "{}: {}",
            arch,
            settings
                .repository
                .image_refs_for(&context.identity, Some(*arch))
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        ));
    }
    if plan.requires_credential() && !context.identity.is_release() {
        config.info_println("HEAD is not exactly tagged; pushing content-derived tags only");
    }
    config.progress_println(&format!(
        "Building {} architecture(s), up to {} at a time",
        plan.architectures.len(),
        settings.parallelism
    ));

    let publisher = ImagePublisher::new(backend, native, Arc::clone(&context));
    let report = publisher.publish(&plan).await?;

    for result in &report.architectures {
        for reference in &result.pushed {
            config.verbose_println(&format!("pushed {}", reference));
        }
    }
    if let Some(Ok(references)) = &report.manifest {
        for reference in references {
            config.success_println(&format!("Manifest pushed: {}", reference));
        }
    }

    print_summary(config, &report.summary());
    if let Some(Err(e)) = &report.manifest {
        print_suggestions(config, e);
    }

    Ok(if report.is_success() { 0 } else { 1 })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_to_plan() {
        assert_eq!(
            plan_for(&Command::Build, true),
            PublishPlan::local(vec![Arch::X86_64, Arch::Aarch64])
        );
        assert_eq!(
            plan_for(&Command::Push { arch_tags: false }, true),
            PublishPlan::release(true)
        );
        assert_eq!(plan_for(&Command::Manifest, false), PublishPlan::manifest_only());
        assert_eq!(
            plan_for(&Command::Arm64 { push: true }, false),
            PublishPlan::single(Arch::Aarch64, true)
        );
        assert_eq!(
            plan_for(&Command::Amd64 { push: false }, true),
            PublishPlan::single(Arch::X86_64, false)
        );
    }
}
