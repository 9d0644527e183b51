//! `targets`: print the target matrix.

use crate::cli::RuntimeConfig;
use crate::target::TargetMatrix;

pub(super) fn execute_targets(config: &RuntimeConfig) {
    config.println(&format!(
        "{:<16} {:<9} {:<8} {:<13} {}",
        "TARGET", "PLATFORM", "ARCH", "CONTAINER", "NATIVE ARGUMENT"
    ));
    for spec in TargetMatrix::specs() {
        config.println(&format!(
            "{:<16} {:<9} {:<8} {:<13} {}",
            spec.key.to_string(),
            spec.platform().name(),
            spec.arch().operator_token(),
            spec.container_platform.unwrap_or("-"),
            spec.native_build_argument
        ));
    }
}
