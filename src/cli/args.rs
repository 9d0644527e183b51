//! Command line argument parsing and validation.
//!
//! Every global option can also come from the environment; both take
//! precedence over `release.toml`.

use crate::config::ConfigOverrides;
use crate::target::Arch;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Release builds and multi-architecture image publishing for agent-integrations-finder
#[derive(Parser, Debug)]
#[command(
    name = "finder_release",
    version,
    about = "Build release artifacts and publish multi-architecture images",
    long_about = "Build release artifacts and publish multi-architecture images.

Usage:
  finder_release build                  # amd64 + arm64 images, local only
  finder_release push                   # build both, push the manifest
  finder_release arm64 --push           # one architecture, pushed under its own tags
  finder_release package all            # extract native artifacts for every target
  finder_release cleanup                # remove everything built for this commit"
)]
pub struct Args {
    /// Command to execute
    #[command(subcommand)]
    pub command: Command,

    /// Options shared by every command
    #[command(flatten)]
    pub global: GlobalOptions,
}

/// Options shared by every command
#[derive(clap::Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Config file (default: ./release.toml if present)
    #[arg(long, global = true, env = "FINDER_RELEASE_CONFIG", value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Registry host
    #[arg(long, global = true, env = "FINDER_RELEASE_REGISTRY")]
    pub registry: Option<String>,

    /// Repository path within the registry
    #[arg(long, global = true, env = "FINDER_RELEASE_REPOSITORY")]
    pub repository: Option<String>,

    /// Dockerfile of the tool image
    #[arg(long, global = true, env = "FINDER_RELEASE_DOCKERFILE", value_name = "FILE")]
    pub dockerfile: Option<PathBuf>,

    /// Build context (source checkout)
    #[arg(long, global = true, env = "FINDER_RELEASE_CONTEXT", value_name = "DIR")]
    pub context: Option<PathBuf>,

    /// Directory receiving extracted artifacts
    #[arg(long, global = true, env = "FINDER_RELEASE_PACKAGE_DIR", value_name = "DIR")]
    pub package_dir: Option<PathBuf>,

    /// Scratch directory for descriptors and staging
    #[arg(long, global = true, env = "FINDER_RELEASE_WORK_DIR", value_name = "DIR")]
    pub work_dir: Option<PathBuf>,

    /// Maximum concurrent builds (default: half the CPUs)
    #[arg(short = 'j', long, global = true, env = "FINDER_RELEASE_PARALLELISM")]
    pub parallelism: Option<usize>,

    /// Timeout for one build, in seconds
    #[arg(long, global = true, env = "FINDER_RELEASE_BUILD_TIMEOUT", value_name = "SECS")]
    pub build_timeout: Option<u64>,

    /// Timeout for one push, in seconds
    #[arg(long, global = true, env = "FINDER_RELEASE_PUSH_TIMEOUT", value_name = "SECS")]
    pub push_timeout: Option<u64>,

    /// Show verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Only show errors
    #[arg(short, long, global = true, conflicts_with = "verbose")]
    pub quiet: bool,
}

/// Available commands
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Command {
    /// Build amd64 and arm64 images locally
    Build,

    /// Build every architecture and push the multi-architecture manifest
    Push {
        /// Also push the per-architecture tags
        #[arg(long)]
        arch_tags: bool,
    },

    /// Run the native builds and push the manifest, without local per-architecture images
    Manifest,

    /// Build the amd64 image only
    Amd64 {
        /// Push the image under its per-architecture tags
        #[arg(long)]
        push: bool,
    },

    /// Build the arm64 image only
    Arm64 {
        /// Push the image under its per-architecture tags
        #[arg(long)]
        push: bool,
    },

    /// Extract native artifacts into the package directory
    Package {
        /// Targets to extract (e.g. linux-x86_64 win-x86_64), or `all`
        #[arg(required = true, num_args = 1.., value_name = "TARGET")]
        targets: Vec<String>,
    },

    /// Remove images, descriptors and staging directories of the current commit
    Cleanup,

    /// List the target matrix
    Targets,
}

impl Command {
    /// Name used in status messages
    pub fn name(&self) -> &'static str {
        match self {
            Command::Build => "build",
            Command::Push { .. } => "push",
            Command::Manifest => "manifest",
            Command::Amd64 { .. } => "amd64",
            Command::Arm64 { .. } => "arm64",
            Command::Package { .. } => "package",
            Command::Cleanup => "cleanup",
            Command::Targets => "targets",
        }
    }

    /// The architecture of a single-architecture command
    pub fn single_arch(&self) -> Option<Arch> {
        match self {
            Command::Amd64 { .. } => Some(Arch::X86_64),
            Command::Arm64 { .. } => Some(Arch::Aarch64),
            _ => None,
        }
    }

    /// Whether the command talks to the registry
    pub fn pushes(&self) -> bool {
        match self {
            Command::Push { .. } | Command::Manifest => true,
            Command::Amd64 { push } | Command::Arm64 { push } => *push,
            _ => false,
        }
    }
}

impl Args {
    /// Parse command line arguments
    pub fn parse_args() -> Self {
        Self::parse()
    }

    /// Validate arguments for consistency
    pub fn validate(&self) -> Result<(), String> {
        if self.global.parallelism == Some(0) {
            return Err("--parallelism must be at least 1".to_string());
        }
        if self.global.build_timeout == Some(0) || self.global.push_timeout == Some(0) {
            return Err("timeouts must be greater than zero".to_string());
        }
        if let Command::Package { targets } = &self.command
            && targets.len() > 1
            && targets.iter().any(|t| t == "all")
        {
            return Err("`all` cannot be combined with explicit targets".to_string());
        }
        Ok(())
    }

    /// Layered configuration values supplied on the command line or via env
    pub fn overrides(&self) -> ConfigOverrides {
        ConfigOverrides {
            registry: self.global.registry.clone(),
            repository: self.global.repository.clone(),
            dockerfile: self.global.dockerfile.clone(),
            context: self.global.context.clone(),
            package_dir: self.global.package_dir.clone(),
            work_dir: self.global.work_dir.clone(),
            parallelism: self.global.parallelism,
            build_timeout_secs: self.global.build_timeout,
            push_timeout_secs: self.global.push_timeout,
            push_arch_tags: match self.command {
                Command::Push { arch_tags: true } => Some(true),
                _ => None,
            },
        }
    }
}

/// Configuration derived from command line arguments
#[derive(Debug, Clone)]
pub struct RuntimeConfig {
    output: super::OutputManager,
}

impl RuntimeConfig {
    /// Print message
    pub fn println(&self, message: &str) {
        let _ = self.output.println(message);
    }

    /// Print info message
    pub fn info_println(&self, message: &str) {
        let _ = self.output.info(message);
    }

    /// Print verbose message
    pub fn verbose_println(&self, message: &str) {
        let _ = self.output.verbose(message);
    }

    /// Print error message (always shown)
    pub fn error_println(&self, message: &str) {
        self.output.error(message);
    }

    /// Print warning message
    pub fn warning_println(&self, message: &str) {
        let _ = self.output.warn(message);
    }

    /// Print success message
    pub fn success_println(&self, message: &str) {
        let _ = self.output.success(message);
    }

    /// Print progress message
    pub fn progress_println(&self, message: &str) {
        let _ = self.output.progress(message);
    }

    /// Print section header
    pub fn section(&self, title: &str) {
        let _ = self.output.section(title);
    }

    /// Print indented text
    pub fn indent(&self, message: &str) {
        let _ = self.output.indent(message);
    }
}

impl From<&Args> for RuntimeConfig {
    fn from(args: &Args) -> Self {
        Self {
            output: super::OutputManager::new(args.global.verbose, args.global.quiet),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_package_targets() {
        let args = Args::try_parse_from(["finder_release", "package", "linux-x86_64", "win-x86_64"])
            .expect("valid arguments");
        assert_eq!(
            args.command,
            Command::Package {
                targets: vec!["linux-x86_64".to_string(), "win-x86_64".to_string()]
            }
        );
        assert!(args.validate().is_ok());
    }

    #[test]
    fn test_package_requires_targets() {
        assert!(Args::try_parse_from(["finder_release", "package"]).is_err());
    }

    #[test]
    fn test_all_cannot_be_mixed() {
        let args = Args::try_parse_from(["finder_release", "package", "all", "linux-x86_64"])
            .expect("parses");
        assert!(args.validate().is_err());
    }

    #[test]
    fn test_push_semantics() {
        let push = Args::try_parse_from(["finder_release", "push", "--arch-tags"]).expect("parses");
        assert!(push.command.pushes());
        assert_eq!(push.overrides().push_arch_tags, Some(true));

        let arm = Args::try_parse_from(["finder_release", "arm64"]).expect("parses");
        assert!(!arm.command.pushes());
        assert_eq!(arm.command.single_arch(), Some(Arch::Aarch64));

        let arm_push = Args::try_parse_from(["finder_release", "arm64", "--push"]).expect("parses");
        assert!(arm_push.command.pushes());
    }

    #[test]
    fn test_global_options_after_subcommand() {
        let args = Args::try_parse_from(["finder_release", "build", "-j", "3", "--registry", "ghcr.io"])
            .expect("parses");
        let overrides = args.overrides();
        assert_eq!(overrides.parallelism, Some(3));
        assert_eq!(overrides.registry.as_deref(), Some("ghcr.io"));
    }
}
