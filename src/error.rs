//! Error types for finder_release operations.
//!
//! This module defines all error types with actionable error messages and recovery suggestions.

use std::fmt;
use std::path::PathBuf;
use thiserror::Error;

/// Result type alias for finder_release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

/// Main error type for all finder_release operations
#[derive(Error, Debug)]
pub enum ReleaseError {
    /// Target matrix errors
    #[error("Target error: {0}")]
    Target(#[from] TargetError),

    /// Run identity (git) errors
    #[error("Identity error: {0}")]
    Identity(#[from] IdentityError),

    /// Push gate errors
    #[error("Push gate error: {0}")]
    Gate(#[from] GateError),

    /// Per-target build errors
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Manifest publishing errors
    #[error("Publish error: {0}")]
    Publish(#[from] PublishError),

    /// Configuration errors
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// CLI argument errors
    #[error("CLI error: {0}")]
    Cli(#[from] CliError),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing errors
    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    /// Descriptor template rendering errors
    #[error("Template error: {0}")]
    Template(#[from] handlebars::RenderError),

    /// Zip archive errors
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),
}

/// Target matrix errors
#[derive(Error, Debug)]
pub enum TargetError {
    /// Key is not part of the static target matrix
    #[error("Unknown target '{key}'. Run `finder_release targets` to list valid targets.")]
    UnknownTarget {
        /// Key as given by the operator
        key: String,
    },

    /// Target has no container platform (only Linux targets do)
    #[error("Target '{key}' cannot be built as a container image")]
    NotContainerBuildable {
        /// Target key
        key: String,
    },
}

/// Errors computing the run identity from git
#[derive(Error, Debug)]
pub enum IdentityError {
    /// Not a git repository, or git is unavailable
    #[error("Cannot read commit information from {path}: {reason}")]
    GitUnavailable {
        /// Repository path
        path: PathBuf,
        /// Reason for the error
        reason: String,
    },

    /// Short hash does not have the expected shape
    #[error("Invalid short commit hash '{hash}': expected {expected} lowercase hex characters")]
    InvalidShortHash {
        /// Offending hash
        hash: String,
        /// Expected width
        expected: usize,
    },

    /// Release tag cannot be used as an image tag
    #[error("Invalid release tag '{tag}': {reason}")]
    InvalidTag {
        /// Offending tag
        tag: String,
        /// Reason for the error
        reason: String,
    },
}

/// Push gate errors
#[derive(Error, Debug)]
pub enum GateError {
    /// No registry credential configured
    #[error("No registry credential configured. Set {variable} before pushing.")]
    MissingCredential {
        /// Environment variable that should hold the credential
        variable: String,
    },

    /// Registry login was rejected
    #[error("Registry login to '{registry}' failed: {reason}")]
    LoginFailed {
        /// Registry host
        registry: String,
        /// Reason for the error
        reason: String,
    },
}

/// Stage of a per-target build at which a failure happened
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BuildStage {
    /// Writing the build descriptor
    Descriptor,
    /// Host-side native build
    NativeBuild,
    /// Image build (dependency install or sandboxed native build)
    ImageBuild,
    /// Running the image to copy staged output out
    Extract,
    /// Merging extracted output into the package directory
    Merge,
    /// Writing the standalone archive
    Archive,
    /// Pushing an image tag
    Push,
    /// A backend call exceeded its timeout
    Timeout,
}

impl fmt::Display for BuildStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            BuildStage::Descriptor => "descriptor",
            BuildStage::NativeBuild => "native build",
            BuildStage::ImageBuild => "image build",
            BuildStage::Extract => "extract",
            BuildStage::Merge => "merge",
            BuildStage::Archive => "archive",
            BuildStage::Push => "push",
            BuildStage::Timeout => "timeout",
        };
        f.write_str(name)
    }
}

/// Per-target build errors
#[derive(Error, Debug)]
pub enum BuildError {
    /// A target or architecture failed at a given stage
    #[error("{target} failed during {stage}: {reason}")]
    BuildFailed {
        /// Target key or architecture token
        target: String,
        /// Stage that failed
        stage: BuildStage,
        /// Reason for the error
        reason: String,
    },

    /// Fan-out task panicked or was cancelled
    #[error("Build task for {target} did not complete: {reason}")]
    TaskFailed {
        /// Target key or architecture token
        target: String,
        /// Reason for the error
        reason: String,
    },
}

/// Manifest publishing errors
#[derive(Error, Debug)]
pub enum PublishError {
    /// At least one architecture has no successful result
    #[error("Manifest aborted: architectures without a successful build: {}", failed.join(", "))]
    ManifestAborted {
        /// Architectures that failed or are missing
        failed: Vec<String>,
    },

    /// The manifest build/push itself failed
    #[error("Manifest push for {reference} failed: {reason}")]
    ManifestFailed {
        /// Manifest reference
        reference: String,
        /// Reason for the error
        reason: String,
    },
}

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file could not be read
    #[error("Cannot read config file {path}: {source}")]
    Unreadable {
        /// Config file path
        path: PathBuf,
        /// IO error
        #[source]
        source: std::io::Error,
    },

    /// A configuration value is out of range or malformed
    #[error("Invalid value for '{field}': {reason}")]
    InvalidValue {
        /// Field name
        field: String,
        /// Reason for the error
        reason: String,
    },
}

/// CLI-specific errors
#[derive(Error, Debug)]
pub enum CliError {
    /// Invalid command line arguments
    #[error("Invalid arguments: {reason}")]
    InvalidArguments {
        /// Reason for the error
        reason: String,
    },

    /// Command execution failed
    #[error("Command execution failed: {command} - {reason}")]
    ExecutionFailed {
        /// Command that failed
        command: String,
        /// Reason for the error
        reason: String,
    },

    /// Operator interrupted the run
    #[error("Interrupted by operator")]
    Interrupted,
}

impl ReleaseError {
    /// Shorthand for a scoped build failure.
    pub fn build_failed(
        target: impl Into<String>,
        stage: BuildStage,
        reason: impl Into<String>,
    ) -> Self {
        ReleaseError::Build(BuildError::BuildFailed {
            target: target.into(),
            stage,
            reason: reason.into(),
        })
    }

    /// Attributes an error to a build stage. Errors that already carry a
    /// stage (including timeouts) are kept as they are.
    pub fn at_stage(self, target: &str, stage: BuildStage) -> Self {
        match self {
            ReleaseError::Build(_) => self,
            other => ReleaseError::build_failed(target, stage, other.to_string()),
        }
    }

    /// Shorthand for a failed external command.
    pub fn execution_failed(command: impl Into<String>, reason: impl Into<String>) -> Self {
        ReleaseError::Cli(CliError::ExecutionFailed {
            command: command.into(),
            reason: reason.into(),
        })
    }

    /// Get actionable recovery suggestions for this error
    pub fn recovery_suggestions(&self) -> Vec<String> {
        match self {
            ReleaseError::Target(TargetError::UnknownTarget { .. }) => vec![
                "List valid targets: finder_release targets".to_string(),
                "Use 'all' to build every target in the matrix".to_string(),
            ],
            ReleaseError::Gate(GateError::MissingCredential { variable }) => vec![
                format!("Export the registry token: export {}=<token>", variable),
                "Use `build` instead of `push` for local-only images".to_string(),
            ],
            ReleaseError::Gate(GateError::LoginFailed { registry, .. }) => vec![
                format!("Verify the token has push permissions on {}", registry),
                "Check the registry username (FINDER_REGISTRY_USER)".to_string(),
            ],
            ReleaseError::Identity(IdentityError::GitUnavailable { .. }) => vec![
                "Run from inside the repository checkout".to_string(),
                "Ensure git is installed and on PATH".to_string(),
            ],
            ReleaseError::Publish(PublishError::ManifestAborted { failed }) => vec![
                format!("Inspect the failed architectures: {}", failed.join(", ")),
                "Successful per-architecture images are still available locally".to_string(),
                "Re-run once the failing builds are fixed; the manifest is content-addressed"
                    .to_string(),
            ],
            ReleaseError::Publish(PublishError::ManifestFailed { .. }) => vec![
                "Multi-platform pushes need a buildx builder that supports them: \
                 docker buildx create --use --driver docker-container"
                    .to_string(),
                "Check that QEMU emulation is registered for foreign platforms: \
                 docker run --privileged --rm tonistiigi/binfmt --install all"
                    .to_string(),
                "Per-architecture images are still available locally".to_string(),
            ],
            ReleaseError::Build(BuildError::BuildFailed {
                stage: BuildStage::Timeout,
                ..
            }) => vec![
                "Increase --build-timeout if builds are legitimately slow".to_string(),
                "Lower --parallelism to reduce contention on the image backend".to_string(),
            ],
            _ => vec!["Check the error message above for specific details".to_string()],
        }
    }

    /// Whether a re-run with unchanged input can succeed
    pub fn is_recoverable(&self) -> bool {
        !matches!(
            self,
            ReleaseError::Target(_)
                | ReleaseError::Gate(GateError::MissingCredential { .. })
                | ReleaseError::Config(_)
                | ReleaseError::Toml(_)
                | ReleaseError::Cli(CliError::InvalidArguments { .. })
        )
    }
}
