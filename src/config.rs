//! Run configuration.
//!
//! Values are layered: command-line flag, then environment variable (both
//! handled by clap and handed in as [`ConfigOverrides`]), then the optional
//! `release.toml`, then built-in defaults.

use crate::backend::ContainerLimits;
use crate::descriptor::DescriptorSettings;
use crate::error::{ConfigError, Result};
use crate::fanout::default_parallelism;
use crate::gate::{DEFAULT_TOKEN_VAR, DEFAULT_USER_VAR};
use crate::identity::RunIdentity;
use crate::tags::Repository;
use path_absolutize::Absolutize;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Config file read from the working directory when `--config` is not given
pub const DEFAULT_CONFIG_FILE: &str = "release.toml";

/// Default registry host
pub const DEFAULT_REGISTRY: &str = "quay.io";

/// Default repository path
pub const DEFAULT_REPOSITORY: &str = "stackstate/agent-integrations-finder";

/// Default local name of extraction builder images
pub const DEFAULT_BUILDER_PREFIX: &str = "finder-release-builder";

const DEFAULT_BUILD_TIMEOUT: Duration = Duration::from_secs(60 * 60);
const DEFAULT_PUSH_TIMEOUT: Duration = Duration::from_secs(30 * 60);

/// Container limit overrides, as found in `[limits]`.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LimitsFile {
    /// Maximum memory (e.g. "1g")
    pub memory: Option<String>,
    /// Maximum memory + swap
    pub memory_swap: Option<String>,
    /// Number of CPUs
    pub cpus: Option<String>,
    /// Maximum number of processes
    pub pids_limit: Option<u32>,
}

/// Contents of `release.toml`. Every key is optional.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    /// Registry host
    pub registry: Option<String>,
    /// Repository path
    pub repository: Option<String>,
    /// The tool's own Dockerfile
    pub dockerfile: Option<PathBuf>,
    /// Build context directory
    pub context: Option<PathBuf>,
    /// Persistent package directory
    pub package_dir: Option<PathBuf>,
    /// Scratch directory for descriptors and staging
    pub work_dir: Option<PathBuf>,
    /// Local image name of extraction builders
    pub builder_image_prefix: Option<String>,
    /// Maximum concurrent builds
    pub parallelism: Option<usize>,
    /// Build timeout in seconds
    pub build_timeout_secs: Option<u64>,
    /// Push timeout in seconds
    pub push_timeout_secs: Option<u64>,
    /// Push per-architecture tags as well
    pub push_arch_tags: Option<bool>,
    /// Native packager command
    pub native_command: Option<Vec<String>>,
    /// Environment variable holding the registry token
    pub token_var: Option<String>,
    /// Environment variable holding the registry username
    pub user_var: Option<String>,
    /// `[descriptor]` table
    pub descriptor: Option<DescriptorSettings>,
    /// `[limits]` table
    pub limits: Option<LimitsFile>,
}

impl FileConfig {
    /// Parses TOML text.
    pub fn parse(text: &str) -> Result<Self> {
        Ok(toml::from_str(text)?)
    }

    /// Loads the config file.
    ///
    /// An explicit path must exist. Without one, `release.toml` in the current
    /// directory is used if present.
    pub fn load(explicit: Option<&Path>) -> Result<Option<Self>> {
        let path = match explicit {
            Some(path) => path.to_path_buf(),
            None => {
                let default = PathBuf::from(DEFAULT_CONFIG_FILE);
                if !default.is_file() {
                    return Ok(None);
                }
                default
            }
        };

        let text = std::fs::read_to_string(&path).map_err(|source| ConfigError::Unreadable {
            path: path.clone(),
            source,
        })?;
        log::debug!("Loaded configuration from {}", path.display());
        Self::parse(&text).map(Some)
    }
}

/// Values supplied on the command line or through the environment.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    /// Registry host
    pub registry: Option<String>,
    /// Repository path
    pub repository: Option<String>,
    /// The tool's own Dockerfile
    pub dockerfile: Option<PathBuf>,
    /// Build context directory
    pub context: Option<PathBuf>,
    /// Persistent package directory
    pub package_dir: Option<PathBuf>,
    /// Scratch directory for descriptors and staging
    pub work_dir: Option<PathBuf>,
    /// Maximum concurrent builds
    pub parallelism: Option<usize>,
    /// Build timeout in seconds
    pub build_timeout_secs: Option<u64>,
    /// Push timeout in seconds
    pub push_timeout_secs: Option<u64>,
    /// Push per-architecture tags as well
    pub push_arch_tags: Option<bool>,
}

/// Fully resolved configuration of one run.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Registry coordinates of the published image
    pub repository: Repository,
    /// The tool's own Dockerfile, used by the publish flow
    pub dockerfile: PathBuf,
    /// Build context (source tree)
    pub context: PathBuf,
    /// Persistent package directory
    pub package_dir: PathBuf,
    /// Scratch space for descriptors and staging directories
    pub work_dir: PathBuf,
    /// Local image name of extraction builders
    pub builder_image_prefix: String,
    /// Maximum concurrent target/architecture builds
    pub parallelism: usize,
    /// Limit for one image build or native build
    pub build_timeout: Duration,
    /// Limit for one push or manifest push
    pub push_timeout: Duration,
    /// Push per-architecture tags in addition to the manifest
    pub push_arch_tags: bool,
    /// Native packager command; the target argument is appended
    pub native_command: Vec<String>,
    /// Environment variable holding the registry token
    pub token_var: String,
    /// Environment variable holding the registry username
    pub user_var: String,
    /// Extraction descriptor settings
    pub descriptor: DescriptorSettings,
    /// Extraction container limits
    pub limits: ContainerLimits,
}

impl OrchestratorConfig {
    /// Layers overrides over the file over defaults, then validates.
    pub fn resolve(file: Option<FileConfig>, overrides: ConfigOverrides) -> Result<Self> {
        let file = file.unwrap_or_default();
        let limits_file = file.limits.unwrap_or_default();

        let config = Self {
            repository: Repository::new(
                overrides
                    .registry
                    .or(file.registry)
                    .unwrap_or_else(|| DEFAULT_REGISTRY.to_string()),
                overrides
                    .repository
                    .or(file.repository)
                    .unwrap_or_else(|| DEFAULT_REPOSITORY.to_string()),
            ),
            dockerfile: overrides
                .dockerfile
                .or(file.dockerfile)
                .unwrap_or_else(|| PathBuf::from("Dockerfile")),
            context: overrides
                .context
                .or(file.context)
                .unwrap_or_else(|| PathBuf::from(".")),
            package_dir: overrides
                .package_dir
                .or(file.package_dir)
                .unwrap_or_else(|| PathBuf::from("packages")),
            work_dir: overrides
                .work_dir
                .or(file.work_dir)
                .unwrap_or_else(|| PathBuf::from(".finder-release")),
            builder_image_prefix: file
                .builder_image_prefix
                .unwrap_or_else(|| DEFAULT_BUILDER_PREFIX.to_string()),
            parallelism: overrides
                .parallelism
                .or(file.parallelism)
                .unwrap_or_else(default_parallelism),
            build_timeout: overrides
                .build_timeout_secs
                .or(file.build_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_BUILD_TIMEOUT),
            push_timeout: overrides
                .push_timeout_secs
                .or(file.push_timeout_secs)
                .map(Duration::from_secs)
                .unwrap_or(DEFAULT_PUSH_TIMEOUT),
            push_arch_tags: overrides
                .push_arch_tags
                .or(file.push_arch_tags)
                .unwrap_or(false),
            native_command: file
                .native_command
                .unwrap_or_else(|| vec!["python3".to_string(), "build.py".to_string()]),
            token_var: file
                .token_var
                .unwrap_or_else(|| DEFAULT_TOKEN_VAR.to_string()),
            user_var: file.user_var.unwrap_or_else(|| DEFAULT_USER_VAR.to_string()),
            descriptor: file.descriptor.unwrap_or_default(),
            limits: ContainerLimits::with_overrides(
                limits_file.memory,
                limits_file.memory_swap,
                limits_file.cpus,
                limits_file.pids_limit,
            )?,
        };

        config.validate()?;
        Ok(config)
    }

    /// Defaults only, for tests and `targets`.
    pub fn defaults() -> Result<Self> {
        Self::resolve(None, ConfigOverrides::default())
    }

    /// `{work_dir}/staging`
    pub fn staging_root(&self) -> PathBuf {
        self.work_dir.join("staging")
    }

    /// `{work_dir}/native/{short_hash}`, where each architecture's native output
    /// is kept between its own build and the manifest build.
    pub fn native_snapshot_root(&self, identity: &RunIdentity) -> PathBuf {
        self.work_dir.join("native").join(identity.short_hash())
    }

    /// Ignore patterns for the package and work directories when they sit
    /// inside the build context, relative to it and `/`-separated.
    ///
    /// Without them every builder image would copy earlier packages and
    /// in-flight staging trees along with the sources.
    pub fn context_exclusions(&self) -> Vec<String> {
        let context = match self.context.absolutize() {
            Ok(path) => path.into_owned(),
            Err(e) => {
                log::warn!("Cannot resolve build context {}: {}", self.context.display(), e);
                return Vec::new();
            }
        };

        [&self.package_dir, &self.work_dir]
            .into_iter()
            .filter_map(|dir| {
                let absolute = dir.absolutize().ok()?.into_owned();
                let relative = absolute.strip_prefix(&context).ok()?;
                if relative.as_os_str().is_empty() {
                    log::warn!("{} is the build context itself; not excluded", dir.display());
                    return None;
                }
                let pattern = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                Some(pattern)
            })
            .collect()
    }

    fn validate(&self) -> Result<()> {
        let invalid = |field: &str, reason: &str| -> Result<()> {
            Err(ConfigError::InvalidValue {
                field: field.to_string(),
                reason: reason.to_string(),
            }
            .into())
        };

        if self.repository.registry.trim().is_empty() || self.repository.registry.contains("://") {
            return invalid("registry", "expected a bare host such as quay.io");
        }
        if self.repository.repository.trim().is_empty()
            || self.repository.repository != self.repository.repository.to_lowercase()
        {
            return invalid("repository", "must be a non-empty lowercase path");
        }
        if self.builder_image_prefix.is_empty()
            || self.builder_image_prefix != self.builder_image_prefix.to_lowercase()
            || self.builder_image_prefix.contains(':')
        {
            return invalid("builder_image_prefix", "must be a lowercase image name without a tag");
        }
        if self.parallelism == 0 {
            return invalid("parallelism", "must be at least 1");
        }
        if self.build_timeout.is_zero() {
            return invalid("build_timeout_secs", "must be greater than zero");
        }
        if self.push_timeout.is_zero() {
            return invalid("push_timeout_secs", "must be greater than zero");
        }
        if self.native_command.is_empty() {
            return invalid("native_command", "must name a program");
        }
        if self.token_var.trim().is_empty() {
            return invalid("token_var", "must name an environment variable");
        }
        Ok(())
    }
}
