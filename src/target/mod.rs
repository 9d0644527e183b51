//! Static target matrix.
//!
//! Maps every buildable (platform, architecture) pair to the names the rest of
//! the pipeline needs: the container platform string used by the image backend
//! and the argument handed to the native packager.

use crate::error::{Result, TargetError};
use std::fmt;
use std::str::FromStr;

/// Platform family of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Platform {
    /// Linux (the only family buildable as container images)
    Linux,
    /// macOS
    Macos,
    /// Windows
    Windows,
}

impl Platform {
    /// Operator-facing name (`linux`, `macos`, `windows`).
    pub fn name(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "windows",
        }
    }

    /// Name used by the native packager and its `dist/` layout.
    pub fn native_token(self) -> &'static str {
        match self {
            Platform::Linux => "linux",
            Platform::Macos => "macos",
            Platform::Windows => "win",
        }
    }
}

/// CPU architecture of a target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Arch {
    /// 64-bit x86
    X86_64,
    /// 64-bit ARM
    Aarch64,
}

/// Both vocabularies for one architecture. Neither is derived from the other.
struct ArchNames {
    operator: &'static str,
    native: &'static str,
}

const ARCH_NAMES: [ArchNames; 2] = [
    ArchNames {
        operator: "amd64",
        native: "x86_64",
    },
    ArchNames {
        operator: "arm64",
        native: "aarch64",
    },
];

impl Arch {
    /// Architectures published as container images, in manifest order.
    pub const PUBLISH_SET: [Arch; 2] = [Arch::X86_64, Arch::Aarch64];

    fn names(self) -> &'static ArchNames {
        match self {
            Arch::X86_64 => &ARCH_NAMES[0],
            Arch::Aarch64 => &ARCH_NAMES[1],
        }
    }

    /// Container-platform vocabulary (`amd64`, `arm64`), also used in tags.
    pub fn operator_token(self) -> &'static str {
        self.names().operator
    }

    /// Native-build vocabulary (`x86_64`, `aarch64`).
    pub fn native_token(self) -> &'static str {
        self.names().native
    }
}

impl fmt::Display for Arch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.operator_token())
    }
}

/// Identifier of one buildable target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TargetKey {
    platform: Platform,
    arch: Arch,
}

impl TargetKey {
    /// Creates a key. Whether it is part of the matrix is checked by [`TargetMatrix::resolve`].
    pub const fn new(platform: Platform, arch: Arch) -> Self {
        Self { platform, arch }
    }

    /// Platform family
    pub fn platform(&self) -> Platform {
        self.platform
    }

    /// Architecture
    pub fn arch(&self) -> Arch {
        self.arch
    }
}

impl fmt::Display for TargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.platform.name(), self.arch.native_token())
    }
}

impl FromStr for TargetKey {
    type Err = crate::error::ReleaseError;

    fn from_str(s: &str) -> Result<Self> {
        TargetMatrix::parse(s)
    }
}

/// Everything the pipeline knows about one target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TargetSpec {
    /// Target key
    pub key: TargetKey,
    /// Container platform string, Linux targets only
    pub container_platform: Option<&'static str>,
    /// Argument handed to the native packager
    pub native_build_argument: &'static str,
}

impl TargetSpec {
    /// Platform family
    pub fn platform(&self) -> Platform {
        self.key.platform
    }

    /// Architecture
    pub fn arch(&self) -> Arch {
        self.key.arch
    }

    /// Relative directory the native packager writes into (`dist/{platform}/{arch}`).
    pub fn native_dist_dir(&self) -> std::path::PathBuf {
        std::path::Path::new("dist")
            .join(self.key.platform.native_token())
            .join(self.key.arch.native_token())
    }
}

static MATRIX: [TargetSpec; 5] = [
    TargetSpec {
        key: TargetKey::new(Platform::Linux, Arch::X86_64),
        container_platform: Some("linux/amd64"),
        native_build_argument: "linux-x86_64",
    },
    TargetSpec {
        key: TargetKey::new(Platform::Linux, Arch::Aarch64),
        container_platform: Some("linux/arm64"),
        native_build_argument: "linux-aarch64",
    },
    TargetSpec {
        key: TargetKey::new(Platform::Macos, Arch::X86_64),
        container_platform: None,
        native_build_argument: "macos-x86_64",
    },
    TargetSpec {
        key: TargetKey::new(Platform::Macos, Arch::Aarch64),
        container_platform: None,
        native_build_argument: "macos-aarch64",
    },
    TargetSpec {
        key: TargetKey::new(Platform::Windows, Arch::X86_64),
        container_platform: None,
        native_build_argument: "win-x86_64",
    },
];

/// Lookup over the static target table.
#[derive(Debug, Clone, Copy, Default)]
pub struct TargetMatrix;

impl TargetMatrix {
    /// Resolves a key to its spec.
    pub fn resolve(key: &TargetKey) -> Result<&'static TargetSpec> {
        MATRIX.iter().find(|spec| spec.key == *key).ok_or_else(|| {
            TargetError::UnknownTarget {
                key: key.to_string(),
            }
            .into()
        })
    }

    /// Parses an operator-supplied key such as `linux-x86_64` or `win-x86_64`.
    pub fn parse(input: &str) -> Result<TargetKey> {
        let input = input.trim();
        MATRIX
            .iter()
            .find(|spec| spec.key.to_string() == input || spec.native_build_argument == input)
            .map(|spec| spec.key)
            .ok_or_else(|| {
                TargetError::UnknownTarget {
                    key: input.to_string(),
                }
                .into()
            })
    }

    /// Every key in declaration order.
    pub fn all_keys() -> Vec<TargetKey> {
        MATRIX.iter().map(|spec| spec.key).collect()
    }

    /// Every spec in declaration order.
    pub fn specs() -> &'static [TargetSpec] {
        &MATRIX
    }

    /// The Linux spec for an architecture, used by the image publish flow.
    pub fn linux_for(arch: Arch) -> &'static TargetSpec {
        match arch {
            Arch::X86_64 => &MATRIX[0],
            Arch::Aarch64 => &MATRIX[1],
        }
    }
}
