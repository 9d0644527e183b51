//! Boundaries to the outside world: the image backend and the native packager.
//!
//! The flows only talk to these traits, so they can be exercised against
//! in-memory fakes without a container engine.
//!
//! # Module Structure
//!
//! - `docker` - [`ImageBackend`] over the `docker` / `docker buildx` CLI
//! - `limits` - Resource limits for sandboxed extraction containers
//! - `native` - [`NativeBuilder`] running the native packager as a subprocess

mod docker;
mod limits;
mod native;
#[cfg(test)]
pub(crate) mod testing;

pub use docker::{DockerBackend, check_docker_available};
pub use limits::ContainerLimits;
pub use native::CommandNativeBuilder;

use crate::error::Result;
use crate::gate::Credential;
use std::future::Future;
use std::path::PathBuf;

/// Identifier the backend assigned to a built image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageId(pub String);

/// A single-platform image build.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Target key or architecture the build belongs to, for logs
    pub label: String,
    /// Path of the build descriptor (Dockerfile)
    pub descriptor: PathBuf,
    /// Build context directory
    pub context: PathBuf,
    /// Pin the build to a container platform (e.g. `linux/arm64`)
    pub platform: Option<String>,
    /// Full image names to tag the result with; the first is the primary name
    pub tags: Vec<String>,
}

/// Host directory bound into a container.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VolumeBinding {
    /// Absolute host path
    pub host: PathBuf,
    /// Mount point inside the container
    pub container: String,
}

/// A multi-platform manifest build, pushed as one operation.
#[derive(Debug, Clone)]
pub struct ManifestRequest {
    /// Path of the tool's Dockerfile
    pub descriptor: PathBuf,
    /// Build context directory
    pub context: PathBuf,
    /// Every container platform the manifest spans
    pub platforms: Vec<String>,
    /// Full manifest names
    pub tags: Vec<String>,
}

/// Outcome of an idempotent image removal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Removal {
    /// The image existed and was removed
    Removed,
    /// Nothing to remove
    Absent,
}

/// Image build/run/push operations.
///
/// Implementations must make `remove_image` idempotent: removing an image
/// that does not exist returns `Removal::Absent`, not an error.
pub trait ImageBackend: Send + Sync {
    /// Build an image from a descriptor
    fn build(&self, request: &BuildRequest) -> impl Future<Output = Result<ImageId>> + Send;

    /// Run an image to completion with one bind mount, returning its exit code
    fn run(
        &self,
        image: &str,
        binding: &VolumeBinding,
    ) -> impl Future<Output = Result<i32>> + Send;

    /// Push one image reference
    fn push(&self, reference: &str) -> impl Future<Output = Result<()>> + Send;

    /// Authenticate against a registry
    fn login(
        &self,
        registry: &str,
        credential: &Credential,
    ) -> impl Future<Output = Result<()>> + Send;

    /// Remove a local image by name
    fn remove_image(&self, name: &str) -> impl Future<Output = Result<Removal>> + Send;

    /// Build and push a multi-platform manifest atomically
    fn build_manifest(&self, request: &ManifestRequest)
    -> impl Future<Output = Result<()>> + Send;
}

/// What the native packager produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeBuildOutput {
    /// Directory holding the produced files
    pub output_dir: PathBuf,
}

/// The native per-target packager, treated as opaque.
pub trait NativeBuilder: Send + Sync {
    /// Build for `target_argument` (e.g. `linux-x86_64`). A non-zero exit is an error.
    fn invoke(
        &self,
        target_argument: &str,
    ) -> impl Future<Output = Result<NativeBuildOutput>> + Send;
}
