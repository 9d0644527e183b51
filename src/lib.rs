//! # finder_release
//!
//! Release builds for agent-integrations-finder: native artifacts for every
//! platform/architecture target, extracted from isolated builder images, and
//! multi-architecture container images published under a collision-free tag
//! policy.
//!
//! ## Flows
//!
//! - **Artifact extraction** ([`extract`]): per target, build a throwaway image
//!   from a generated descriptor, copy its staged output into
//!   `{package_dir}/{target}/`, discard the image.
//! - **Image publishing** ([`publisher`]): per architecture, native build plus
//!   platform-pinned image build; then one multi-platform manifest push, only
//!   if every architecture succeeded.
//!
//! Both share the [`tags`] policy, the [`gate`], [`cleanup`] and the bounded
//! [`fanout`] scheduler.
//!
//! ## Usage
//!
//! ```bash
//! finder_release build            # amd64 + arm64 images, local only
//! finder_release push             # build both, push the manifest
//! finder_release package all      # extract artifacts for every target
//! finder_release cleanup          # remove what this commit's runs created
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod backend;
pub mod cleanup;
pub mod cli;
pub mod config;
pub mod context;
pub mod descriptor;
pub mod error;
pub mod extract;
pub mod fanout;
pub mod gate;
pub mod identity;
pub mod publisher;
pub mod report;
pub mod tags;
pub mod target;

pub use backend::{ImageBackend, NativeBuilder};
pub use cleanup::{CleanupReport, CleanupWarning, cleanup};
pub use config::OrchestratorConfig;
pub use context::RunContext;
pub use error::{ReleaseError, Result};
pub use extract::ArtifactExtractor;
pub use identity::RunIdentity;
pub use publisher::{ImagePublisher, PublishPlan};
pub use tags::tags_for;
pub use target::{Arch, Platform, TargetKey, TargetMatrix};
