//! Tag policy and image references.
//!
//! Every tag the pipeline applies comes from [`tags_for`], so any tag found in
//! the registry can be reconstructed from `(short hash, exact tag, arch)`.

use crate::identity::RunIdentity;
use crate::target::Arch;
use std::collections::BTreeSet;
use std::fmt;

/// Tags for an image (`arch = Some`) or the multi-architecture manifest (`arch = None`).
///
/// Always contains the content-derived tag; contains the release tag iff the
/// run is a release build.
pub fn tags_for(identity: &RunIdentity, arch: Option<Arch>) -> BTreeSet<String> {
    let suffix = |base: &str| match arch {
        Some(arch) => format!("{}-{}", base, arch.operator_token()),
        None => base.to_string(),
    };

    let mut tags = BTreeSet::new();
    tags.insert(suffix(identity.short_hash()));
    if let Some(tag) = identity.exact_tag() {
        tags.insert(suffix(tag));
    }
    tags
}

/// The content-derived tag alone; used as the primary reference of an image.
pub fn primary_tag(identity: &RunIdentity, arch: Option<Arch>) -> String {
    match arch {
        Some(arch) => format!("{}-{}", identity.short_hash(), arch.operator_token()),
        None => identity.short_hash().to_string(),
    }
}

/// `{registry}/{repository}:{tag}`
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ImageReference {
    /// Registry host (e.g. `quay.io`)
    pub registry: String,
    /// Repository path within the registry
    pub repository: String,
    /// Tag, always produced by [`tags_for`]
    pub tag: String,
}

impl fmt::Display for ImageReference {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}:{}", self.registry, self.repository, self.tag)
    }
}

/// Registry coordinates fixed per deployment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Registry host
    pub registry: String,
    /// Repository path
    pub repository: String,
}

impl Repository {
    /// Creates repository coordinates.
    pub fn new(registry: impl Into<String>, repository: impl Into<String>) -> Self {
        Self {
            registry: registry.into(),
            repository: repository.into(),
        }
    }

    /// All references for an image or manifest under the tag policy.
    pub fn image_refs_for(&self, identity: &RunIdentity, arch: Option<Arch>) -> Vec<ImageReference> {
        tags_for(identity, arch)
            .into_iter()
            .map(|tag| self.reference(tag))
            .collect()
    }

    /// The content-derived reference of an image or manifest.
    pub fn primary_ref(&self, identity: &RunIdentity, arch: Option<Arch>) -> ImageReference {
        self.reference(primary_tag(identity, arch))
    }

    fn reference(&self, tag: String) -> ImageReference {
        ImageReference {
            registry: self.registry.clone(),
            repository: self.repository.clone(),
            tag,
        }
    }
}
