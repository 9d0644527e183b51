//! Ephemeral build descriptors for the extraction flow.
//!
//! Synthesis ([`BuildDescriptor::for_target`]) is pure; writing the file is a
//! separate step ([`BuildDescriptor::materialize`]) that hands back a guard
//! deleting the file again.
//!
//! Every descriptor gets a sibling `{name}.dockerignore`. BuildKit prefers it
//! over the context's own `.dockerignore`, so it repeats those rules and adds
//! the package and work directories, which `COPY . /src` would otherwise pull
//! into the builder image.

use crate::error::Result;
use crate::identity::RunIdentity;
use crate::target::{TargetKey, TargetSpec};
use handlebars::Handlebars;
use serde::{Deserialize, Serialize};
use std::io;
use std::path::{Path, PathBuf};

/// Path inside the builder image where the native output is staged
pub const STAGING_PATH: &str = "/staging";

/// Mount point of the host output directory in the extraction container
pub const OUTPUT_MOUNT: &str = "/output";

const DESCRIPTOR_TEMPLATE: &str = r#"FROM {{base_image}}
{{#if system_packages}}
RUN apt-get update \
 && apt-get install -y --no-install-recommends {{system_packages}} \
 && rm -rf /var/lib/apt/lists/*
{{/if}}
WORKDIR /src
COPY . /src
{{#each setup_commands}}
RUN {{this}}
{{/each}}
RUN {{native_command}} {{native_argument}}
RUN mkdir -p {{staging}} && cp -r {{native_dist_dir}}/. {{staging}}/
CMD ["sh", "-c", "cp -r {{staging}}/. {{output}}/"]
"#;

/// Inputs of descriptor synthesis that are not part of the target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DescriptorSettings {
    /// Base image of every builder
    pub base_image: String,
    /// System packages installed before the source is copied
    pub system_packages: Vec<String>,
    /// Commands run after the source is copied (dependency install)
    pub setup_commands: Vec<String>,
    /// Native packager command; the target argument is appended
    pub native_command: String,
}

impl Default for DescriptorSettings {
    fn default() -> Self {
        Self {
            base_image: "python:3.11-slim".to_string(),
            system_packages: vec!["binutils".to_string()],
            setup_commands: vec!["pip install --no-cache-dir -r requirements.txt".to_string()],
            native_command: "python build.py".to_string(),
        }
    }
}

#[derive(Serialize)]
struct TemplateData<'a> {
    base_image: &'a str,
    system_packages: String,
    setup_commands: &'a [String],
    native_command: &'a str,
    native_argument: &'a str,
    native_dist_dir: String,
    staging: &'static str,
    output: &'static str,
}

/// `Dockerfile.{target}.{short_hash}`
pub fn descriptor_name(target: &TargetKey, identity: &RunIdentity) -> String {
    format!("Dockerfile.{}.{}", target, identity.short_hash())
}

/// `{descriptor_name}.dockerignore`, the name BuildKit looks for next to a descriptor
pub fn ignore_file_name(descriptor_name: &str) -> String {
    format!("{}.dockerignore", descriptor_name)
}

/// The context's `.dockerignore` rules, if any, followed by `exclusions`.
pub fn ignore_rules(context: &Path, exclusions: &[String]) -> Result<String> {
    let mut rules = match std::fs::read_to_string(context.join(".dockerignore")) {
        Ok(existing) => existing,
        Err(e) if e.kind() == io::ErrorKind::NotFound => String::new(),
        Err(e) => return Err(e.into()),
    };
    if !rules.is_empty() && !rules.ends_with('\n') {
        rules.push('\n');
    }
    for exclusion in exclusions {
        rules.push_str(exclusion);
        rules.push('\n');
    }
    Ok(rules)
}

/// `{prefix}:{target}-{short_hash}`
pub fn builder_image_name(prefix: &str, target: &TargetKey, identity: &RunIdentity) -> String {
    format!("{}:{}-{}", prefix, target, identity.short_hash())
}

/// A synthesized, not yet written, build descriptor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildDescriptor {
    /// File name, derived from target and short hash
    pub name: String,
    /// Target the descriptor builds
    pub target: TargetKey,
    /// Dockerfile text
    pub contents: String,
}

impl BuildDescriptor {
    /// Renders the descriptor for one target.
    pub fn for_target(
        spec: &TargetSpec,
        identity: &RunIdentity,
        settings: &DescriptorSettings,
    ) -> Result<Self> {
        let mut handlebars = Handlebars::new();
        handlebars.register_escape_fn(handlebars::no_escape);
        handlebars.set_strict_mode(true);

        let data = TemplateData {
            base_image: &settings.base_image,
            system_packages: settings.system_packages.join(" "),
            setup_commands: &settings.setup_commands,
            native_command: &settings.native_command,
            native_argument: spec.native_build_argument,
            // Forward slashes regardless of host; the path is used inside the image
            native_dist_dir: format!(
                "dist/{}/{}",
                spec.platform().native_token(),
                spec.arch().native_token()
            ),
            staging: STAGING_PATH,
            output: OUTPUT_MOUNT,
        };

        let contents = handlebars.render_template(DESCRIPTOR_TEMPLATE, &data)?;

        Ok(Self {
            name: descriptor_name(&spec.key, identity),
            target: spec.key,
            contents,
        })
    }

    /// Writes the descriptor and its ignore file into `dir`. Both live as
    /// long as the guard.
    pub fn materialize(&self, dir: &Path, ignore_rules: &str) -> Result<DescriptorGuard> {
        std::fs::create_dir_all(dir)?;
        let guard = DescriptorGuard {
            path: dir.join(&self.name),
            ignore_path: dir.join(ignore_file_name(&self.name)),
            armed: true,
        };
        std::fs::write(&guard.path, &self.contents)?;
        std::fs::write(&guard.ignore_path, ignore_rules)?;
        log::debug!("Wrote build descriptor {}", guard.path.display());
        Ok(guard)
    }
}

/// Deletes a materialized descriptor and its ignore file when dropped.
#[derive(Debug)]
pub struct DescriptorGuard {
    path: PathBuf,
    ignore_path: PathBuf,
    armed: bool,
}

impl DescriptorGuard {
    /// Location of the written descriptor
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Location of the descriptor's ignore file
    pub fn ignore_path(&self) -> &Path {
        &self.ignore_path
    }

    /// Deletes both files now, reporting failure instead of swallowing it.
    pub fn discard(mut self) -> io::Result<()> {
        self.armed = false;
        remove_if_present(&self.path)?;
        remove_if_present(&self.ignore_path)
    }
}

impl Drop for DescriptorGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        for path in [&self.path, &self.ignore_path] {
            if let Err(e) = remove_if_present(path) {
                log::warn!("Failed to remove {}: {}", path.display(), e);
            }
        }
    }
}

/// Removes a file; a file that is already gone is not an error.
pub fn remove_if_present(path: &Path) -> io::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}
