//! Standalone archives written next to each target's package subdirectory.
//!
//! `{package_dir}/agent-integrations-finder-{platform}-{arch}.tar.gz` for
//! Linux and macOS, `.zip` for Windows. Both hold the contents of
//! `{package_dir}/{target}/` with paths relative to it.

use crate::error::Result;
use crate::extract::sha256_file;
use crate::target::{Platform, TargetKey};
use flate2::Compression;
use flate2::write::GzEncoder;
use serde::Serialize;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::SimpleFileOptions;

/// Leading component of every archive name
pub const ARCHIVE_PREFIX: &str = "agent-integrations-finder";

/// A written archive.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PackageArchive {
    /// Location of the archive
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the archive
    pub sha256: String,
}

/// File name of the archive for `key`.
pub fn archive_name(key: &TargetKey) -> String {
    let extension = match key.platform() {
        Platform::Windows => "zip",
        Platform::Linux | Platform::Macos => "tar.gz",
    };
    format!(
        "{}-{}-{}.{}",
        ARCHIVE_PREFIX,
        key.platform().native_token(),
        key.arch().native_token(),
        extension
    )
}

/// Archives the contents of `source` into `output_dir`, replacing an earlier
/// archive of the same name.
pub fn write_archive(key: &TargetKey, source: &Path, output_dir: &Path) -> Result<PackageArchive> {
    std::fs::create_dir_all(output_dir)?;
    let path = output_dir.join(archive_name(key));

    match key.platform() {
        Platform::Windows => write_zip(source, &path)?,
        Platform::Linux | Platform::Macos => write_tar_gz(source, &path)?,
    }

    Ok(PackageArchive {
        size: std::fs::metadata(&path)?.len(),
        sha256: sha256_file(&path)?,
        path,
    })
}

/// Entries under `source`, sorted, with their `/`-separated relative names.
fn entries(source: &Path) -> Result<Vec<(PathBuf, String, bool)>> {
    let mut entries = Vec::new();
    for entry in WalkDir::new(source).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::other)?;
        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(io::Error::other)?;
        let name = relative
            .components()
            .map(|c| c.as_os_str().to_string_lossy())
            .collect::<Vec<_>>()
            .join("/");
        entries.push((entry.path().to_path_buf(), name, entry.file_type().is_dir()));
    }
    Ok(entries)
}

fn write_tar_gz(source: &Path, destination: &Path) -> Result<()> {
    let file = File::create(destination)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);

    for (path, name, is_dir) in entries(source)? {
        let metadata = std::fs::metadata(&path)?;
        let mut header = tar::Header::new_gnu();
        header.set_metadata_in_mode(&metadata, tar::HeaderMode::Deterministic);
        if is_dir {
            builder.append_data(&mut header, &name, io::empty())?;
        } else {
            let mut contents = File::open(&path)?;
            builder.append_data(&mut header, &name, &mut contents)?;
        }
    }

    let mut file = builder.into_inner()?.finish()?;
    file.flush()?;
    Ok(())
}

fn write_zip(source: &Path, destination: &Path) -> Result<()> {
    let file = File::create(destination)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for (path, name, is_dir) in entries(source)? {
        if is_dir {
            zip.add_directory(name, options)?;
        } else {
            zip.start_file(name, options)?;
            let mut contents = File::open(&path)?;
            io::copy(&mut contents, &mut zip)?;
        }
    }

    zip.finish()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::TargetMatrix;

    #[test]
    fn test_archive_names() {
        let name = |key: &str| archive_name(&TargetMatrix::parse(key).expect("known target"));
        assert_eq!(name("linux-x86_64"), "agent-integrations-finder-linux-x86_64.tar.gz");
        assert_eq!(name("macos-aarch64"), "agent-integrations-finder-macos-aarch64.tar.gz");
        assert_eq!(name("win-x86_64"), "agent-integrations-finder-win-x86_64.zip");
    }

    #[test]
    fn test_empty_directory_still_yields_an_archive() {
        let root = tempfile::tempdir().expect("tempdir");
        let source = root.path().join("linux-x86_64");
        std::fs::create_dir_all(&source).expect("mkdir");

        let key = TargetMatrix::parse("linux-x86_64").expect("known target");
        let archive = write_archive(&key, &source, root.path()).expect("archive");
        assert!(archive.path.is_file());
        assert!(archive.size > 0);
        assert_eq!(archive.sha256.len(), 64);
    }
}
