//! Merging extracted output into the persistent package directory.

use crate::error::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

/// One file copied into the package directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MergedArtifact {
    /// Path relative to the target's package subdirectory
    pub path: PathBuf,
    /// Size in bytes
    pub size: u64,
    /// Lowercase hex SHA-256 of the contents
    pub sha256: String,
}

/// Copies every file under `source` into `destination`, keeping relative paths.
///
/// Existing files at the same relative path are overwritten. Files already in
/// `destination` that the source does not contain are left alone.
pub fn merge_tree(source: &Path, destination: &Path) -> Result<Vec<MergedArtifact>> {
    std::fs::create_dir_all(destination)?;

    let mut merged = Vec::new();
    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            std::io::Error::other(format!("walking {}: {}", source.display(), e))
        })?;
        if !entry.file_type().is_file() {
            continue;
        }

        let relative = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| std::io::Error::other(e.to_string()))?
            .to_path_buf();
        let target = destination.join(&relative);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let size = std::fs::copy(entry.path(), &target)?;
        merged.push(MergedArtifact {
            sha256: sha256_file(&target)?,
            path: relative,
            size,
        });
    }

    log::debug!(
        "Merged {} file(s) from {} into {}",
        merged.len(),
        source.display(),
        destination.display()
    );
    Ok(merged)
}

/// SHA-256 of a file, streamed in 8 KiB chunks.
pub fn sha256_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut buffer = [0; 8192];

    loop {
        let n = file.read(&mut buffer)?;
        if n == 0 {
            break;
        }
        hasher.update(&buffer[..n]);
    }

    Ok(hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sha256_of_known_content() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("abc");
        std::fs::write(&path, b"abc").expect("write");
        assert_eq!(
            sha256_file(&path).expect("hash"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_merge_keeps_layout_and_overwrites() {
        let source = tempfile::tempdir().expect("tempdir");
        let destination = tempfile::tempdir().expect("tempdir");

        std::fs::create_dir_all(source.path().join("lib")).expect("mkdir");
        std::fs::write(source.path().join("finder"), b"new").expect("write");
        std::fs::write(source.path().join("lib/core.so"), b"core").expect("write");
        std::fs::write(destination.path().join("finder"), b"old").expect("write");
        std::fs::write(destination.path().join("keep.txt"), b"keep").expect("write");

        let merged = merge_tree(source.path(), destination.path()).expect("merge");

        let paths: Vec<PathBuf> = merged.iter().map(|a| a.path.clone()).collect();
        assert_eq!(paths, vec![PathBuf::from("finder"), Path::new("lib").join("core.so")]);
        assert_eq!(
            std::fs::read(destination.path().join("finder")).expect("read"),
            b"new"
        );
        assert!(destination.path().join("keep.txt").exists());
        assert_eq!(merged[0].size, 3);
    }

    #[test]
    fn test_merge_missing_source_fails() {
        let destination = tempfile::tempdir().expect("tempdir");
        let missing = destination.path().join("nope");
        assert!(merge_tree(&missing, destination.path()).is_err());
    }
}
