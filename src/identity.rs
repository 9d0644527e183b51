//! Run identity: the commit-derived state every tag is computed from.

use crate::error::{IdentityError, Result};
use std::fmt;
use std::path::Path;
use std::time::Duration;
use tokio::process::Command;
use tokio::time::timeout;

/// Width of the content-derived tag.
pub const SHORT_HASH_LEN: usize = 8;

/// Timeout for each git query. These are local reads and should be instant.
const GIT_QUERY_TIMEOUT: Duration = Duration::from_secs(10);

/// Identity of a run, computed once and never mutated.
///
/// `exact_tag` is present only when HEAD is exactly an existing tag
/// (a release build); otherwise the run is a snapshot build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RunIdentity {
    short_hash: String,
    exact_tag: Option<String>,
}

impl RunIdentity {
    /// Builds an identity from already-known values, validating both.
    pub fn new(short_hash: impl Into<String>, exact_tag: Option<String>) -> Result<Self> {
        let short_hash = short_hash.into().to_ascii_lowercase();
        if short_hash.len() != SHORT_HASH_LEN || !short_hash.chars().all(|c| c.is_ascii_hexdigit())
        {
            return Err(IdentityError::InvalidShortHash {
                hash: short_hash,
                expected: SHORT_HASH_LEN,
            }
            .into());
        }

        if let Some(tag) = &exact_tag {
            validate_image_tag(tag)?;
        }

        Ok(Self {
            short_hash,
            exact_tag,
        })
    }

    /// Reads HEAD and an exact tag match from the repository at `repo`.
    pub async fn detect(repo: &Path) -> Result<Self> {
        let head = git_query(repo, &["rev-parse", "HEAD"])
            .await?
            .ok_or_else(|| IdentityError::GitUnavailable {
                path: repo.to_path_buf(),
                reason: "`git rev-parse HEAD` failed (no commits yet?)".to_string(),
            })?;

        // Fixed width regardless of how many characters git would need to disambiguate
        let short_hash: String = head.chars().take(SHORT_HASH_LEN).collect();

        // Non-zero exit means HEAD is not exactly tagged
        let exact_tag = git_query(repo, &["describe", "--exact-match", "--tags", "HEAD"]).await?;

        log::debug!(
            "Run identity: {} ({})",
            short_hash,
            exact_tag.as_deref().unwrap_or("snapshot")
        );

        Self::new(short_hash, exact_tag)
    }

    /// Content-derived identifier
    pub fn short_hash(&self) -> &str {
        &self.short_hash
    }

    /// Release tag, if HEAD is exactly tagged
    pub fn exact_tag(&self) -> Option<&str> {
        self.exact_tag.as_deref()
    }

    /// Whether this run is a release build
    pub fn is_release(&self) -> bool {
        self.exact_tag.is_some()
    }
}

impl fmt::Display for RunIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.exact_tag {
            Some(tag) => write!(f, "{} (release {})", self.short_hash, tag),
            None => write!(f, "{} (snapshot)", self.short_hash),
        }
    }
}

/// Runs a git query, returning trimmed stdout on success and `None` on a non-zero exit.
async fn git_query(repo: &Path, args: &[&str]) -> Result<Option<String>> {
    let output = timeout(
        GIT_QUERY_TIMEOUT,
        Command::new("git")
            .args(args)
            .current_dir(repo)
            .kill_on_drop(true)
            .output(),
    )
    .await
    .map_err(|_| IdentityError::GitUnavailable {
        path: repo.to_path_buf(),
        reason: format!(
            "`git {}` timed out after {} seconds",
            args.join(" "),
            GIT_QUERY_TIMEOUT.as_secs()
        ),
    })?
    .map_err(|e| IdentityError::GitUnavailable {
        path: repo.to_path_buf(),
        reason: e.to_string(),
    })?;

    if !output.status.success() {
        return Ok(None);
    }

    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
    Ok((!stdout.is_empty()).then_some(stdout))
}

/// Image tags: `[A-Za-z0-9_][A-Za-z0-9_.-]*`, at most 128 characters.
/// The per-architecture suffix (`-arm64`) must still fit.
fn validate_image_tag(tag: &str) -> Result<()> {
    const MAX_TAG_LEN: usize = 128;
    const LONGEST_SUFFIX: usize = "-arm64".len();

    let invalid = |reason: &str| -> crate::error::ReleaseError {
        IdentityError::InvalidTag {
            tag: tag.to_string(),
            reason: reason.to_string(),
        }
        .into()
    };

    let mut chars = tag.chars();
    match chars.next() {
        None => return Err(invalid("tag is empty")),
        Some(c) if !(c.is_ascii_alphanumeric() || c == '_') => {
            return Err(invalid("must start with a letter, digit or underscore"));
        }
        Some(_) => {}
    }
    if !chars.all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-')) {
        return Err(invalid("only letters, digits, '_', '.' and '-' are allowed"));
    }
    if tag.len() + LONGEST_SUFFIX > MAX_TAG_LEN {
        return Err(invalid("too long to carry an architecture suffix"));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot_identity() {
        let identity = RunIdentity::new("8be54df8", None).expect("valid identity");
        assert_eq!(identity.short_hash(), "8be54df8");
        assert!(!identity.is_release());
        assert_eq!(identity.to_string(), "8be54df8 (snapshot)");
    }

    #[test]
    fn test_hash_is_normalized_to_lowercase() {
        let identity = RunIdentity::new("8BE54DF8", None).expect("valid identity");
        assert_eq!(identity.short_hash(), "8be54df8");
    }

    #[test]
    fn test_rejects_wrong_width_or_non_hex() {
        assert!(RunIdentity::new("8be54df", None).is_err());
        assert!(RunIdentity::new("8be54df80", None).is_err());
        assert!(RunIdentity::new("8be54dfz", None).is_err());
    }

    #[test]
    fn test_release_tag_validation() {
        assert!(RunIdentity::new("8be54df8", Some("v1.0.0".to_string())).is_ok());
        assert!(RunIdentity::new("8be54df8", Some("release/1.0".to_string())).is_err());
        assert!(RunIdentity::new("8be54df8", Some(".hidden".to_string())).is_err());
        assert!(RunIdentity::new("8be54df8", Some(String::new())).is_err());
        assert!(RunIdentity::new("8be54df8", Some("a".repeat(125))).is_err());
    }

    #[tokio::test]
    async fn test_detect_outside_repository_fails() {
        let dir = tempfile::tempdir().expect("tempdir");
        let result = RunIdentity::detect(dir.path()).await;
        assert!(result.is_err());
    }
}
