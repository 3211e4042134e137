//! On-disk plugin cache
//!
//! The cache is a flat directory. Every entry is a single file named
//! `<plugin>-v<version>-<hex digest>` where the digest is the SHA-256 of the
//! file's own bytes (the inner plugin binary, not the archive it came from).
//! The filename is the entry's identity; the directory is never scanned.
//!
//! Entries are write-once. New entries are staged in a hidden temp file in
//! the same directory and then linked into place with no-clobber semantics,
//! so a reader never observes a partially written entry and two writers can
//! never both create the same name.

use crate::hashing::hash_file;
use pluck_sdk::{tagged_version, Digest, PullError};
use std::io;
use std::path::{Path, PathBuf};
use tempfile::{NamedTempFile, PersistError};
use tokio_util::sync::CancellationToken;

/// Permission bits of a published entry
pub const ENTRY_MODE: u32 = 0o700;

const STAGING_PREFIX: &str = ".pluck-";
const STAGING_SUFFIX: &str = ".partial";

/// Result of checking a cache filename against its expected digest
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// No file at that name
    Missing,
    /// The file hashes to the expected digest
    Valid,
    /// The file exists but hashes to something else
    Corrupt(Digest),
}

/// Cache filename for an entry. The version gets exactly one leading `v`.
pub fn file_name(plugin: &str, version: &str, digest: &Digest) -> String {
    format!("{}-{}-{}", plugin, tagged_version(version), digest.to_hex())
}

/// Inverse of [`file_name`] for a known plugin name
///
/// Returns the tagged version and the digest, or `None` if `file_name` is not
/// a cache entry of `plugin`.
pub fn parse_file_name(plugin: &str, file_name: &str) -> Option<(String, Digest)> {
    let rest = file_name.strip_prefix(plugin)?.strip_prefix("-v")?;
    let (version, hex) = rest.rsplit_once('-')?;
    if version.is_empty() || hex.len() != 2 * pluck_sdk::DIGEST_LEN {
        return None;
    }
    if hex.bytes().any(|b| b.is_ascii_uppercase()) {
        return None;
    }
    let digest = Digest::from_hex(hex).ok()?;
    Some((format!("v{}", version), digest))
}

/// A cache directory
#[derive(Debug, Clone)]
pub struct Cache {
    dir: PathBuf,
}

impl Cache {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Full path of an entry
    pub fn entry_path(&self, plugin: &str, version: &str, digest: &Digest) -> PathBuf {
        self.dir.join(file_name(plugin, version, digest))
    }

    /// Re-hash the file at `path` and compare it to `expected`
    pub fn check(
        &self,
        path: &Path,
        expected: &Digest,
        cancel: &CancellationToken,
    ) -> Result<EntryState, PullError> {
        match hash_file(path, cancel) {
            Ok(actual) if actual == *expected => Ok(EntryState::Valid),
            Ok(actual) => Ok(EntryState::Corrupt(actual)),
            Err(PullError::Io(e)) if e.kind() == io::ErrorKind::NotFound => {
                Ok(EntryState::Missing)
            }
            Err(e) => Err(e),
        }
    }

    /// Create a hidden staging file inside the cache directory
    ///
    /// The file is removed when dropped unless it is published.
    pub fn stage(&self) -> Result<NamedTempFile, PullError> {
        tempfile::Builder::new()
            .prefix(STAGING_PREFIX)
            .suffix(STAGING_SUFFIX)
            .tempfile_in(&self.dir)
            .map_err(|e| {
                PullError::Fatal(format!(
                    "Failed to create staging file in {}: {}",
                    self.dir.display(),
                    e
                ))
            })
    }

    /// Make the staged file executable and link it to `target`
    ///
    /// Fails with `AlreadyExists` if `target` exists; the staging file is then
    /// handed back inside the error so the caller can retry.
    pub fn publish(&self, staged: NamedTempFile, target: &Path) -> Result<(), PersistError> {
        if let Err(error) = set_entry_mode(&staged).and_then(|()| staged.as_file().sync_all()) {
            return Err(PersistError {
                error,
                file: staged,
            });
        }
        staged.persist_noclobber(target).map(|_| ())
    }

    /// Remove a corrupt entry so it can be replaced
    pub fn evict(&self, path: &Path) -> Result<(), PullError> {
        match std::fs::remove_file(path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PullError::Fatal(format!(
                "Failed to remove corrupt cache entry {}: {}",
                path.display(),
                e
            ))),
        }
    }
}

#[cfg(unix)]
fn set_entry_mode(file: &NamedTempFile) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.as_file()
        .set_permissions(std::fs::Permissions::from_mode(ENTRY_MODE))
}

#[cfg(not(unix))]
fn set_entry_mode(_file: &NamedTempFile) -> io::Result<()> {
    Ok(())
}
