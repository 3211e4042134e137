//! Archive extraction
//!
//! Release builds are zip archives; the plugin binary is the entry whose
//! name equals the plugin name. Entries are always streamed, never loaded
//! into memory, so plugin binaries of any size work.
//!
//! Entry sizes are capped. The declared size is checked up front and the
//! actual stream is cut off one byte past the cap, so an archive that lies
//! about its uncompressed size cannot fill the disk.

use crate::hashing::copy_hashed;
use pluck_sdk::{Digest, PullError};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;
use zip::result::ZipError;
use zip::ZipArchive;

/// Default ceiling for an extracted entry (1 GiB)
pub const DEFAULT_MAX_ENTRY_SIZE: u64 = 1024 * 1024 * 1024;

/// Reads single named entries out of zip archives
#[derive(Debug, Clone, Copy)]
pub struct Extractor {
    max_entry_size: u64,
}

impl Default for Extractor {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_ENTRY_SIZE)
    }
}

impl Extractor {
    pub fn new(max_entry_size: u64) -> Self {
        Self { max_entry_size }
    }

    /// Stream `entry_name` through SHA-256 without writing it anywhere
    ///
    /// # Errors
    ///
    /// `PullError::Fatal` if the archive cannot be opened or the entry is
    /// missing or too large; `PullError::Cancelled` if `cancel` fires.
    pub fn hash_entry(
        &self,
        archive_path: &Path,
        entry_name: &str,
        cancel: &CancellationToken,
    ) -> Result<Digest, PullError> {
        self.stream_entry(archive_path, entry_name, &mut io::sink(), cancel)
    }

    /// Stream `entry_name` into `target`, returning the digest of what was written
    ///
    /// # Errors
    ///
    /// Same as [`Extractor::hash_entry`], plus IO errors writing `target`.
    pub fn copy_entry<W: Write + ?Sized>(
        &self,
        archive_path: &Path,
        entry_name: &str,
        target: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Digest, PullError> {
        self.stream_entry(archive_path, entry_name, target, cancel)
    }

    fn stream_entry<W: Write + ?Sized>(
        &self,
        archive_path: &Path,
        entry_name: &str,
        target: &mut W,
        cancel: &CancellationToken,
    ) -> Result<Digest, PullError> {
        let file = File::open(archive_path).map_err(|e| {
            PullError::Fatal(format!(
                "Failed to open archive {}: {}",
                archive_path.display(),
                e
            ))
        })?;
        let mut archive = ZipArchive::new(file).map_err(|e| {
            PullError::Fatal(format!(
                "Failed to read archive {}: {}",
                archive_path.display(),
                e
            ))
        })?;

        let entry = match archive.by_name(entry_name) {
            Ok(entry) => entry,
            Err(ZipError::FileNotFound) => {
                return Err(PullError::Fatal(format!(
                    "Archive {} has no entry named '{}'",
                    archive_path.display(),
                    entry_name
                )));
            }
            Err(e) => {
                return Err(PullError::Fatal(format!(
                    "Failed to read entry '{}' of {}: {}",
                    entry_name,
                    archive_path.display(),
                    e
                )));
            }
        };

        if entry.is_dir() {
            return Err(PullError::Fatal(format!(
                "Archive entry '{}' is a directory",
                entry_name
            )));
        }
        if entry.size() > self.max_entry_size {
            return Err(self.too_large(entry_name));
        }

        let mut limited = entry.take(self.max_entry_size + 1);
        let (digest, written) = copy_hashed(&mut limited, target, cancel).map_err(|e| match e {
            PullError::Io(io_err) => PullError::Fatal(format!(
                "Failed to extract '{}': {}",
                entry_name, io_err
            )),
            other => other,
        })?;
        if written > self.max_entry_size {
            return Err(self.too_large(entry_name));
        }

        Ok(digest)
    }

    fn too_large(&self, entry_name: &str) -> PullError {
        PullError::Fatal(format!(
            "Archive entry '{}' exceeds the {} byte limit",
            entry_name, self.max_entry_size
        ))
    }
}
