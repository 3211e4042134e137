//! Streaming SHA-256 helpers
//!
//! Everything that is hashed in pluck goes through [`copy_hashed`]: archive
//! downloads, archive entries, cache files. Memory use is one fixed buffer
//! regardless of input size.

use pluck_sdk::{Digest, PullError};
use sha2::{Digest as _, Sha256};
use std::fs::File;
use std::io::{self, Read, Write};
use std::path::Path;
use tokio_util::sync::CancellationToken;

/// Read buffer size for all streaming copies
pub const CHUNK_SIZE: usize = 8 * 1024;

/// Convert a finished hasher into a [`Digest`]
pub fn finish(hasher: Sha256) -> Digest {
    Digest::from_bytes(hasher.finalize().into())
}

/// Copy `reader` into `writer`, hashing the bytes on the way
///
/// Returns the digest and the number of bytes copied. The cancellation token
/// is checked before every chunk.
pub fn copy_hashed<R, W>(
    reader: &mut R,
    writer: &mut W,
    cancel: &CancellationToken,
) -> Result<(Digest, u64), PullError>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut hasher = Sha256::new();
    let mut buffer = [0u8; CHUNK_SIZE];
    let mut total: u64 = 0;

    loop {
        if cancel.is_cancelled() {
            return Err(PullError::Cancelled);
        }
        let n = match reader.read(&mut buffer) {
            Ok(0) => break,
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&buffer[..n]);
        writer.write_all(&buffer[..n])?;
        total += n as u64;
    }

    Ok((finish(hasher), total))
}

/// Hash everything `reader` yields
pub fn hash_reader<R: Read + ?Sized>(
    reader: &mut R,
    cancel: &CancellationToken,
) -> Result<Digest, PullError> {
    copy_hashed(reader, &mut io::sink(), cancel).map(|(digest, _)| digest)
}

/// Hash a file's full contents
pub fn hash_file(path: &Path, cancel: &CancellationToken) -> Result<Digest, PullError> {
    let mut file = File::open(path)?;
    hash_reader(&mut file, cancel)
}
