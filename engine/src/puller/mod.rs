//! Verified plugin puller
//!
//! [`Puller::ensure_downloaded`] turns a [`PluginRequest`] into a cache entry
//! whose bytes are covered by a signature from the trusted release key. The
//! chain of custody is:
//!
//! 1. a detached signature over the digest manifest (`SHA256SUMS`),
//! 2. the manifest line for the build archive,
//! 3. the digest of the plugin binary inside the archive, which names the
//!    cache entry.
//!
//! Nothing reaches the cache directory unless every link holds. Temporary
//! files are `NamedTempFile`s and disappear on every exit path.

pub mod resolve;
pub mod sums;

use crate::archive::Extractor;
use crate::cache::{Cache, EntryState};
use crate::crypto::SignatureVerifier;
use crate::hashing::{finish, CHUNK_SIZE};
use percent_encoding::percent_decode_str;
use pluck_sdk::{tagged_version, Digest, Platform, PluginRequest, PullError, VersionMetadata};
use pluck_sources::{ContentStream, Source};
use reqwest::Url;
use sha2::{Digest as _, Sha256};
use std::future::Future;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Ceiling for a digest manifest (1 MiB)
pub const MAX_SUMS_SIZE: u64 = 1024 * 1024;

/// Ceiling for a single detached signature (64 KiB)
pub const MAX_SIGNATURE_SIZE: u64 = 64 * 1024;

/// Fetches, verifies and caches plugin binaries
///
/// A `Puller` holds no per-call state; share it behind an `Arc` or clone it.
///
/// # Examples
///
/// ```no_run
/// use pluck_engine::puller::Puller;
/// use pluck_sdk::PluginRequest;
/// use pluck_sources::Source;
/// use tokio_util::sync::CancellationToken;
///
/// # async fn run() -> Result<(), pluck_sdk::PullError> {
/// let puller = Puller::new(Source::http("https://releases.pluck.dev")?)?;
/// let request = PluginRequest::new("/var/lib/pluck/plugins", "plug-A");
/// let (version, digest) = puller
///     .ensure_downloaded(&CancellationToken::new(), &[], request)
///     .await?;
/// println!("plug-A {} ({})", version, digest);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone)]
pub struct Puller {
    primary: Source,
    verifier: Arc<SignatureVerifier>,
    platform: Platform,
    temp_dir: Option<PathBuf>,
    extractor: Extractor,
}

impl Puller {
    /// Create a puller whose first source is `primary`
    ///
    /// # Errors
    ///
    /// Returns `PullError::Fatal` if the embedded release key cannot be loaded.
    pub fn new(primary: Source) -> Result<Self, PullError> {
        Ok(Self {
            primary,
            verifier: Arc::new(SignatureVerifier::new()?),
            platform: Platform::current(),
            temp_dir: None,
            extractor: Extractor::default(),
        })
    }

    /// Select builds for another platform
    pub fn with_platform(mut self, platform: Platform) -> Self {
        self.platform = platform;
        self
    }

    /// Directory for downloaded archives; `None` uses the system temp dir
    pub fn with_temp_dir(mut self, temp_dir: Option<PathBuf>) -> Self {
        self.temp_dir = temp_dir;
        self
    }

    pub fn with_extractor(mut self, extractor: Extractor) -> Self {
        self.extractor = extractor;
        self
    }

    pub fn primary(&self) -> &Source {
        &self.primary
    }

    pub fn platform(&self) -> &Platform {
        &self.platform
    }

    /// Make sure a verified copy of the requested plugin is in the cache
    ///
    /// Sources are consulted in order: the primary source first, then
    /// `extra_sources`. Returns the resolved version (with a leading `v`) and
    /// the digest of the cached binary. The entry lives at
    /// [`Cache::entry_path`] for those values.
    ///
    /// # Errors
    ///
    /// - `NotFound` if no source knows the plugin or version
    /// - `SignatureInvalid` if no signature over the digest manifest verifies
    /// - `DigestMismatch` if the archive or the binary hash to the wrong value
    /// - `PlatformUnavailable` if the release has no build for this platform
    /// - `Cancelled` if `cancel` fires
    /// - `Transient` or `Fatal` for everything else
    pub async fn ensure_downloaded(
        &self,
        cancel: &CancellationToken,
        extra_sources: &[Source],
        request: PluginRequest,
    ) -> Result<(String, Digest), PullError> {
        request.validate()?;
        if cancel.is_cancelled() {
            return Err(PullError::Cancelled);
        }

        let sources = self.sources(extra_sources);
        let name = request.name.as_str();
        let cache = Cache::new(&request.dir);

        let version = match request.requested_version() {
            Some(version) => tagged_version(version),
            None => self.resolve_latest(cancel, &sources, name).await?,
        };
        debug!(plugin = name, version = %version, "Resolved plugin version");

        if let Some(expected) = request.expected_digest {
            let target = cache.entry_path(name, &version, &expected);
            match check_entry(&cache, &target, expected, cancel).await? {
                EntryState::Valid => {
                    info!(plugin = name, version = %version, path = %target.display(), "Plugin already cached");
                    return Ok((version, expected));
                }
                EntryState::Missing => {
                    debug!(path = %target.display(), "No cache entry, downloading");
                }
                EntryState::Corrupt(actual) => {
                    warn!(
                        path = %target.display(),
                        actual = %actual,
                        "Cache entry does not match its digest, downloading a fresh copy"
                    );
                }
            }
        }

        let (source, metadata) = self.fetch_metadata(cancel, &sources, name, &version).await?;
        metadata.validate()?;

        let sums = self.read_verified_sums(cancel, source, &metadata).await?;

        let build = metadata
            .build_for(&self.platform)
            .ok_or_else(|| PullError::PlatformUnavailable {
                os: self.platform.os.clone(),
                arch: self.platform.arch.clone(),
            })?;
        let archive_name = archive_file_name(&build.url)?;

        let (archive, archive_digest) = self.download_archive(cancel, source, &build.url).await?;

        let listed = sums::find_digest(&sums, &archive_name).ok_or_else(|| {
            PullError::Fatal(format!(
                "Digest manifest is missing an entry for '{}'",
                archive_name
            ))
        })?;
        if listed != archive_digest {
            return Err(PullError::DigestMismatch {
                subject: archive_name,
                expected: listed.to_hex(),
                actual: archive_digest.to_hex(),
            });
        }
        debug!(archive = %archive_name, digest = %archive_digest, "Archive matches the signed manifest");

        let digest = {
            let extractor = self.extractor;
            let archive_path = archive.path().to_path_buf();
            let entry = name.to_string();
            let cancel = cancel.clone();
            blocking(move || extractor.hash_entry(&archive_path, &entry, &cancel)).await?
        };

        if let Some(expected) = request.expected_digest {
            if expected != digest {
                return Err(PullError::DigestMismatch {
                    subject: format!("{} binary", name),
                    expected: expected.to_hex(),
                    actual: digest.to_hex(),
                });
            }
        }

        let target = cache.entry_path(name, &version, &digest);
        {
            let extractor = self.extractor;
            let archive_path = archive.path().to_path_buf();
            let entry = name.to_string();
            let target = target.clone();
            let cancel = cancel.clone();
            blocking(move || {
                materialize(&cache, &extractor, &archive_path, &entry, &digest, &target, &cancel)
            })
            .await?;
        }
        drop(archive);

        info!(plugin = name, version = %version, path = %target.display(), "Plugin cached");
        Ok((version, digest))
    }

    /// Versions published by the first source that knows `plugin`
    ///
    /// Sources answering `NotFound` or an empty list are skipped.
    pub async fn list_versions(
        &self,
        cancel: &CancellationToken,
        extra_sources: &[Source],
        plugin: &str,
    ) -> Result<Vec<VersionMetadata>, PullError> {
        first_listing(cancel, &self.sources(extra_sources), plugin).await
    }

    fn sources<'a>(&'a self, extra_sources: &'a [Source]) -> Vec<&'a Source> {
        std::iter::once(&self.primary)
            .chain(extra_sources.iter())
            .collect()
    }

    async fn resolve_latest(
        &self,
        cancel: &CancellationToken,
        sources: &[&Source],
        plugin: &str,
    ) -> Result<String, PullError> {
        let listing = first_listing(cancel, sources, plugin).await?;
        let latest = resolve::latest(&listing)?.ok_or_else(|| {
            PullError::NotFound(format!("No versions published for '{}'", plugin))
        })?;
        Ok(tagged_version(&latest.to_string()))
    }

    async fn fetch_metadata<'a>(
        &self,
        cancel: &CancellationToken,
        sources: &[&'a Source],
        plugin: &str,
        version: &str,
    ) -> Result<(&'a Source, VersionMetadata), PullError> {
        for source in sources {
            match cancellable(cancel, source.get_version(plugin, version)).await {
                Ok(metadata) => {
                    debug!(source = %source, plugin, version, "Fetched release metadata");
                    return Ok((*source, metadata));
                }
                Err(e) if e.is_not_found() => {
                    debug!(source = %source, plugin, version, "Source does not have version");
                }
                Err(e) => return Err(e),
            }
        }
        Err(PullError::NotFound(format!(
            "No source publishes {} {}",
            plugin, version
        )))
    }

    /// Fetch the digest manifest and accept it once any signature verifies
    async fn read_verified_sums(
        &self,
        cancel: &CancellationToken,
        source: &Source,
        metadata: &VersionMetadata,
    ) -> Result<Vec<u8>, PullError> {
        let sums = read_content(cancel, source, &metadata.sums_url, MAX_SUMS_SIZE).await?;

        let mut reasons = Vec::new();
        for (index, url) in metadata.signature_urls.iter().enumerate() {
            let outcome = match read_content(cancel, source, url, MAX_SIGNATURE_SIZE).await {
                Ok(signature) => self.verifier.verify(&sums, &signature),
                Err(PullError::Cancelled) => return Err(PullError::Cancelled),
                Err(e) => Err(e.to_string()),
            };
            match outcome {
                Ok(()) => {
                    debug!(signature = %url, "Digest manifest signature verified");
                    return Ok(sums);
                }
                Err(reason) => {
                    warn!(signature = %url, reason = %reason, "Rejected digest manifest signature");
                    reasons.push(format!("signature {} ({}): {}", index + 1, url, reason));
                }
            }
        }

        Err(PullError::SignatureInvalid(reasons))
    }

    /// Stream a build archive into a temp file, hashing it on the way
    async fn download_archive(
        &self,
        cancel: &CancellationToken,
        source: &Source,
        url: &str,
    ) -> Result<(NamedTempFile, Digest), PullError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(".pluck-archive-").suffix(".zip");
        let archive = match &self.temp_dir {
            Some(dir) => builder.tempfile_in(dir),
            None => builder.tempfile(),
        }
        .map_err(|e| PullError::Fatal(format!("Failed to create temp file for archive: {}", e)))?;

        let mut stream = cancellable(cancel, source.open_content(url)).await?;
        let mut out = tokio::fs::File::from_std(
            archive
                .reopen()
                .map_err(|e| PullError::Fatal(format!("Failed to open archive temp file: {}", e)))?,
        );

        let mut hasher = Sha256::new();
        let mut buffer = vec![0u8; CHUNK_SIZE];
        let mut total: u64 = 0;
        loop {
            let n = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(PullError::Cancelled),
                read = stream.read(&mut buffer) => read.map_err(|e| read_error(url, e))?,
            };
            if n == 0 {
                break;
            }
            hasher.update(&buffer[..n]);
            out.write_all(&buffer[..n])
                .await
                .map_err(|e| PullError::Fatal(format!("Failed to write archive: {}", e)))?;
            total += n as u64;
        }
        out.flush()
            .await
            .map_err(|e| PullError::Fatal(format!("Failed to write archive: {}", e)))?;

        let digest = finish(hasher);
        debug!(url, bytes = total, digest = %digest, "Downloaded archive");
        Ok((archive, digest))
    }
}

async fn first_listing(
    cancel: &CancellationToken,
    sources: &[&Source],
    plugin: &str,
) -> Result<Vec<VersionMetadata>, PullError> {
    for source in sources {
        match cancellable(cancel, source.list_versions(plugin)).await {
            Ok(listing) if listing.is_empty() => {
                debug!(source = %source, plugin, "Source lists no versions");
            }
            Ok(listing) => return Ok(listing),
            Err(e) if e.is_not_found() => {
                debug!(source = %source, plugin, "Source does not know plugin");
            }
            Err(e) => return Err(e),
        }
    }
    Err(PullError::NotFound(format!(
        "No source publishes plugin '{}'",
        plugin
    )))
}

/// Race a source operation against the cancellation token
async fn cancellable<T, F>(cancel: &CancellationToken, operation: F) -> Result<T, PullError>
where
    F: Future<Output = Result<T, PullError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(PullError::Cancelled),
        result = operation => result,
    }
}

/// Run filesystem and archive work off the async threads
async fn blocking<T, F>(work: F) -> Result<T, PullError>
where
    F: FnOnce() -> Result<T, PullError> + Send + 'static,
    T: Send + 'static,
{
    tokio::task::spawn_blocking(work)
        .await
        .map_err(|e| PullError::Fatal(format!("Background task failed: {}", e)))?
}

async fn check_entry(
    cache: &Cache,
    target: &Path,
    expected: Digest,
    cancel: &CancellationToken,
) -> Result<EntryState, PullError> {
    let cache = cache.clone();
    let target = target.to_path_buf();
    let cancel = cancel.clone();
    blocking(move || cache.check(&target, &expected, &cancel)).await
}

/// Read a whole content URL, refusing anything larger than `limit`
async fn read_content(
    cancel: &CancellationToken,
    source: &Source,
    url: &str,
    limit: u64,
) -> Result<Vec<u8>, PullError> {
    let stream: ContentStream = cancellable(cancel, source.open_content(url)).await?;
    let mut body = Vec::new();
    let mut limited = stream.take(limit + 1);
    tokio::select! {
        biased;
        _ = cancel.cancelled() => return Err(PullError::Cancelled),
        read = limited.read_to_end(&mut body) => {
            read.map_err(|e| read_error(url, e))?;
        }
    }
    if body.len() as u64 > limit {
        return Err(PullError::Fatal(format!(
            "Content at {} exceeds the {} byte limit",
            url, limit
        )));
    }
    Ok(body)
}

fn read_error(url: &str, error: io::Error) -> PullError {
    PullError::Transient(format!("Failed to read {}: {}", url, error))
}

/// Filename a build archive is listed under in the digest manifest
///
/// The last path segment of the URL, percent-decoded, ignoring any query or
/// fragment.
pub fn archive_file_name(url: &str) -> Result<String, PullError> {
    let segment = match Url::parse(url) {
        Ok(parsed) => parsed
            .path_segments()
            .and_then(|mut segments| segments.next_back().map(str::to_string)),
        Err(_) => {
            let path = url.split(['?', '#']).next().unwrap_or_default();
            path.rsplit('/').next().map(str::to_string)
        }
    };
    let segment = segment
        .filter(|name| !name.is_empty())
        .ok_or_else(|| PullError::Fatal(format!("Archive URL has no file name: '{}'", url)))?;

    let name = percent_decode_str(&segment).decode_utf8().map_err(|e| {
        PullError::Fatal(format!("Archive file name in '{}' is not UTF-8: {}", url, e))
    })?;
    if name.contains(['/', '\\']) {
        return Err(PullError::Fatal(format!(
            "Archive file name in '{}' contains a path separator",
            url
        )));
    }
    Ok(name.into_owned())
}

/// Stage the entry, then publish it; one self-heal retry on collision
fn materialize(
    cache: &Cache,
    extractor: &Extractor,
    archive: &Path,
    entry: &str,
    digest: &Digest,
    target: &Path,
    cancel: &CancellationToken,
) -> Result<(), PullError> {
    let mut staged = cache.stage()?;
    let written = extractor.copy_entry(archive, entry, staged.as_file_mut(), cancel)?;
    if written != *digest {
        return Err(PullError::DigestMismatch {
            subject: format!("extracted {}", entry),
            expected: digest.to_hex(),
            actual: written.to_hex(),
        });
    }

    let staged = match cache.publish(staged, target) {
        Ok(()) => return Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => e.file,
        Err(e) => return Err(publish_error(target, &e.error)),
    };

    match cache.check(target, digest, cancel)? {
        EntryState::Valid => {
            debug!(path = %target.display(), "Cache entry was published concurrently");
            return Ok(());
        }
        EntryState::Missing => {}
        EntryState::Corrupt(actual) => {
            warn!(path = %target.display(), actual = %actual, "Replacing corrupt cache entry");
            cache.evict(target)?;
        }
    }

    match cache.publish(staged, target) {
        Ok(()) => Ok(()),
        Err(e) if e.error.kind() == io::ErrorKind::AlreadyExists => {
            match cache.check(target, digest, cancel)? {
                EntryState::Valid => Ok(()),
                _ => Err(PullError::Fatal(format!(
                    "Cache entry {} is still corrupt after replacing it",
                    target.display()
                ))),
            }
        }
        Err(e) => Err(publish_error(target, &e.error)),
    }
}

fn publish_error(target: &Path, error: &io::Error) -> PullError {
    PullError::Fatal(format!(
        "Failed to publish cache entry {}: {}",
        target.display(),
        error
    ))
}
