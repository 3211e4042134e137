//! Pluck release sources
//!
//! A source answers three questions about a plugin: which versions exist,
//! what the metadata for one version is, and what the bytes behind a content
//! URL are. Two interchangeable variants exist:
//!
//! - [`HttpSource`]: a release host rooted at a base URL
//! - [`FsSource`]: a directory laid out to mirror the release host
//!
//! Both are stateless and cheap to clone. Error mapping is uniform:
//! "unknown here" is `PullError::NotFound`, network and IO failures are
//! `PullError::Transient`, everything else is `PullError::Fatal`.

pub mod fs;
pub mod http;

pub use fs::FsSource;
pub use http::HttpSource;

use pluck_sdk::{canonical_version, PullError, VersionMetadata};
use std::fmt;
use std::path::PathBuf;
use std::pin::Pin;
use tokio::io::AsyncRead;

/// A readable byte stream for a content URL. Dropping it closes it.
pub type ContentStream = Pin<Box<dyn AsyncRead + Send>>;

/// Path of the release index below a source root
pub(crate) const RELEASES_PREFIX: [&str; 2] = ["v1", "releases"];

/// A place that can answer metadata and content queries for plugins
#[derive(Debug, Clone)]
pub enum Source {
    Http(HttpSource),
    Filesystem(FsSource),
}

impl Source {
    /// An HTTP source rooted at `base_url` with a default client
    pub fn http(base_url: &str) -> Result<Self, PullError> {
        Ok(Self::Http(HttpSource::new(base_url)?))
    }

    /// A filesystem source rooted at `root`
    pub fn filesystem(root: impl Into<PathBuf>) -> Self {
        Self::Filesystem(FsSource::new(root))
    }

    /// Interpret a user-supplied location: `http://` and `https://` values
    /// are HTTP sources, anything else is a filesystem root
    pub fn parse(location: &str) -> Result<Self, PullError> {
        if location.starts_with("http://") || location.starts_with("https://") {
            Self::http(location)
        } else {
            Ok(Self::filesystem(location))
        }
    }

    /// Every version this source knows for `plugin`
    pub async fn list_versions(&self, plugin: &str) -> Result<Vec<VersionMetadata>, PullError> {
        match self {
            Self::Http(source) => source.list_versions(plugin).await,
            Self::Filesystem(source) => source.list_versions(plugin).await,
        }
    }

    /// Metadata for exactly one version; a leading `v` is stripped first
    pub async fn get_version(
        &self,
        plugin: &str,
        version: &str,
    ) -> Result<VersionMetadata, PullError> {
        let version = canonical_version(version);
        match self {
            Self::Http(source) => source.get_version(plugin, version).await,
            Self::Filesystem(source) => source.get_version(plugin, version).await,
        }
    }

    /// Open a content URL previously obtained from this source's metadata
    pub async fn open_content(&self, url: &str) -> Result<ContentStream, PullError> {
        match self {
            Self::Http(source) => source.open_content(url).await,
            Self::Filesystem(source) => source.open_content(url).await,
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Http(source) => write!(f, "{}", source.base_url()),
            Self::Filesystem(source) => write!(f, "{}", source.root().display()),
        }
    }
}

/// Reject path segments that could change the shape of a release path
pub(crate) fn check_segment<'a>(what: &str, segment: &'a str) -> Result<&'a str, PullError> {
    if segment.is_empty()
        || segment == "."
        || segment == ".."
        || segment.contains(['/', '\\'])
    {
        return Err(PullError::Fatal(format!(
            "Invalid {} '{}' in release path",
            what, segment
        )));
    }
    Ok(segment)
}
