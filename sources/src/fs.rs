//! Filesystem release source
//!
//! Mirrors the HTTP layout below a root directory. Because a plugin path is
//! both a document and the parent of its version documents, every document
//! is stored as `index.json` inside its path:
//!
//! ```text
//! <root>/v1/releases/<plugin>/index.json            version listing
//! <root>/v1/releases/<plugin>/<version>/index.json  one version
//! ```
//!
//! Content URLs resolve as follows: `file://` URLs name a path directly,
//! `http(s)://` URLs map their URL path below the root, and anything else is a
//! path relative to the root.

use crate::{check_segment, ContentStream, RELEASES_PREFIX};
use pluck_sdk::{PullError, VersionMetadata};
use reqwest::Url;
use std::io;
use std::path::{Component, Path, PathBuf};
use tracing::debug;

const INDEX_FILE: &str = "index.json";

/// A local directory laid out like a release host
#[derive(Debug, Clone)]
pub struct FsSource {
    root: PathBuf,
}

impl FsSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub async fn list_versions(&self, plugin: &str) -> Result<Vec<VersionMetadata>, PullError> {
        let path = self.document_path(&[check_segment("plugin", plugin)?]);
        let body = read_document(&path).await?;
        VersionMetadata::list_from_json(&body)
    }

    pub async fn get_version(
        &self,
        plugin: &str,
        version: &str,
    ) -> Result<VersionMetadata, PullError> {
        let path = self.document_path(&[
            check_segment("plugin", plugin)?,
            check_segment("version", version)?,
        ]);
        let body = read_document(&path).await?;
        VersionMetadata::from_json(&body)
    }

    pub async fn open_content(&self, url: &str) -> Result<ContentStream, PullError> {
        let path = self.resolve_content(url)?;
        debug!(path = %path.display(), "Opening content");
        let file = tokio::fs::File::open(&path)
            .await
            .map_err(|e| map_io(&path, e))?;
        Ok(Box::pin(file))
    }

    fn document_path(&self, segments: &[&str]) -> PathBuf {
        let mut path = self.root.clone();
        path.extend(RELEASES_PREFIX);
        path.extend(segments);
        path.push(INDEX_FILE);
        path
    }

    fn resolve_content(&self, url: &str) -> Result<PathBuf, PullError> {
        match Url::parse(url) {
            Ok(parsed) if parsed.scheme() == "file" => parsed
                .to_file_path()
                .map_err(|_| PullError::Fatal(format!("Invalid file URL '{}'", url))),
            Ok(parsed) if matches!(parsed.scheme(), "http" | "https") => {
                self.join_relative(parsed.path())
            }
            Ok(parsed) => Err(PullError::Fatal(format!(
                "Unsupported content URL scheme '{}' for a filesystem source",
                parsed.scheme()
            ))),
            Err(_) => self.join_relative(url),
        }
    }

    /// Join `relative` below the root, refusing anything that could leave it
    fn join_relative(&self, relative: &str) -> Result<PathBuf, PullError> {
        let mut path = self.root.clone();
        for component in Path::new(relative.trim_start_matches('/')).components() {
            match component {
                Component::Normal(part) => path.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(PullError::Fatal(format!(
                        "Content path escapes the source root: '{}'",
                        relative
                    )));
                }
            }
        }
        Ok(path)
    }
}

async fn read_document(path: &Path) -> Result<Vec<u8>, PullError> {
    debug!(path = %path.display(), "Reading release document");
    tokio::fs::read(path).await.map_err(|e| map_io(path, e))
}

fn map_io(path: &Path, err: io::Error) -> PullError {
    if err.kind() == io::ErrorKind::NotFound {
        PullError::NotFound(format!("{} does not exist", path.display()))
    } else {
        PullError::Transient(format!("Failed to read {}: {}", path.display(), err))
    }
}
