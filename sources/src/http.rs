//! HTTP release source
//!
//! Maps a plugin to `GET <base>/v1/releases/<plugin>` and a version to
//! `GET <base>/v1/releases/<plugin>/<version>`. Content URLs are fetched as
//! given; relative ones are resolved against the base URL.

use crate::{check_segment, ContentStream, RELEASES_PREFIX};
use futures::TryStreamExt;
use pluck_sdk::{PullError, VersionMetadata};
use reqwest::{StatusCode, Url};
use tokio_util::io::StreamReader;
use tracing::debug;

/// User agent sent when no client is supplied
pub const DEFAULT_USER_AGENT: &str = concat!("pluck/", env!("CARGO_PKG_VERSION"));

/// A release host rooted at a base URL
#[derive(Debug, Clone)]
pub struct HttpSource {
    base: Url,
    client: reqwest::Client,
}

impl HttpSource {
    /// Create a source with a default client
    ///
    /// # Errors
    ///
    /// Returns `PullError::Fatal` if the URL does not parse, is not http(s),
    /// or the client cannot be built.
    pub fn new(base_url: &str) -> Result<Self, PullError> {
        let client = reqwest::Client::builder()
            .user_agent(DEFAULT_USER_AGENT)
            .build()
            .map_err(|e| PullError::Fatal(format!("Failed to build HTTP client: {}", e)))?;
        Self::with_client(base_url, client)
    }

    /// Create a source that shares an existing client
    pub fn with_client(base_url: &str, client: reqwest::Client) -> Result<Self, PullError> {
        let base = Url::parse(base_url)
            .map_err(|e| PullError::Fatal(format!("Invalid source URL '{}': {}", base_url, e)))?;
        if !matches!(base.scheme(), "http" | "https") || base.cannot_be_a_base() {
            return Err(PullError::Fatal(format!(
                "Source URL must be an absolute http(s) URL: '{}'",
                base_url
            )));
        }
        Ok(Self { base, client })
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }

    pub async fn list_versions(&self, plugin: &str) -> Result<Vec<VersionMetadata>, PullError> {
        let url = self.releases_url(&[check_segment("plugin", plugin)?])?;
        let body = self.fetch_document(url, plugin).await?;
        VersionMetadata::list_from_json(&body)
    }

    pub async fn get_version(
        &self,
        plugin: &str,
        version: &str,
    ) -> Result<VersionMetadata, PullError> {
        let url = self.releases_url(&[
            check_segment("plugin", plugin)?,
            check_segment("version", version)?,
        ])?;
        let body = self
            .fetch_document(url, &format!("{} {}", plugin, version))
            .await?;
        VersionMetadata::from_json(&body)
    }

    pub async fn open_content(&self, url: &str) -> Result<ContentStream, PullError> {
        let url = self
            .base
            .join(url)
            .map_err(|e| PullError::Fatal(format!("Invalid content URL '{}': {}", url, e)))?;

        debug!(%url, "Opening content");
        let response = self.get(url.clone()).await?;
        let response = check_status(response, &url, url.as_str())?;

        let stream = response.bytes_stream().map_err(std::io::Error::other);
        Ok(Box::pin(StreamReader::new(stream)))
    }

    /// `<base>/v1/releases/<segments...>`, tolerating a trailing slash on the base
    fn releases_url(&self, segments: &[&str]) -> Result<Url, PullError> {
        let mut url = self.base.clone();
        url.path_segments_mut()
            .map_err(|_| PullError::Fatal(format!("Source URL cannot be a base: {}", self.base)))?
            .pop_if_empty()
            .extend(RELEASES_PREFIX)
            .extend(segments);
        Ok(url)
    }

    async fn fetch_document(&self, url: Url, what: &str) -> Result<Vec<u8>, PullError> {
        debug!(%url, "Fetching release document");
        let response = self.get(url.clone()).await?;
        let response = check_status(response, &url, what)?;
        let body = response
            .bytes()
            .await
            .map_err(|e| PullError::Transient(format!("Failed to read {}: {}", url, e)))?;
        Ok(body.to_vec())
    }

    async fn get(&self, url: Url) -> Result<reqwest::Response, PullError> {
        self.client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| classify_request_error(&url, e))
    }
}

fn check_status(
    response: reqwest::Response,
    url: &Url,
    what: &str,
) -> Result<reqwest::Response, PullError> {
    let status = response.status();
    if status == StatusCode::NOT_FOUND {
        return Err(PullError::NotFound(format!("{} not found at {}", what, url)));
    }
    if !status.is_success() {
        return Err(PullError::Fatal(format!(
            "Unexpected HTTP status {} from {}",
            status, url
        )));
    }
    Ok(response)
}

fn classify_request_error(url: &Url, err: reqwest::Error) -> PullError {
    if err.is_builder() {
        PullError::Fatal(format!("Invalid request to {}: {}", url, err))
    } else {
        PullError::Transient(format!("Request to {} failed: {}", url, err))
    }
}
