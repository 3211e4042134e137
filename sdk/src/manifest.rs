//! Release metadata types
//!
//! The decoded form of a release index document. The wire format is JSON:
//!
//! ```json
//! {
//!   "version": "0.20.3",
//!   "builds": [{"os": "linux", "arch": "amd64", "url": "https://.../plug_0.20.3_linux_amd64.zip"}],
//!   "url_shasums": "https://.../plug_0.20.3_SHA256SUMS",
//!   "url_shasums_signatures": ["https://.../plug_0.20.3_SHA256SUMS.sig"]
//! }
//! ```
//!
//! The list endpoint returns an array of the same objects.

use crate::errors::PullError;
use crate::types::{canonical_version, Platform};
use serde::{Deserialize, Deserializer, Serialize};

/// One per-platform build of a release
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Build {
    pub os: String,
    pub arch: String,
    /// Opaque content URL of the build archive
    pub url: String,
}

/// Metadata for a single released version
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionMetadata {
    /// Canonical version, never with a leading `v`
    #[serde(deserialize_with = "deserialize_canonical_version")]
    pub version: String,

    #[serde(default)]
    pub builds: Vec<Build>,

    /// Content URL of the digest manifest
    #[serde(rename = "url_shasums")]
    pub sums_url: String,

    /// Content URLs of detached signatures over the digest manifest
    #[serde(rename = "url_shasums_signatures", default)]
    pub signature_urls: Vec<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp_created: Option<String>,
}

fn deserialize_canonical_version<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    Ok(canonical_version(raw.trim()).to_string())
}

impl VersionMetadata {
    /// Parse a single version document
    pub fn from_json(json: &[u8]) -> Result<Self, PullError> {
        serde_json::from_slice(json)
            .map_err(|e| PullError::Fatal(format!("Failed to parse version metadata: {}", e)))
    }

    /// Parse a version listing document
    pub fn list_from_json(json: &[u8]) -> Result<Vec<Self>, PullError> {
        serde_json::from_slice(json)
            .map_err(|e| PullError::Fatal(format!("Failed to parse version listing: {}", e)))
    }

    /// First build for the given platform
    pub fn build_for(&self, platform: &Platform) -> Option<&Build> {
        self.builds
            .iter()
            .find(|build| platform.matches(&build.os, &build.arch))
    }

    /// Check the invariants the puller relies on
    ///
    /// # Errors
    ///
    /// Returns `PullError::Fatal` when the metadata lists no builds or no
    /// signatures.
    pub fn validate(&self) -> Result<(), PullError> {
        if self.builds.is_empty() {
            return Err(PullError::Fatal(format!(
                "Version {} lists no builds",
                self.version
            )));
        }
        if self.signature_urls.is_empty() {
            return Err(PullError::Fatal(format!(
                "Version {} lists no digest manifest signatures",
                self.version
            )));
        }
        Ok(())
    }
}
