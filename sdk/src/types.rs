//! Request and identity types
//!
//! These are the values a caller hands to the puller and gets back from it.

use crate::errors::PullError;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Length in bytes of a SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 digest
///
/// Displays as 64 lowercase hex characters, which is also the form used in
/// cache filenames and digest manifests.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Digest([u8; DIGEST_LEN]);

impl Digest {
    pub const fn from_bytes(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }

    pub fn as_bytes(&self) -> &[u8; DIGEST_LEN] {
        &self.0
    }

    /// Lowercase hex encoding
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse 64 hex characters (either case)
    pub fn from_hex(s: &str) -> Result<Self, PullError> {
        let mut bytes = [0u8; DIGEST_LEN];
        hex::decode_to_slice(s, &mut bytes)
            .map_err(|e| PullError::Fatal(format!("Invalid SHA-256 digest '{}': {}", s, e)))?;
        Ok(Self(bytes))
    }
}

impl From<[u8; DIGEST_LEN]> for Digest {
    fn from(bytes: [u8; DIGEST_LEN]) -> Self {
        Self(bytes)
    }
}

impl FromStr for Digest {
    type Err = PullError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_hex(s)
    }
}

impl fmt::Display for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for Digest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Digest({})", self.to_hex())
    }
}

/// An operating system / architecture pair, named the way release indexes
/// name them (`linux`/`amd64`, `darwin`/`arm64`, ...)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Platform {
    pub os: String,
    pub arch: String,
}

impl Platform {
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self {
            os: os.into(),
            arch: arch.into(),
        }
    }

    /// The platform this binary was compiled for
    pub fn current() -> Self {
        let os = match std::env::consts::OS {
            "macos" => "darwin",
            other => other,
        };
        let arch = match std::env::consts::ARCH {
            "x86_64" => "amd64",
            "aarch64" => "arm64",
            "x86" => "386",
            "powerpc64" if cfg!(target_endian = "little") => "ppc64le",
            "powerpc64" => "ppc64",
            other => other,
        };
        Self::new(os, arch)
    }

    pub fn matches(&self, os: &str, arch: &str) -> bool {
        self.os == os && self.arch == arch
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.os, self.arch)
    }
}

/// Strip a single leading `v` from a version string
pub fn canonical_version(version: &str) -> &str {
    version.strip_prefix('v').unwrap_or(version)
}

/// Render a version with exactly one leading `v`
pub fn tagged_version(version: &str) -> String {
    format!("v{}", canonical_version(version))
}

/// A request to make a verified plugin binary available in a cache directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PluginRequest {
    /// Absolute path to the cache directory
    pub dir: PathBuf,
    /// The plugin's command name, also the archive entry name
    pub name: String,
    /// Requested version, with or without a leading `v`; `None` means latest
    pub version: Option<String>,
    /// Expected digest of the inner binary
    pub expected_digest: Option<Digest>,
}

impl PluginRequest {
    pub fn new(dir: impl Into<PathBuf>, name: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            name: name.into(),
            version: None,
            expected_digest: None,
        }
    }

    pub fn with_version(mut self, version: impl Into<String>) -> Self {
        self.version = Some(version.into());
        self
    }

    pub fn with_expected_digest(mut self, digest: Digest) -> Self {
        self.expected_digest = Some(digest);
        self
    }

    /// The requested version, treating an empty string as "latest"
    pub fn requested_version(&self) -> Option<&str> {
        self.version
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty() && *v != "v")
    }

    /// Check the request invariants
    ///
    /// # Errors
    ///
    /// Returns `PullError::Fatal` if the directory is empty or relative, or if
    /// the name or version could escape the cache directory.
    pub fn validate(&self) -> Result<(), PullError> {
        if self.dir.as_os_str().is_empty() {
            return Err(PullError::fatal("Cache directory must not be empty"));
        }
        if !self.dir.is_absolute() {
            return Err(PullError::Fatal(format!(
                "Cache directory must be absolute: {:?}",
                self.dir
            )));
        }
        if self.name.is_empty() {
            return Err(PullError::fatal("Plugin name must not be empty"));
        }
        if self.name == "." || self.name == ".." || self.name.contains(['/', '\\']) {
            return Err(PullError::Fatal(format!(
                "Plugin name is not a valid file name: '{}'",
                self.name
            )));
        }
        if let Some(version) = self.requested_version() {
            if version.contains("..") || version.contains(['/', '\\']) {
                return Err(PullError::Fatal(format!(
                    "Plugin version is not a valid file name: '{}'",
                    version
                )));
            }
        }
        Ok(())
    }
}
