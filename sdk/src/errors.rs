//! Error types and handling
//!
//! This module provides the error taxonomy shared by every pluck crate.
//! Sources, the verifier, the archive extractor and the puller all report
//! failures as [`PullError`], so a caller can branch on [`PullErrorKind`]
//! without knowing which layer failed.
//!
//! # Recovery
//!
//! The puller itself only recovers from two situations: a source answering
//! `NotFound` (the next source is tried) and a collision on the final cache
//! filename (one self-heal retry). Every other error reaches the caller
//! unchanged. [`PullErrorExt::is_recoverable`] tells a higher layer whether a
//! retry is worth attempting.

use thiserror::Error;

/// Trait for pluck error extensions
///
/// Provides a short, user-facing hint and a recoverability flag for every
/// error. Hints never contain URLs, paths or digests.
pub trait PullErrorExt {
    /// Returns a user-friendly hint for the error
    fn user_hint(&self) -> &str;

    /// Returns whether a higher layer could plausibly retry the operation
    fn is_recoverable(&self) -> bool;

    /// Returns the coarse error kind
    fn kind(&self) -> PullErrorKind;
}

/// Coarse classification of a [`PullError`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PullErrorKind {
    NotFound,
    PlatformUnavailable,
    SignatureInvalid,
    DigestMismatch,
    Transient,
    Cancelled,
    Fatal,
}

/// Main puller error type
///
/// # Examples
///
/// ```
/// use pluck_sdk::errors::{PullError, PullErrorExt, PullErrorKind};
///
/// let error = PullError::Transient("connection reset".to_string());
/// assert!(error.is_recoverable());
///
/// let fatal = PullError::SignatureInvalid(vec!["bad packet".to_string()]);
/// assert_eq!(fatal.kind(), PullErrorKind::SignatureInvalid);
/// assert!(!fatal.is_recoverable());
/// ```
#[derive(Debug, Error)]
pub enum PullError {
    /// No source knew the plugin, or no source had the requested version
    #[error("Not found: {0}")]
    NotFound(String),

    /// Metadata lists no build for the running platform
    #[error("No build available for {os}/{arch}")]
    PlatformUnavailable { os: String, arch: String },

    /// No detached signature over the digest manifest verified
    #[error("Signature verification failed: {}", .0.join("; "))]
    SignatureInvalid(Vec<String>),

    /// A computed digest disagreed with its expected value
    #[error("Digest mismatch for {subject}: expected {expected}, got {actual}")]
    DigestMismatch {
        subject: String,
        expected: String,
        actual: String,
    },

    /// Network or IO failure that a higher layer could retry
    #[error("Transient error: {0}")]
    Transient(String),

    /// The caller's cancellation token fired
    #[error("Operation cancelled")]
    Cancelled,

    /// Any other failure
    #[error("Fatal error: {0}")]
    Fatal(String),

    // Generic IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl PullError {
    /// Shorthand for a `Fatal` error from anything displayable
    pub fn fatal(msg: impl std::fmt::Display) -> Self {
        Self::Fatal(msg.to_string())
    }

    /// Shorthand for a `Transient` error from anything displayable
    pub fn transient(msg: impl std::fmt::Display) -> Self {
        Self::Transient(msg.to_string())
    }

    /// Returns true if this error means "this source does not have it"
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }
}

impl PullErrorExt for PullError {
    fn user_hint(&self) -> &str {
        match self {
            Self::NotFound(_) => "The plugin or version is not published on any configured source",
            Self::PlatformUnavailable { .. } => "This plugin has no release for your platform",
            Self::SignatureInvalid(_) => {
                "Security verification failed. Release metadata may be tampered"
            }
            Self::DigestMismatch { .. } => {
                "Security verification failed. Download may be corrupted or tampered"
            }
            Self::Transient(_) => "Network operation failed. Check your connection and retry",
            Self::Cancelled => "The download was cancelled",
            Self::Fatal(_) => "Plugin download failed. Check the release source",
            Self::Io(_) => "File system operation failed",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self.kind(), PullErrorKind::Transient)
    }

    fn kind(&self) -> PullErrorKind {
        match self {
            Self::NotFound(_) => PullErrorKind::NotFound,
            Self::PlatformUnavailable { .. } => PullErrorKind::PlatformUnavailable,
            Self::SignatureInvalid(_) => PullErrorKind::SignatureInvalid,
            Self::DigestMismatch { .. } => PullErrorKind::DigestMismatch,
            Self::Transient(_) | Self::Io(_) => PullErrorKind::Transient,
            Self::Cancelled => PullErrorKind::Cancelled,
            Self::Fatal(_) => PullErrorKind::Fatal,
        }
    }
}
