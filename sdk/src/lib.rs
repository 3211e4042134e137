//! Pluck SDK
//!
//! Shared types for the pluck crates: the request/identity model, release
//! metadata and the error taxonomy. This crate performs no I/O.

/// Error types and handling
pub mod errors;

/// Request, digest and platform types
pub mod types;

/// Release metadata types
pub mod manifest;

// Re-export commonly used types
pub use errors::{PullError, PullErrorExt, PullErrorKind};
pub use manifest::{Build, VersionMetadata};
pub use types::{canonical_version, tagged_version, Digest, Platform, PluginRequest, DIGEST_LEN};
