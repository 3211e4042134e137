//! Pluck Engine Library
//!
//! Verified plugin downloads and the local plugin cache. Used by the `pluck`
//! binary and by integration tests.

/// Zip archive entry extraction
pub mod archive;

/// Cache filenames and atomic publication
pub mod cache;

/// CLI interface module
pub mod cli;

/// Configuration management module
pub mod config;

/// Detached signature verification
pub mod crypto;

/// Command handlers module
pub mod handlers;

/// Streaming SHA-256
pub mod hashing;

/// Download orchestration
pub mod puller;

/// Telemetry and Observability
pub mod telemetry;

pub use puller::Puller;
