//! CLI interface for pluck
//!
//! This module provides the command-line interface using clap's derive API.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Pluck plugin puller
///
/// Downloads plugin binaries, verifies them against the signed release
/// digest manifest, and keeps them in a local content-addressed cache.
#[derive(Parser, Debug)]
#[command(name = "pluck")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    pub json: bool,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL")]
    pub log: Option<String>,

    /// Specify alternate configuration file
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download and verify a plugin into the cache
    Pull {
        /// Plugin name
        name: String,

        /// Version to pull (default: latest)
        #[arg(long)]
        version: Option<String>,

        /// Expected SHA-256 of the plugin binary
        #[arg(long, value_name = "HEX")]
        sha256: Option<String>,

        /// Cache directory (default: core.cache_dir)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,

        /// Extra source, consulted after the configured ones (repeatable)
        #[arg(long = "source", value_name = "URL|PATH")]
        sources: Vec<String>,
    },

    /// List published versions of a plugin
    Versions {
        /// Plugin name
        name: String,

        /// Extra source, consulted after the configured ones (repeatable)
        #[arg(long = "source", value_name = "URL|PATH")]
        sources: Vec<String>,
    },

    /// Print the cache path of a plugin without downloading anything
    Path {
        /// Plugin name
        name: String,

        #[arg(long)]
        version: String,

        /// SHA-256 of the plugin binary
        #[arg(long, value_name = "HEX")]
        sha256: String,

        /// Cache directory (default: core.cache_dir)
        #[arg(long, value_name = "DIR")]
        dir: Option<PathBuf>,
    },
}
