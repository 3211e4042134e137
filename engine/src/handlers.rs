//! Command handlers for CLI operations
//!
//! This module implements the handlers for all CLI commands:
//! - pull: Download and verify a plugin into the cache
//! - versions: List published versions of a plugin
//! - path: Print the cache path of a plugin

use anyhow::{anyhow, Context, Result};
use pluck_sdk::{Digest, PluginRequest, PullError, PullErrorExt};
use pluck_sources::Source;
use serde_json::json;
use std::path::{Path, PathBuf};
use tokio_util::sync::CancellationToken;

use crate::cache;
use crate::config::Config;
use crate::puller::resolve;

/// Output format for command results
#[derive(Debug, Clone, Copy)]
pub enum OutputFormat {
    /// Human-readable text output
    Text,
    /// JSON output for machine consumption
    Json,
}

/// Download and verify a plugin
///
/// Ctrl-C cancels the download; nothing is left in the cache.
pub async fn handle_pull(
    config: &Config,
    name: String,
    version: Option<String>,
    sha256: Option<String>,
    dir: Option<PathBuf>,
    extra: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let client = config.build_client().map_err(with_hint)?;
    let puller = config.puller(&client).map_err(with_hint)?;
    let sources = collect_sources(config, &client, &extra)?;
    let dir = cache_dir(config, dir.as_deref())?;

    let mut request = PluginRequest::new(&dir, &name);
    if let Some(version) = version {
        request = request.with_version(version);
    }
    if let Some(hex) = sha256 {
        request = request.with_expected_digest(parse_digest(&hex)?);
    }

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    let signal_task = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("Interrupted, cancelling download");
            on_signal.cancel();
        }
    });

    let outcome = puller.ensure_downloaded(&cancel, &sources, request).await;
    signal_task.abort();
    let (version, digest) = outcome.map_err(with_hint)?;

    let path = cache::Cache::new(&dir).entry_path(&name, &version, &digest);
    match format {
        OutputFormat::Text => {
            println!("{} {}", name, version);
            println!("  sha256: {}", digest);
            println!("  path:   {}", path.display());
        }
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "name": name,
                    "version": version,
                    "sha256": digest.to_hex(),
                    "path": path,
                }))?
            );
        }
    }
    Ok(())
}

/// List versions published by the first source that knows the plugin
pub async fn handle_versions(
    config: &Config,
    name: String,
    extra: Vec<String>,
    format: OutputFormat,
) -> Result<()> {
    let client = config.build_client().map_err(with_hint)?;
    let puller = config.puller(&client).map_err(with_hint)?;
    let sources = collect_sources(config, &client, &extra)?;

    let listing = puller
        .list_versions(&CancellationToken::new(), &sources, &name)
        .await
        .map_err(with_hint)?;
    let versions = resolve::newest_first(&listing).map_err(with_hint)?;

    match format {
        OutputFormat::Text => {
            if versions.is_empty() {
                println!("No versions published for {}.", name);
            }
            for version in &versions {
                println!("v{}", version);
            }
        }
        OutputFormat::Json => {
            let versions: Vec<String> = versions.iter().map(|v| format!("v{}", v)).collect();
            println!(
                "{}",
                serde_json::to_string_pretty(&json!({
                    "name": name,
                    "versions": versions,
                }))?
            );
        }
    }
    Ok(())
}

/// Print where a plugin's cache entry lives; no I/O besides config
pub fn handle_path(
    config: &Config,
    name: String,
    version: String,
    sha256: String,
    dir: Option<PathBuf>,
    format: OutputFormat,
) -> Result<()> {
    let digest = parse_digest(&sha256)?;
    let dir = match dir {
        Some(dir) => dir,
        None => config.core.cache_dir.clone(),
    };
    let path = cache::Cache::new(dir).entry_path(&name, &version, &digest);

    match format {
        OutputFormat::Text => println!("{}", path.display()),
        OutputFormat::Json => println!(
            "{}",
            serde_json::to_string_pretty(&json!({ "path": path }))?
        ),
    }
    Ok(())
}

/// Configured extra sources followed by the ones given on the command line
fn collect_sources(
    config: &Config,
    client: &reqwest::Client,
    extra: &[String],
) -> Result<Vec<Source>> {
    let mut sources = config.extra_sources(client).map_err(with_hint)?;
    for location in extra {
        let source = Source::parse(location)
            .map_err(with_hint)
            .with_context(|| format!("Invalid --source '{}'", location))?;
        sources.push(source);
    }
    Ok(sources)
}

fn cache_dir(config: &Config, dir: Option<&Path>) -> Result<PathBuf> {
    match dir {
        Some(dir) => dir
            .canonicalize()
            .with_context(|| format!("Cache directory {} is not usable", dir.display())),
        None => Ok(config.core.cache_dir.clone()),
    }
}

fn parse_digest(hex: &str) -> Result<Digest> {
    hex.trim()
        .parse::<Digest>()
        .map_err(with_hint)
        .context("--sha256 must be 64 hex characters")
}

fn with_hint(error: PullError) -> anyhow::Error {
    let hint = error.user_hint().to_string();
    anyhow!(error).context(hint)
}
