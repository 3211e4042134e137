//! Configuration management
//!
//! This module handles loading, validation, and management of the pluck
//! configuration. Configuration is stored in TOML format at
//! ~/.pluck/config.toml.
//!
//! # Configuration Sections
//!
//! - **core**: Log level, cache directory, temp directory, entry size limit
//! - **primary**: The release host that is always consulted first
//! - **http**: HTTP client settings shared by every HTTP source
//! - **sources**: Additional sources, consulted in order after the primary
//!
//! # Path Expansion
//!
//! The configuration system automatically:
//! - Expands ~ to the user's home directory
//! - Canonicalizes the cache directory, creating it if it doesn't exist
//!
//! The trusted release key is deliberately absent: it is fixed at build time.
//!
//! # Examples
//!
//! ```no_run
//! use pluck_engine::config::Config;
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::load_or_create()?;
//! println!("Cache: {:?}", config.core.cache_dir);
//! println!("Primary: {}", config.primary.base_url);
//! # Ok(())
//! # }
//! ```

use crate::archive::Extractor;
use crate::puller::Puller;
use pluck_sdk::PullError;
use pluck_sources::http::DEFAULT_USER_AGENT;
use pluck_sources::{FsSource, HttpSource, Source};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub core: CoreConfig,

    #[serde(default)]
    pub primary: PrimaryConfig,

    #[serde(default)]
    pub http: HttpConfig,

    /// Extra sources, in priority order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceConfig>,
}

/// Core settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Log level (error, warn, info, debug, trace)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Plugin cache directory (supports ~ expansion)
    #[serde(default = "default_cache_dir")]
    pub cache_dir: PathBuf,

    /// Directory for downloaded archives; system temp dir when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub temp_dir: Option<PathBuf>,

    /// Largest plugin binary accepted from an archive, in MiB
    #[serde(default = "default_max_entry_size_mb")]
    pub max_entry_size_mb: u64,
}

/// Primary release host
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrimaryConfig {
    #[serde(default = "default_primary_url")]
    pub base_url: String,
}

/// HTTP client settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    /// Connect timeout in seconds; no timeout when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub connect_timeout_secs: Option<u64>,
}

/// An extra source
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum SourceConfig {
    Http { base_url: String },
    Filesystem { root: PathBuf },
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            cache_dir: default_cache_dir(),
            temp_dir: None,
            max_entry_size_mb: default_max_entry_size_mb(),
        }
    }
}

impl Default for PrimaryConfig {
    fn default() -> Self {
        Self {
            base_url: default_primary_url(),
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            user_agent: default_user_agent(),
            connect_timeout_secs: None,
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_cache_dir() -> PathBuf {
    PathBuf::from("~/.pluck/plugins")
}

fn default_max_entry_size_mb() -> u64 {
    1024
}

fn default_primary_url() -> String {
    "https://releases.pluck.dev".to_string()
}

fn default_user_agent() -> String {
    DEFAULT_USER_AGENT.to_string()
}

impl Config {
    /// Load configuration from the default location (~/.pluck/config.toml)
    ///
    /// If the configuration file doesn't exist, creates a default configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - Configuration file cannot be read
    /// - TOML parsing fails
    /// - Validation fails (bad URLs, unusable directories)
    pub fn load_or_create() -> Result<Self, PullError> {
        let config_path = Self::default_config_path()?;

        if config_path.exists() {
            Self::load_from_path(&config_path)
        } else {
            Self::create_default(&config_path)
        }
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, PullError> {
        let contents = fs::read_to_string(path)
            .map_err(|e| PullError::Fatal(format!("Failed to read config file: {}", e)))?;
        Self::from_toml(&contents)
    }

    /// Parse and validate configuration text
    pub fn from_toml(contents: &str) -> Result<Self, PullError> {
        let mut config: Config = toml::from_str(contents)
            .map_err(|e| PullError::Fatal(format!("Failed to parse config: {}", e)))?;

        config.validate_and_process()?;

        Ok(config)
    }

    fn create_default(path: &Path) -> Result<Self, PullError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|e| {
                PullError::Fatal(format!("Failed to create config directory: {}", e))
            })?;
        }

        let default = Self::default_config();
        let toml_string = toml::to_string_pretty(&default)
            .map_err(|e| PullError::Fatal(format!("Failed to serialize config: {}", e)))?;

        // The file keeps the unexpanded paths
        fs::write(path, toml_string)
            .map_err(|e| PullError::Fatal(format!("Failed to write config file: {}", e)))?;

        let mut config = default;
        config.validate_and_process()?;
        Ok(config)
    }

    fn default_config_path() -> Result<PathBuf, PullError> {
        let home = dirs::home_dir()
            .ok_or_else(|| PullError::fatal("Could not determine home directory"))?;

        Ok(home.join(".pluck").join("config.toml"))
    }

    fn default_config() -> Self {
        Self {
            core: CoreConfig::default(),
            primary: PrimaryConfig::default(),
            http: HttpConfig::default(),
            sources: Vec::new(),
        }
    }

    /// Validate and process configuration
    ///
    /// This method:
    /// - Validates the log level and every source URL
    /// - Expands ~ in paths
    /// - Creates and canonicalizes the cache directory
    fn validate_and_process(&mut self) -> Result<(), PullError> {
        let valid_log_levels = ["error", "warn", "info", "debug", "trace"];
        if !valid_log_levels.contains(&self.core.log_level.as_str()) {
            return Err(PullError::Fatal(format!(
                "Invalid log level '{}'. Must be one of: {}",
                self.core.log_level,
                valid_log_levels.join(", ")
            )));
        }

        if self.core.max_entry_size_mb == 0 {
            return Err(PullError::fatal("max_entry_size_mb must be greater than 0"));
        }

        validate_url("primary.base_url", &self.primary.base_url)?;

        for source in &mut self.sources {
            match source {
                SourceConfig::Http { base_url } => validate_url("sources.base_url", base_url)?,
                SourceConfig::Filesystem { root } => *root = expand_path(root)?,
            }
        }

        self.core.cache_dir = expand_path(&self.core.cache_dir)?;
        self.core.cache_dir = canonicalize_or_create(&self.core.cache_dir)?;

        if !self.core.cache_dir.is_dir() {
            return Err(PullError::Fatal(format!(
                "Cache path is not a directory: {:?}",
                self.core.cache_dir
            )));
        }

        if let Some(temp_dir) = &self.core.temp_dir {
            let temp_dir = expand_path(temp_dir)?;
            if !temp_dir.is_dir() {
                return Err(PullError::Fatal(format!(
                    "Temp path is not a directory: {:?}",
                    temp_dir
                )));
            }
            self.core.temp_dir = Some(temp_dir);
        }

        Ok(())
    }

    /// Entry size limit in bytes
    pub fn max_entry_size(&self) -> u64 {
        self.core.max_entry_size_mb.saturating_mul(1024 * 1024)
    }

    /// Build the HTTP client shared by every HTTP source
    pub fn build_client(&self) -> Result<reqwest::Client, PullError> {
        let mut builder = reqwest::Client::builder().user_agent(&self.http.user_agent);
        if let Some(secs) = self.http.connect_timeout_secs {
            builder = builder.connect_timeout(Duration::from_secs(secs));
        }
        builder
            .build()
            .map_err(|e| PullError::Fatal(format!("Failed to build HTTP client: {}", e)))
    }

    /// The configured extra sources, in priority order
    pub fn extra_sources(&self, client: &reqwest::Client) -> Result<Vec<Source>, PullError> {
        self.sources
            .iter()
            .map(|source| match source {
                SourceConfig::Http { base_url } => {
                    HttpSource::with_client(base_url, client.clone()).map(Source::Http)
                }
                SourceConfig::Filesystem { root } => {
                    Ok(Source::Filesystem(FsSource::new(root.clone())))
                }
            })
            .collect()
    }

    /// A puller wired to this configuration
    pub fn puller(&self, client: &reqwest::Client) -> Result<Puller, PullError> {
        let primary = HttpSource::with_client(&self.primary.base_url, client.clone())?;
        Ok(Puller::new(Source::Http(primary))?
            .with_temp_dir(self.core.temp_dir.clone())
            .with_extractor(Extractor::new(self.max_entry_size())))
    }
}

fn validate_url(field: &str, value: &str) -> Result<(), PullError> {
    let url = Url::parse(value)
        .map_err(|e| PullError::Fatal(format!("Invalid {} '{}': {}", field, value, e)))?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(PullError::Fatal(format!(
            "{} must be an http(s) URL: '{}'",
            field, value
        )));
    }
    Ok(())
}

/// Expand ~ in path to user's home directory
fn expand_path(path: &Path) -> Result<PathBuf, PullError> {
    let path_str = path
        .to_str()
        .ok_or_else(|| PullError::fatal("Invalid UTF-8 in path"))?;

    if let Some(rest) = path_str.strip_prefix("~/") {
        let home = dirs::home_dir()
            .ok_or_else(|| PullError::fatal("Could not determine home directory"))?;
        Ok(home.join(rest))
    } else if path_str == "~" {
        dirs::home_dir().ok_or_else(|| PullError::fatal("Could not determine home directory"))
    } else {
        Ok(path.to_path_buf())
    }
}

/// Canonicalize path, creating it if it doesn't exist
fn canonicalize_or_create(path: &Path) -> Result<PathBuf, PullError> {
    if !path.exists() {
        fs::create_dir_all(path).map_err(|e| {
            PullError::Fatal(format!("Failed to create directory {:?}: {}", path, e))
        })?;
    }
    path.canonicalize()
        .map_err(|e| PullError::Fatal(format!("Failed to canonicalize {:?}: {}", path, e)))
}
