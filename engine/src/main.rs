// Pluck plugin puller
// Main entry point for the pluck binary

use clap::Parser;
use pluck_engine::cli::{Cli, Command};
use pluck_engine::config::Config;
use pluck_engine::handlers::{handle_path, handle_pull, handle_versions, OutputFormat};
use pluck_engine::telemetry::init_telemetry_with_level;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let format = if cli.json {
        OutputFormat::Json
    } else {
        OutputFormat::Text
    };

    let config = if let Some(config_path) = &cli.config {
        Config::load_from_path(config_path)?
    } else {
        Config::load_or_create()?
    };

    // --log wins over the config file; RUST_LOG wins over both
    let level = cli.log.as_deref().unwrap_or(&config.core.log_level);
    init_telemetry_with_level(level);

    tracing::debug!(
        "pluck v{} ({} - {})",
        env!("CARGO_PKG_VERSION"),
        env!("GIT_COMMIT_HASH"),
        env!("BUILD_TIMESTAMP")
    );

    match cli.command {
        Command::Pull {
            name,
            version,
            sha256,
            dir,
            sources,
        } => handle_pull(&config, name, version, sha256, dir, sources, format).await,

        Command::Versions { name, sources } => {
            handle_versions(&config, name, sources, format).await
        }

        Command::Path {
            name,
            version,
            sha256,
            dir,
        } => handle_path(&config, name, version, sha256, dir, format),
    }
}
