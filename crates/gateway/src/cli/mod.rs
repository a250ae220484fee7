//! Command-line surface: `serve` (the default), `doctor`, and `config
//! validate|show`.

pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// fleet-gateway — agent fleet control plane.
#[derive(Debug, Parser)]
#[command(name = "fleet-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the HTTP/WebSocket server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

/// Load the configuration from the path named by `FLEET_CONFIG` (or
/// `config.toml` by default). Returns the parsed [`fleet_domain::config::Config`]
/// and the path that was used.
pub fn load_config() -> anyhow::Result<(fleet_domain::config::Config, String)> {
    let config_path = std::env::var("FLEET_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        fleet_domain::config::Config::default()
    };

    Ok((config, config_path))
}
