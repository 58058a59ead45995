//! Command-line interface for `quorumd`.

use std::path::PathBuf;

use clap::{Parser, Subcommand};

use quorum_domain::config::{Config, ConfigSeverity};

#[derive(Parser)]
#[command(name = "quorumd", about = "Multi-agent meeting orchestrator", version)]
pub struct Cli {
    /// Path to the TOML config file.
    #[arg(long, default_value = "quorum.toml")]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Run the HTTP/WebSocket server (the default).
    Serve,
    /// Configuration helpers.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand)]
pub enum ConfigCommand {
    /// Validate the config file and report issues.
    Validate,
    /// Print the effective configuration.
    Show,
}

/// Load the config from the CLI-provided path.
pub fn load_config(path: &PathBuf) -> anyhow::Result<Config> {
    Config::load(path).map_err(|e| anyhow::anyhow!("loading {}: {e}", path.display()))
}

/// Print validation issues; returns false when any is an error.
pub fn validate(config: &Config, path: &PathBuf) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues
        .iter()
        .any(|i| i.severity == ConfigSeverity::Error)
}

/// Dump the effective config as TOML.
pub fn show(config: &Config) {
    match toml::to_string_pretty(config) {
        Ok(rendered) => println!("{rendered}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
