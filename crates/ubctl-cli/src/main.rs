#![deny(unsafe_code)]

//! ubctl CLI: serve the HTTP API or run one-shot daemon commands.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde::Serialize;
use tracing::info;
use ubctl_config::AppConfig;
use ubctl_core::ControlClient;

/// ubctl: administration API for a recursive DNS resolver.
#[derive(Parser, Debug)]
#[command(name = "ubctl", version, about, long_about = None)]
struct Cli {
    /// Path to configuration file.
    #[arg(short, long, default_value = "ubctl.toml")]
    config: PathBuf,

    /// Increase log verbosity (-v, -vv).
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug, PartialEq)]
enum Commands {
    /// Run the HTTP API until interrupted.
    Serve,

    /// Print decoded daemon status.
    Status,

    /// Print decoded daemon statistics.
    Stats,

    /// Ask the daemon to reload its configuration and zones.
    Reload,

    /// Flush the cache, or only the entries under a domain.
    Flush {
        domain: Option<String>,
    },

    /// List configured zones.
    Zones,

    /// Validate and display configuration.
    Config {
        /// Print the resolved configuration with secrets redacted.
        #[arg(long)]
        show: bool,
    },
}

#[derive(Serialize)]
struct Message {
    message: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(&cli.config).await?;
    ubctl_core::logging::init(&config.logging, level_override(cli.verbose))?;

    match cli.command {
        Commands::Serve => cmd_serve(config, cli.config).await?,
        Commands::Status => print_json(&connect(&config).await?.status().await?)?,
        Commands::Stats => print_json(&connect(&config).await?.stats().await?)?,
        Commands::Reload => {
            let message = connect(&config).await?.reload().await?;
            print_json(&Message { message })?;
        }
        Commands::Flush { domain } => {
            let message = connect(&config).await?.flush(domain.as_deref()).await?;
            print_json(&Message { message })?;
        }
        Commands::Zones => print_json(&connect(&config).await?.list_zones().await?)?,
        Commands::Config { show } => cmd_config(&cli.config, &config, show)?,
    }

    Ok(())
}

/// `-v` raises the configured level to debug, `-vv` to trace.
fn level_override(verbose: u8) -> Option<&'static str> {
    match verbose {
        0 => None,
        1 => Some("debug"),
        _ => Some("trace"),
    }
}

async fn load_config(path: &Path) -> Result<AppConfig> {
    AppConfig::load(path)
        .await
        .with_context(|| format!("cannot load configuration from {}", path.display()))
}

async fn connect(config: &AppConfig) -> Result<ControlClient> {
    ControlClient::connect(&config.control)
        .await
        .with_context(|| format!("cannot reach the resolver daemon via {}", config.control.transport))
}

async fn cmd_serve(config: AppConfig, config_path: PathBuf) -> Result<()> {
    info!(version = %ubctl_core::build_info::version_string(), "Starting ubctl");
    let service = ubctl_core::Service::new(config, Some(config_path));
    service.run().await?;
    Ok(())
}

fn cmd_config(config_path: &Path, config: &AppConfig, show: bool) -> Result<()> {
    if show {
        let toml_str = toml::to_string_pretty(&redacted(config)).context("cannot render configuration")?;
        println!("{toml_str}");
    } else {
        println!("Configuration at '{}' is valid.", config_path.display());
    }
    Ok(())
}

/// A copy safe to print: the API key is masked.
fn redacted(config: &AppConfig) -> AppConfig {
    let mut copy = config.clone();
    copy.security.api_key = "[REDACTED]".to_string();
    copy
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
