//! Rust IRC relay gateway - Main binary

use clap::{Parser, Subcommand};
use rustrelay_core::{Config, Gateway, Relay};
use std::path::{Path, PathBuf};
use tracing::info;

/// Rust IRC relay gateway - links channels across IRC networks
#[derive(Parser)]
#[command(name = "rustrelay")]
#[command(about = "An IRC relay gateway linking channels across networks and dialects")]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, default_value = "config.toml")]
    config: PathBuf,

    /// Log level
    #[arg(short, long, default_value = "info")]
    log_level: String,

    /// Test configuration and exit
    #[arg(long)]
    test_config: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a default configuration file
    Config {
        /// Output file path
        #[arg(short, long, default_value = "config.toml")]
        output: PathBuf,
    },
    /// Show gateway information
    Info,
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    if let Some(command) = cli.command {
        init_logging(&cli.log_level)?;
        match command {
            Commands::Config { output } => generate_config(&output)?,
            Commands::Info => show_info(),
            Commands::Version => show_version(),
        }
        return Ok(());
    }

    let config = if cli.config.exists() {
        Some(Config::from_file(&cli.config)?)
    } else {
        None
    };

    let level = match &config {
        Some(config) => config.gateway.log_level(&cli.log_level),
        None => cli.log_level.as_str(),
    };
    init_logging(level)?;

    let config = match config {
        Some(config) => {
            info!("Loaded configuration from {:?}", cli.config);
            config
        }
        None => {
            info!("Configuration file not found, using defaults");
            Config::default()
        }
    };

    config.validate()?;
    if cli.test_config {
        info!("Configuration is valid");
        return Ok(());
    }

    let gateway = Gateway::from_config(&config)?;
    info!("Starting {} relay gateway...", config.gateway.service_name);
    Relay::new(gateway).run().await?;
    info!("Relay gateway stopped");

    Ok(())
}

/// Initialize logging
fn init_logging(level: &str) -> anyhow::Result<()> {
    let log_level = match level.to_lowercase().as_str() {
        "trace" => tracing::Level::TRACE,
        "debug" => tracing::Level::DEBUG,
        "info" => tracing::Level::INFO,
        "warn" => tracing::Level::WARN,
        "error" => tracing::Level::ERROR,
        _ => tracing::Level::INFO,
    };

    tracing_subscriber::fmt()
        .with_max_level(log_level)
        .with_target(false)
        .init();

    Ok(())
}

/// Generate default configuration file
fn generate_config(output: &Path) -> anyhow::Result<()> {
    let config = Config::default();
    config.to_file(output)?;
    println!("Generated default configuration file: {:?}", output);
    Ok(())
}

/// Show gateway information
fn show_info() {
    println!("Rust IRC Relay Gateway");
    println!("======================");
    println!("Version: {}", env!("CARGO_PKG_VERSION"));
    println!("Description: {}", env!("CARGO_PKG_DESCRIPTION"));
    println!("Repository: {}", env!("CARGO_PKG_REPOSITORY"));
    println!("License: {}", env!("CARGO_PKG_LICENSE"));
    println!();
    println!("Dialects:");
    println!("  - rfc1459 and ts server links");
    println!("  - plain user connections");
    println!("  - bitlbee bot multiplexers");
}

/// Show version information
fn show_version() {
    println!("rustrelay {}", env!("CARGO_PKG_VERSION"));
}
