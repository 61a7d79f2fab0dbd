//! Drivewatch CLI - Command-line interface for the drivewatch daemon
//!
//! Provides commands for:
//! - Viewing watched scopes and channel expiry
//! - Forcing a channel sync or a scope reconciliation on the daemon
//! - Showing and validating the configuration

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod output;

use commands::{
    config::ConfigCommand,
    control::{ReconcileCommand, SyncChannelsCommand},
    status::StatusCommand,
    CommandContext,
};
use drivewatch_core::config::Config;
use output::OutputFormat;

#[derive(Debug, Parser)]
#[command(
    name = "drivewatch",
    version,
    about = "Inspect and control the drivewatch daemon"
)]
pub struct Cli {
    /// Output in JSON format
    #[arg(long, global = true)]
    json: bool,

    /// Verbose output (can be repeated: -v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Use alternate config file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Daemon control URL, overriding `server.control_listen`
    #[arg(long, global = true)]
    daemon_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Show watched scopes and cache contents
    Status(StatusCommand),
    /// Open, renew, and retire channels now
    SyncChannels(SyncChannelsCommand),
    /// Reconcile one scope now
    Reconcile(ReconcileCommand),
    /// View and check configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let filter = match cli.verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let ctx = CommandContext {
        config_path: cli.config.unwrap_or_else(Config::default_path),
        format: if cli.json {
            OutputFormat::Json
        } else {
            OutputFormat::Human
        },
        daemon_url: cli.daemon_url,
    };

    let result = match cli.command {
        Commands::Status(cmd) => cmd.execute(&ctx).await,
        Commands::SyncChannels(cmd) => cmd.execute(&ctx).await,
        Commands::Reconcile(cmd) => cmd.execute(&ctx).await,
        Commands::Config(cmd) => cmd.execute(&ctx).await,
    };

    if let Err(e) = &result {
        output::get_formatter(ctx.format).error(&format!("{e:#}"));
        std::process::exit(1);
    }
    Ok(())
}
