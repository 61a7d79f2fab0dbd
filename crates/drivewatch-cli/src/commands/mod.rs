//! CLI subcommands
//!
//! - [`status`] reads the state database directly
//! - [`control`] talks to the running daemon over its HTTP endpoint
//! - [`config`] shows and validates the configuration file

pub mod config;
pub mod control;
pub mod status;

use std::path::PathBuf;

use drivewatch_core::config::Config;

use crate::output::OutputFormat;

/// Options shared by every subcommand
#[derive(Debug, Clone)]
pub struct CommandContext {
    pub config_path: PathBuf,
    pub format: OutputFormat,
    /// Overrides the daemon address derived from `server.control_listen`
    pub daemon_url: Option<String>,
}

impl CommandContext {
    pub fn load_config(&self) -> Config {
        Config::load_or_default(&self.config_path)
    }
}
