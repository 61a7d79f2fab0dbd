//! Config command - View and check the drivewatch configuration
//!
//! Credentials never live in the file, so `show` prints it in full.

use anyhow::{Context, Result};
use clap::Subcommand;
use tracing::info;

use drivewatch_core::config::{Config, ValidationError};

use super::CommandContext;
use crate::output::get_formatter;

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Display the effective configuration
    Show,
    /// Validate the configuration file
    Validate,
}

impl ConfigCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        match self {
            ConfigCommand::Show => execute_show(ctx),
            ConfigCommand::Validate => execute_validate(ctx),
        }
    }
}

fn execute_show(ctx: &CommandContext) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let config = ctx.load_config();

    info!(config_path = %ctx.config_path.display(), "Showing configuration");

    if ctx.format.is_json() {
        let json =
            serde_json::to_value(&config).context("Failed to serialize configuration to JSON")?;
        formatter.print_json(&json);
        return Ok(());
    }

    let source = if ctx.config_path.exists() {
        ctx.config_path.display().to_string()
    } else {
        format!("defaults; {} not found", ctx.config_path.display())
    };
    formatter.success(&format!("Configuration ({source})"));
    formatter.info("");

    let yaml =
        serde_yaml::to_string(&config).context("Failed to serialize configuration to YAML")?;
    for line in yaml.lines() {
        formatter.info(line);
    }

    Ok(())
}

fn execute_validate(ctx: &CommandContext) -> Result<()> {
    let formatter = get_formatter(ctx.format);
    let errors = validate_file(&ctx.config_path)?;

    if ctx.format.is_json() {
        let messages: Vec<String> = errors.iter().map(ToString::to_string).collect();
        formatter.print_json(&serde_json::json!({
            "valid": errors.is_empty(),
            "config_path": ctx.config_path.display().to_string(),
            "errors": messages,
        }));
    } else if errors.is_empty() {
        formatter.success(&format!("{} is valid", ctx.config_path.display()));
    } else {
        formatter.error(&format!(
            "{} has {} problem{}",
            ctx.config_path.display(),
            errors.len(),
            if errors.len() == 1 { "" } else { "s" }
        ));
        for error in &errors {
            formatter.info(&error.to_string());
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        anyhow::bail!("configuration is invalid")
    }
}

/// Parses and validates the file at `path`
///
/// Unlike `show`, a missing or unparsable file is an error here.
fn validate_file(path: &std::path::Path) -> Result<Vec<ValidationError>> {
    let config =
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    Ok(config.validate())
}
