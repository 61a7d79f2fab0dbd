//! Status command - Show watched scopes and cache contents
//!
//! Reads the daemon's state database directly, so it works whether or not
//! the daemon is running.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use clap::Args;
use tracing::info;

use drivewatch_cache::{DatabasePool, SqliteChannelRegistry, SqliteSnapshotCache};
use drivewatch_core::domain::ChannelDescriptor;
use drivewatch_core::ports::{CacheCounts, IChannelRegistry, ISnapshotCache};

use super::CommandContext;
use crate::output::{format_remaining, get_formatter};

#[derive(Debug, Args)]
pub struct StatusCommand {}

/// Snapshot of the state database
#[derive(Debug)]
pub struct StatusReport {
    pub channels: Vec<ChannelDescriptor>,
    pub counts: CacheCounts,
}

impl StatusReport {
    fn to_json(&self, now: DateTime<Utc>) -> serde_json::Value {
        let channels: Vec<serde_json::Value> = self
            .channels
            .iter()
            .map(|channel| {
                serde_json::json!({
                    "scope": channel.scope_id.as_str(),
                    "subscription": channel.subscription_id.as_str(),
                    "expires_at": channel.expires_at.to_rfc3339(),
                    "expired": channel.is_expired_at(now),
                    "remaining_secs": channel.remaining(now).num_seconds(),
                })
            })
            .collect();

        serde_json::json!({
            "channels": channels,
            "cache": {
                "files": self.counts.files,
                "folders": self.counts.folders,
            },
        })
    }
}

/// Reads channels and cache counts, or `None` when no database exists yet
pub async fn collect_status(db_path: &Path) -> Result<Option<StatusReport>> {
    if !db_path.exists() {
        return Ok(None);
    }

    let pool = DatabasePool::new(db_path)
        .await
        .with_context(|| format!("Failed to open {}", db_path.display()))?;
    let registry = SqliteChannelRegistry::new(pool.pool().clone());
    let cache = SqliteSnapshotCache::new(pool.pool().clone());

    let channels = registry.list_all().await?;
    let counts = cache.counts().await?;
    pool.close().await;

    Ok(Some(StatusReport { channels, counts }))
}

impl StatusCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let config = ctx.load_config();
        let db_path = &config.storage.database;

        info!(database = %db_path.display(), "Reading status");

        let Some(report) = collect_status(db_path).await? else {
            if ctx.format.is_json() {
                formatter.print_json(&serde_json::json!({ "channels": [], "cache": null }));
            } else {
                formatter.warn(&format!(
                    "No state database at {}; the daemon has not run yet",
                    db_path.display()
                ));
            }
            return Ok(());
        };

        let now = Utc::now();
        if ctx.format.is_json() {
            formatter.print_json(&report.to_json(now));
            return Ok(());
        }

        formatter.success(&format!(
            "Watching {} scope{}",
            report.channels.len(),
            if report.channels.len() == 1 { "" } else { "s" }
        ));
        for channel in &report.channels {
            let expiry = if channel.is_expired_at(now) {
                "expired".to_string()
            } else {
                format!("expires in {}", format_remaining(channel.remaining(now)))
            };
            formatter.info(&format!(
                "{:<24} {}  {}",
                channel.scope_id.as_str(),
                channel.subscription_id.as_str(),
                expiry
            ));
        }
        formatter.info("");
        formatter.info(&format!(
            "Cache: {} files, {} folders",
            report.counts.files, report.counts.folders
        ));

        Ok(())
    }
}
