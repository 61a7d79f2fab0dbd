//! Commands that drive the running daemon
//!
//! - `sync-channels` - open, renew, and retire channels now
//! - `reconcile`     - reconcile one scope now and print its events

use std::time::Duration;

use anyhow::{Context, Result};
use clap::Args;
use serde::de::DeserializeOwned;
use tracing::info;

use drivewatch_core::config::Config;
use drivewatch_core::domain::ScopeId;
use drivewatch_core::usecases::{ChannelSyncReport, ReconcileOutcome};

use super::CommandContext;
use crate::output::get_formatter;

/// Reconciling a large scope drains every listing page first
const REQUEST_TIMEOUT: Duration = Duration::from_secs(300);

// ============================================================================
// DaemonClient
// ============================================================================

/// HTTP client for the daemon's control endpoints
pub struct DaemonClient {
    http: reqwest::Client,
    base_url: reqwest::Url,
}

impl DaemonClient {
    /// Client for `override_url`, or for the address in `server.control_listen`
    pub fn new(config: &Config, override_url: Option<&str>) -> Result<Self> {
        let base = match override_url {
            Some(url) => url.to_string(),
            None => daemon_url_from_listen(&config.server.control_listen),
        };
        let base_url =
            reqwest::Url::parse(&base).with_context(|| format!("Invalid daemon URL: {base}"))?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http, base_url })
    }

    pub async fn sync_channels(&self) -> Result<ChannelSyncReport> {
        self.post("sync-channels", &[]).await
    }

    pub async fn reconcile(&self, scope: &ScopeId) -> Result<ReconcileOutcome> {
        self.post("reconcile", &[("scope", scope.as_str())]).await
    }

    async fn post<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let url = self
            .base_url
            .join(path)
            .with_context(|| format!("Invalid endpoint path: {path}"))?;

        let response = self
            .http
            .post(url.clone())
            .query(query)
            .send()
            .await
            .with_context(|| format!("Cannot reach the daemon at {}. Is drivewatchd running?", self.base_url))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Daemon returned {status}: {}", body.trim());
        }

        response
            .json()
            .await
            .with_context(|| format!("Unexpected response from {url}"))
    }
}

/// `http://<listen>/`, with a wildcard address replaced by loopback
fn daemon_url_from_listen(listen: &str) -> String {
    let address = match listen.rsplit_once(':') {
        Some(("0.0.0.0", port)) => format!("127.0.0.1:{port}"),
        Some(("[::]", port)) => format!("[::1]:{port}"),
        _ => listen.to_string(),
    };
    format!("http://{address}/")
}

// ============================================================================
// sync-channels
// ============================================================================

#[derive(Debug, Args)]
pub struct SyncChannelsCommand {}

impl SyncChannelsCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let config = ctx.load_config();
        let client = DaemonClient::new(&config, ctx.daemon_url.as_deref())?;

        info!("Requesting channel sync");
        let report = client.sync_channels().await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&report)?);
            return Ok(());
        }

        formatter.success("Channels synchronized");
        for (label, scopes) in [
            ("Created", &report.created),
            ("Renewed", &report.renewed),
            ("Retired", &report.retired),
            ("Catch-up queued", &report.needs_catch_up),
        ] {
            if !scopes.is_empty() {
                let names: Vec<&str> = scopes.iter().map(ScopeId::as_str).collect();
                formatter.info(&format!("{label}: {}", names.join(", ")));
            }
        }
        for (scope, reason) in &report.failed {
            formatter.warn(&format!("{scope}: {reason}"));
        }
        if report.created.is_empty() && report.renewed.is_empty() && report.retired.is_empty() {
            formatter.info("Every channel is up to date");
        }

        Ok(())
    }
}

// ============================================================================
// reconcile
// ============================================================================

#[derive(Debug, Args)]
pub struct ReconcileCommand {
    /// Scope to reconcile: a folder id, or "root"
    pub scope: String,
}

impl ReconcileCommand {
    pub async fn execute(&self, ctx: &CommandContext) -> Result<()> {
        let formatter = get_formatter(ctx.format);
        let scope = ScopeId::new(self.scope.as_str())?;
        let config = ctx.load_config();
        let client = DaemonClient::new(&config, ctx.daemon_url.as_deref())?;

        info!(scope = %scope, "Requesting reconciliation");
        let outcome = client.reconcile(&scope).await?;

        if ctx.format.is_json() {
            formatter.print_json(&serde_json::to_value(&outcome)?);
            return Ok(());
        }

        formatter.success(&format!(
            "Reconciled {} ({} event{})",
            outcome.scope_id,
            outcome.events.len(),
            if outcome.events.len() == 1 { "" } else { "s" }
        ));
        for event in &outcome.events {
            let item = event.item();
            formatter.info(&format!("{:<14} {}  {}", event.name(), item.id, item.name));
        }
        if outcome.scope_gone {
            formatter.warn("The scope no longer exists remotely; its channel was retired");
        }

        Ok(())
    }
}
