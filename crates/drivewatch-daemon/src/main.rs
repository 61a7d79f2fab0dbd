//! Drivewatch Daemon - Change reconciliation service
//!
//! This binary runs as a long-lived service and handles:
//! - Opening and renewing Drive push notification channels
//! - Receiving notifications and reconciling the affected scopes
//! - Emitting change events to the configured sink
//! - Graceful shutdown on SIGTERM/SIGINT
//!
//! # Architecture
//!
//! The daemon wires the SQLite cache, the Drive provider, and the event
//! sink into a `WatchService`, then waits for a shutdown signal. All
//! background tasks share one `CancellationToken`.

use std::{path::Path, sync::Arc};

use anyhow::{Context, Result};
use drivewatch_cache::{DatabasePool, SqliteChannelRegistry, SqliteSnapshotCache};
use drivewatch_core::config::{Config, LoggingConfig, Secrets};
use drivewatch_core::domain::ChannelSigner;
use drivewatch_gdrive::{DriveClient, DriveProvider, RefreshTokenSource};
use drivewatch_sync::{build_emitter, WatchComponents, WatchService};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

// ============================================================================
// Startup
// ============================================================================

/// Loads the configuration file, falling back to defaults when absent
///
/// A file that exists but cannot be parsed or fails validation is an error.
fn load_config(path: &Path) -> Result<Config> {
    let config = if path.exists() {
        Config::load(path).with_context(|| format!("Failed to load {}", path.display()))?
    } else {
        Config::default()
    };

    let errors = config.validate();
    if !errors.is_empty() {
        let details: Vec<String> = errors.iter().map(ToString::to_string).collect();
        anyhow::bail!("Invalid configuration:\n  {}", details.join("\n  "));
    }

    Ok(config)
}

fn init_tracing(logging: &LoggingConfig) {
    let env_filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&logging.level));

    let builder = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
}

/// Opens storage and the Drive adapter and assembles the engine
async fn build_service(config: &Config, secrets: &Secrets) -> Result<(WatchService, DatabasePool)> {
    let db_pool = DatabasePool::new(&config.storage.database)
        .await
        .context("Failed to open database")?;
    info!(path = %config.storage.database.display(), "Opened state database");

    let tokens = Arc::new(RefreshTokenSource::from_secrets(
        config.drive.token_url.clone(),
        secrets,
    ));
    let client = DriveClient::with_base_url(tokens, config.drive.api_base_url.clone())
        .with_max_retries(config.drive.max_retries);
    let provider = Arc::new(DriveProvider::new(client).with_page_size(config.drive.page_size));

    let signer = ChannelSigner::new(secrets.webhook_secret.as_bytes())
        .context("Invalid webhook secret")?;
    let emitter = build_emitter(&config.events)?;

    let components = WatchComponents {
        remote: provider.clone(),
        channel_api: provider,
        cache: Arc::new(SqliteSnapshotCache::new(db_pool.pool().clone())),
        registry: Arc::new(SqliteChannelRegistry::new(db_pool.pool().clone())),
        emitter,
        signer: Arc::new(signer),
    };

    let service = WatchService::new(config, components)?;
    Ok((service, db_pool))
}

// ============================================================================
// Graceful shutdown signal handler
// ============================================================================

/// Waits for SIGTERM or SIGINT and triggers the cancellation token
async fn shutdown_signal(token: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received SIGINT (Ctrl+C)");
        }
        _ = terminate => {
            info!("Received SIGTERM");
        }
    }

    token.cancel();
}

// ============================================================================
// Main entry point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let config_path = Config::default_path();
    let config = load_config(&config_path)?;
    init_tracing(&config.logging);

    info!(config_path = %config_path.display(), "Drivewatch daemon starting (drivewatchd)");

    let secrets = Secrets::from_env().context("Missing credentials")?;
    let (service, db_pool) = build_service(&config, &secrets).await?;
    drop(secrets);

    let shutdown_token = CancellationToken::new();
    let signal_token = shutdown_token.clone();
    tokio::spawn(async move {
        shutdown_signal(signal_token).await;
    });

    let result = match service.start(shutdown_token.clone()).await {
        Ok(running) => {
            running.wait().await;
            Ok(())
        }
        Err(e) => {
            shutdown_token.cancel();
            Err(e)
        }
    };

    db_pool.close().await;

    match &result {
        Ok(()) => info!("Drivewatch daemon shut down gracefully"),
        Err(e) => error!(error = %e, "Drivewatch daemon exiting with error"),
    }

    result
}

// ============================================================================
// Tests
// ============================================================================
