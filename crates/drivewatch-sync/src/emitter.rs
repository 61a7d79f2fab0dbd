//! Event emitter adapters
//!
//! - [`LogEventEmitter`] writes each event to the log; the default sink
//! - [`WebhookEventEmitter`] POSTs each batch as one JSON document

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Serialize;
use tracing::{debug, info};

use drivewatch_core::config::EventsConfig;
use drivewatch_core::domain::{ChangeEvent, ScopeId};
use drivewatch_core::ports::IEventEmitter;

/// Per-request timeout for the webhook sink
const WEBHOOK_TIMEOUT: Duration = Duration::from_secs(30);

/// Builds the emitter selected by `events.sink`
pub fn build_emitter(config: &EventsConfig) -> Result<Arc<dyn IEventEmitter>> {
    match config.sink.as_str() {
        "log" => Ok(Arc::new(LogEventEmitter)),
        "http" => {
            let url = config
                .url
                .as_deref()
                .context("events.url is required when events.sink is \"http\"")?;
            Ok(Arc::new(WebhookEventEmitter::new(url)?))
        }
        other => anyhow::bail!("Unknown event sink: {other}"),
    }
}

// ============================================================================
// LogEventEmitter
// ============================================================================

/// Emits events as structured log records
pub struct LogEventEmitter;

#[async_trait::async_trait]
impl IEventEmitter for LogEventEmitter {
    async fn emit(&self, scope_id: &ScopeId, events: &[ChangeEvent]) -> Result<()> {
        for event in events {
            let item = event.item();
            info!(
                scope = %scope_id,
                event = event.name(),
                item_id = %item.id,
                name = %item.name,
                parent_id = item.parent_id.as_ref().map(|p| p.as_str()).unwrap_or("root"),
                "Change event"
            );
        }
        Ok(())
    }
}

// ============================================================================
// WebhookEventEmitter
// ============================================================================

/// Body posted for one reconciliation pass
#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct EventBatch<'a> {
    scope_id: &'a ScopeId,
    events: &'a [ChangeEvent],
}

/// Delivers each batch to an HTTP endpoint
///
/// Any non-2xx response fails the batch, which keeps the reconciliation
/// uncommitted so the events are produced again on the next pass.
pub struct WebhookEventEmitter {
    client: reqwest::Client,
    url: reqwest::Url,
}

impl WebhookEventEmitter {
    pub fn new(url: &str) -> Result<Self> {
        let url = reqwest::Url::parse(url).with_context(|| format!("Invalid events.url: {url}"))?;
        let client = reqwest::Client::builder()
            .timeout(WEBHOOK_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client, url })
    }
}

#[async_trait::async_trait]
impl IEventEmitter for WebhookEventEmitter {
    async fn emit(&self, scope_id: &ScopeId, events: &[ChangeEvent]) -> Result<()> {
        let body = EventBatch { scope_id, events };

        self.client
            .post(self.url.clone())
            .json(&body)
            .send()
            .await
            .context("Failed to deliver event batch")?
            .error_for_status()
            .context("Event sink rejected batch")?;

        debug!(scope = %scope_id, events = events.len(), "Delivered event batch");
        Ok(())
    }
}
