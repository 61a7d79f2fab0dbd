//! Channel scheduler - periodic driver and on-demand trigger
//!
//! The [`ChannelScheduler`] keeps the channel registry in line with the
//! watched scopes and feeds catch-up reconciliations to the dispatcher.
//!
//! ## Flow
//!
//! ```text
//! check interval ──┐
//! SchedulerHandle ─┼──→ ChannelScheduler ──→ ChannelManager::ensure_all_watched
//! full interval ───┘          │
//!                             └──→ ReconcileQueue (catch-up, full passes)
//! ```
//!
//! On startup every watched scope is reconciled once, since notifications
//! delivered while the daemon was down are lost.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::{mpsc, oneshot};
use tokio::time::{interval_at, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use drivewatch_core::domain::ScopeId;
use drivewatch_core::ports::ISnapshotCache;
use drivewatch_core::usecases::{ChannelError, ChannelManager, ChannelSyncReport, WatchOutcome};

use crate::dispatcher::ReconcileQueue;
use crate::metrics::WatchMetrics;

// ============================================================================
// SchedulerHandle
// ============================================================================

/// Requests accepted by the scheduler loop
#[derive(Debug)]
pub enum SchedulerRequest {
    /// Run `ensure_all_watched` now, optionally reporting the result
    SyncChannels {
        reply: Option<oneshot::Sender<Result<ChannelSyncReport, String>>>,
    },
    /// A notification arrived on an expired channel
    Renew(ScopeId),
}

/// Handle for triggering the scheduler; cheap to clone
#[derive(Clone)]
pub struct SchedulerHandle {
    tx: mpsc::UnboundedSender<SchedulerRequest>,
}

impl SchedulerHandle {
    /// Asks for the scope's channel to be replaced; returns immediately
    pub fn request_renewal(&self, scope: ScopeId) -> bool {
        self.tx.send(SchedulerRequest::Renew(scope)).is_ok()
    }

    /// Triggers a channel sync pass and waits for its report
    pub async fn sync_channels(&self) -> anyhow::Result<ChannelSyncReport> {
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(SchedulerRequest::SyncChannels { reply: Some(reply) })
            .map_err(|_| anyhow::anyhow!("Channel scheduler is not running"))?;
        rx.await
            .context("Channel scheduler stopped before replying")?
            .map_err(anyhow::Error::msg)
    }
}

// ============================================================================
// ChannelScheduler
// ============================================================================

/// Scheduler tunables
#[derive(Debug, Clone)]
pub struct SchedulerSettings {
    /// Configured watch scopes
    pub scopes: Vec<ScopeId>,
    /// Also watch every cached folder beneath the configured scopes
    pub recursive: bool,
    /// Period of the channel check
    pub check_interval: Duration,
    /// Period of unconditional full reconciliation; `None` disables it
    pub full_interval: Option<Duration>,
}

/// Periodic channel maintenance and catch-up reconciliation
pub struct ChannelScheduler {
    channels: Arc<ChannelManager>,
    cache: Arc<dyn ISnapshotCache>,
    queue: ReconcileQueue,
    metrics: Arc<WatchMetrics>,
    settings: SchedulerSettings,
    rx: mpsc::UnboundedReceiver<SchedulerRequest>,
}

impl ChannelScheduler {
    /// Creates a scheduler and the handle used to trigger it
    pub fn new(
        channels: Arc<ChannelManager>,
        cache: Arc<dyn ISnapshotCache>,
        queue: ReconcileQueue,
        metrics: Arc<WatchMetrics>,
        settings: SchedulerSettings,
    ) -> (Self, SchedulerHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let scheduler = Self {
            channels,
            cache,
            queue,
            metrics,
            settings,
            rx,
        };
        (scheduler, SchedulerHandle { tx })
    }

    /// Main loop; returns when `shutdown` is cancelled or every handle is gone
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            scopes = self.settings.scopes.len(),
            check_secs = self.settings.check_interval.as_secs(),
            "Channel scheduler starting"
        );

        self.sync_pass().await;
        self.reconcile_all().await;

        let period = self.settings.check_interval;
        let mut check = interval_at(Instant::now() + period, period);
        check.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let mut full = self.settings.full_interval.map(|period| {
            let mut full = interval_at(Instant::now() + period, period);
            full.set_missed_tick_behavior(MissedTickBehavior::Delay);
            full
        });

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                _ = check.tick() => self.sync_pass().await,

                _ = next_tick(&mut full) => self.reconcile_all().await,

                request = self.rx.recv() => match request {
                    Some(SchedulerRequest::SyncChannels { reply }) => {
                        info!("On-demand channel sync requested");
                        let result = self.sync_channels().await.map_err(|e| e.to_string());
                        if let Some(reply) = reply {
                            let _ = reply.send(result);
                        }
                    }
                    Some(SchedulerRequest::Renew(scope)) => self.renew_expired(&scope).await,
                    None => break,
                },
            }
        }

        info!("Channel scheduler stopped");
    }

    /// Brings channels in line with the watch set and queues catch-up passes
    ///
    /// # Errors
    ///
    /// Returns an error only if the cache or registry cannot be read;
    /// per-scope failures are listed in the report.
    pub async fn sync_channels(&self) -> Result<ChannelSyncReport, ChannelError> {
        let scopes = self.watch_set().await?;
        let report = self.channels.ensure_all_watched(&scopes).await?;

        for (operation, scopes) in [
            ("create", &report.created),
            ("renew", &report.renewed),
            ("retire", &report.retired),
        ] {
            for _ in scopes {
                self.metrics.record_channel_operation(operation, "ok");
            }
        }
        for (scope, reason) in &report.failed {
            self.metrics.record_channel_operation("sync", "error");
            debug!(scope = %scope, reason = %reason, "Channel sync failure");
        }

        for scope in &report.needs_catch_up {
            self.queue.enqueue(scope.clone());
        }

        info!(
            watched = scopes.len(),
            created = report.created.len(),
            renewed = report.renewed.len(),
            retired = report.retired.len(),
            failed = report.failed.len(),
            "Channel sync complete"
        );
        Ok(report)
    }

    /// Configured scopes, plus every cached folder beneath them when
    /// watching recursively
    pub async fn watch_set(&self) -> anyhow::Result<Vec<ScopeId>> {
        let mut scopes = self.settings.scopes.clone();
        if !self.settings.recursive {
            return Ok(scopes);
        }

        let mut seen: HashSet<ScopeId> = scopes.iter().cloned().collect();
        let mut frontier: VecDeque<_> = scopes.iter().map(ScopeId::as_item_id).collect();

        while let Some(parent) = frontier.pop_front() {
            for child in self.cache.list_children(parent.as_ref()).await? {
                if !child.is_folder() || child.trashed {
                    continue;
                }
                let scope = ScopeId::folder(&child.id);
                if seen.insert(scope.clone()) {
                    scopes.push(scope);
                    frontier.push_back(Some(child.id));
                }
            }
        }

        Ok(scopes)
    }

    async fn sync_pass(&self) {
        if let Err(e) = self.sync_channels().await {
            warn!(error = %e, "Channel sync pass failed");
        }
    }

    /// Queues every watched scope
    async fn reconcile_all(&self) {
        match self.watch_set().await {
            Ok(scopes) => {
                debug!(scopes = scopes.len(), "Queueing full reconciliation");
                for scope in scopes {
                    self.queue.enqueue(scope);
                }
            }
            Err(e) => warn!(error = %e, "Failed to compute watch set"),
        }
    }

    async fn renew_expired(&self, scope: &ScopeId) {
        match self.channels.ensure_watched(scope).await {
            Ok(WatchOutcome::Created { .. }) => {
                self.metrics.record_channel_operation("renew", "ok");
                info!(scope = %scope, "Expired channel replaced");
            }
            Ok(WatchOutcome::AlreadyWatched(_)) => {
                debug!(scope = %scope, "Channel already renewed");
            }
            Err(e) => {
                self.metrics.record_channel_operation("renew", "error");
                warn!(scope = %scope, error = %e, "Failed to replace expired channel");
            }
        }
    }
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}
