//! Reconcile dispatcher - coalescing queue and bounded worker pool
//!
//! ```text
//! NotificationHandler ─┐
//! ChannelScheduler ────┼──→ ReconcileQueue ──→ ReconcileDispatcher ──→ ReconcileScopeUseCase
//! follow-up passes ────┘    (pending set)      (semaphore, ScopeLocks)
//! ```
//!
//! ## Coalescing
//!
//! A scope sits in the pending set from the moment it is queued until a
//! worker holding its lock starts the pass. Requests for a pending scope
//! are absorbed; a request arriving while the pass runs queues exactly one
//! follow-up, which then waits for the lock.
//!
//! ## Follow-ups
//!
//! After a committed pass:
//! - in recursive mode every newly created folder gets a channel and its
//!   own reconciliation
//! - channels of deleted folders are retired
//! - the scope's own channel is retired when the scope vanished, or when
//!   the notification said the watched folder was removed or trashed

use std::sync::Arc;
use std::time::Duration;

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::{mpsc, watch, Semaphore};
use tokio::task::JoinSet;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use drivewatch_core::domain::ScopeId;
use drivewatch_core::usecases::{
    ChannelManager, ReconcileError, ReconcileOutcome, ReconcileScopeUseCase, WatchOutcome,
};

use crate::metrics::WatchMetrics;
use crate::scope_lock::ScopeLocks;

/// How long shutdown waits for in-flight passes before aborting them
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

// ============================================================================
// ReconcileQueue
// ============================================================================

/// Result of queueing a scope
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    /// A new pass was queued
    Queued,
    /// A pass for the scope was already waiting; the request was absorbed
    Coalesced,
    /// The dispatcher has stopped
    Closed,
}

#[derive(Debug, Default, Clone, Copy)]
struct PendingPass {
    close_channel: bool,
}

/// Handle for queueing scopes; cheap to clone
#[derive(Clone)]
pub struct ReconcileQueue {
    tx: mpsc::UnboundedSender<ScopeId>,
    pending: Arc<DashMap<ScopeId, PendingPass>>,
    /// Passes queued but not yet finished
    outstanding: Arc<watch::Sender<usize>>,
    metrics: Arc<WatchMetrics>,
}

impl ReconcileQueue {
    fn new(metrics: Arc<WatchMetrics>) -> (Self, mpsc::UnboundedReceiver<ScopeId>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let (outstanding, _) = watch::channel(0);
        let queue = Self {
            tx,
            pending: Arc::new(DashMap::new()),
            outstanding: Arc::new(outstanding),
            metrics,
        };
        (queue, rx)
    }

    /// Queues a reconciliation of `scope`
    pub fn enqueue(&self, scope: ScopeId) -> Enqueued {
        self.push(scope, false)
    }

    /// Queues a reconciliation after which the scope's channel is retired
    pub fn enqueue_closing(&self, scope: ScopeId) -> Enqueued {
        self.push(scope, true)
    }

    fn push(&self, scope: ScopeId, close_channel: bool) -> Enqueued {
        match self.pending.entry(scope.clone()) {
            Entry::Occupied(mut entry) => {
                entry.get_mut().close_channel |= close_channel;
                debug!(scope = %scope, "Reconciliation already queued");
                return Enqueued::Coalesced;
            }
            Entry::Vacant(entry) => {
                entry.insert(PendingPass { close_channel });
            }
        }

        self.outstanding.send_modify(|n| *n += 1);
        if self.tx.send(scope.clone()).is_err() {
            self.pending.remove(&scope);
            self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
            warn!(scope = %scope, "Dispatcher stopped, reconciliation not queued");
            return Enqueued::Closed;
        }

        self.metrics.set_queued_scopes(self.pending.len());
        debug!(scope = %scope, "Reconciliation queued");
        Enqueued::Queued
    }

    /// Claims the pending entry once the pass is about to start
    fn take(&self, scope: &ScopeId) -> PendingPass {
        let pass = self
            .pending
            .remove(scope)
            .map(|(_, pass)| pass)
            .unwrap_or_default();
        self.metrics.set_queued_scopes(self.pending.len());
        pass
    }

    fn finish(&self) {
        self.outstanding
            .send_modify(|n| *n = n.saturating_sub(1));
    }

    /// Number of scopes waiting for a worker
    pub fn pending(&self) -> usize {
        self.pending.len()
    }

    /// Resolves once every queued pass, including follow-ups, has finished
    pub async fn wait_idle(&self) {
        let mut rx = self.outstanding.subscribe();
        // The sender lives as long as `self`, so this cannot fail
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

// ============================================================================
// ReconcileDispatcher
// ============================================================================

/// Dispatcher tunables
#[derive(Debug, Clone)]
pub struct DispatcherSettings {
    /// Maximum number of scopes reconciled in parallel
    pub workers: usize,
    /// Watch and reconcile folders discovered beneath a scope
    pub recursive: bool,
}

/// Runs queued reconciliations, at most one per scope at a time
pub struct ReconcileDispatcher {
    queue: ReconcileQueue,
    locks: ScopeLocks,
    reconciler: Arc<ReconcileScopeUseCase>,
    channels: Arc<ChannelManager>,
    metrics: Arc<WatchMetrics>,
    settings: DispatcherSettings,
}

impl ReconcileDispatcher {
    /// Creates the dispatcher and the receiving end of its queue
    ///
    /// The receiver must be handed to [`run`](Self::run).
    pub fn new(
        reconciler: Arc<ReconcileScopeUseCase>,
        channels: Arc<ChannelManager>,
        metrics: Arc<WatchMetrics>,
        settings: DispatcherSettings,
    ) -> (Arc<Self>, mpsc::UnboundedReceiver<ScopeId>) {
        let (queue, rx) = ReconcileQueue::new(Arc::clone(&metrics));
        let dispatcher = Arc::new(Self {
            queue,
            locks: ScopeLocks::new(),
            reconciler,
            channels,
            metrics,
            settings,
        });
        (dispatcher, rx)
    }

    pub fn queue(&self) -> &ReconcileQueue {
        &self.queue
    }

    /// Main loop: pulls scopes off the queue and runs them on the pool
    ///
    /// On cancellation, stops taking new work and gives in-flight passes
    /// a grace period before aborting them. An aborted pass has not
    /// committed anything.
    pub async fn run(
        self: Arc<Self>,
        mut rx: mpsc::UnboundedReceiver<ScopeId>,
        shutdown: CancellationToken,
    ) {
        let workers = self.settings.workers.max(1);
        let permits = Arc::new(Semaphore::new(workers));
        let mut tasks = JoinSet::new();

        info!(workers, recursive = self.settings.recursive, "Reconcile dispatcher started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => break,

                Some(joined) = tasks.join_next(), if !tasks.is_empty() => {
                    if let Err(e) = joined {
                        if e.is_panic() {
                            error!(error = %e, "Reconcile worker panicked");
                        }
                    }
                }

                next = rx.recv() => {
                    let Some(scope) = next else { break };

                    let permit = tokio::select! {
                        _ = shutdown.cancelled() => break,
                        permit = Arc::clone(&permits).acquire_owned() => permit,
                    };
                    let Ok(permit) = permit else { break };

                    let this = Arc::clone(&self);
                    tasks.spawn(async move {
                        this.process(scope).await;
                        drop(permit);
                    });
                }
            }
        }

        if !tasks.is_empty() {
            info!(in_flight = tasks.len(), "Waiting for in-flight reconciliations");
            let drained = tokio::time::timeout(SHUTDOWN_GRACE, async {
                while tasks.join_next().await.is_some() {}
            })
            .await;
            if drained.is_err() {
                warn!("Aborting reconciliations still running after grace period");
                tasks.shutdown().await;
            }
        }

        info!("Reconcile dispatcher stopped");
    }

    /// Reconciles `scope` immediately, bypassing the queue
    ///
    /// Shares the per-scope lock with queued passes.
    pub async fn reconcile_now(&self, scope: &ScopeId) -> Result<ReconcileOutcome, ReconcileError> {
        let result = {
            let _guard = self.locks.lock(scope).await;
            self.execute(scope).await
        };
        if let Ok(outcome) = &result {
            self.follow_up(scope, outcome, false).await;
        }
        result
    }

    async fn process(&self, scope: ScopeId) {
        let (pass, result) = {
            let _guard = self.locks.lock(&scope).await;
            let pass = self.queue.take(&scope);
            (pass, self.execute(&scope).await)
        };

        if let Ok(outcome) = &result {
            self.follow_up(&scope, outcome, pass.close_channel).await;
        }
        self.queue.finish();
    }

    /// Runs one pass and records its outcome; the caller holds the lock
    async fn execute(&self, scope: &ScopeId) -> Result<ReconcileOutcome, ReconcileError> {
        let started = Instant::now();
        let result = self.reconciler.execute(scope).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(outcome) => {
                self.metrics.record_reconciliation("ok", elapsed);
                self.metrics.record_events(&outcome.events);
            }
            Err(e) => {
                self.metrics.record_reconciliation(e.status(), elapsed);
                match e {
                    ReconcileError::Storage(_) => {
                        error!(scope = %scope, error = %e, "Reconciliation failed, cache unchanged");
                    }
                    _ if e.is_transient() => {
                        warn!(scope = %scope, error = %e, "Reconciliation failed, will retry on next trigger");
                    }
                    _ => {
                        warn!(scope = %scope, error = %e, "Reconciliation deferred");
                    }
                }
            }
        }
        result
    }

    async fn follow_up(&self, scope: &ScopeId, outcome: &ReconcileOutcome, close_channel: bool) {
        if self.settings.recursive {
            let scope_item = scope.as_item_id();
            for folder in outcome.created_folders() {
                if scope_item.as_ref() == Some(&folder) {
                    continue;
                }
                let child = ScopeId::folder(&folder);
                self.watch_discovered(&child).await;
                self.queue.enqueue(child);
            }
        }

        for folder in outcome.deleted_folders() {
            let child = ScopeId::folder(&folder);
            if &child != scope {
                self.forget_channel(&child).await;
            }
        }

        if outcome.scope_gone || (close_channel && !scope.is_root()) {
            self.forget_channel(scope).await;
        }
    }

    async fn watch_discovered(&self, scope: &ScopeId) {
        match self.channels.ensure_watched(scope).await {
            Ok(WatchOutcome::Created { .. }) => {
                self.metrics.record_channel_operation("create", "ok");
                debug!(scope = %scope, "Watching discovered folder");
            }
            Ok(WatchOutcome::AlreadyWatched(_)) => {}
            Err(e) => {
                self.metrics.record_channel_operation("create", "error");
                warn!(scope = %scope, error = %e, "Failed to watch discovered folder");
            }
        }
    }

    async fn forget_channel(&self, scope: &ScopeId) {
        match self.channels.retire(scope).await {
            Ok(true) => self.metrics.record_channel_operation("retire", "ok"),
            Ok(false) => {}
            Err(e) => {
                self.metrics.record_channel_operation("retire", "error");
                warn!(scope = %scope, error = %e, "Failed to retire channel");
            }
        }
    }
}
