//! Engine assembly
//!
//! [`WatchService`] wires the use cases, dispatcher, scheduler, and both
//! HTTP listeners from a [`Config`] and a set of port implementations, and
//! starts them as background tasks sharing one cancellation token.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use drivewatch_core::config::Config;
use drivewatch_core::domain::{ChannelSigner, ScopeId};
use drivewatch_core::ports::{
    IChannelApi, IChannelRegistry, IEventEmitter, IRemoteStore, ISnapshotCache,
};
use drivewatch_core::usecases::{
    ChannelManager, ChannelSettings, ReconcileScopeUseCase, ValidateNotificationUseCase,
};

use crate::dispatcher::{DispatcherSettings, ReconcileDispatcher, ReconcileQueue};
use crate::metrics::WatchMetrics;
use crate::notifications::NotificationHandler;
use crate::scheduler::{ChannelScheduler, SchedulerHandle, SchedulerSettings};
use crate::server::{ServerState, Surface, WebhookServer};

/// Attempts per channel create call
const CHANNEL_CREATE_ATTEMPTS: u32 = 3;

/// Port implementations the engine runs against
pub struct WatchComponents {
    pub remote: Arc<dyn IRemoteStore>,
    pub channel_api: Arc<dyn IChannelApi>,
    pub cache: Arc<dyn ISnapshotCache>,
    pub registry: Arc<dyn IChannelRegistry>,
    pub emitter: Arc<dyn IEventEmitter>,
    pub signer: Arc<ChannelSigner>,
}

/// Fully wired engine, not yet running
pub struct WatchService {
    listen: SocketAddr,
    control_listen: SocketAddr,
    registry: Arc<dyn IChannelRegistry>,
    scopes: Vec<ScopeId>,
    metrics: Arc<WatchMetrics>,
    dispatcher: Arc<ReconcileDispatcher>,
    queue_rx: mpsc::UnboundedReceiver<ScopeId>,
    scheduler: ChannelScheduler,
    scheduler_handle: SchedulerHandle,
    notifications: Arc<NotificationHandler>,
}

impl WatchService {
    /// Builds the engine from configuration
    ///
    /// # Errors
    ///
    /// Returns an error for an unparsable listen address or watch scope,
    /// a control address off loopback,
    /// or if the metrics registry cannot be created
    pub fn new(config: &Config, components: WatchComponents) -> anyhow::Result<Self> {
        let listen: SocketAddr = config
            .server
            .listen
            .parse()
            .with_context(|| format!("Invalid server.listen: {}", config.server.listen))?;
        let control_listen: SocketAddr = config.server.control_listen.parse().with_context(|| {
            format!("Invalid server.control_listen: {}", config.server.control_listen)
        })?;
        if !control_listen.ip().is_loopback() {
            anyhow::bail!("server.control_listen must be a loopback address, got {control_listen}");
        }
        let scopes = config.watch_scopes().context("Invalid watch.scopes")?;
        let registry = Arc::clone(&components.registry);
        let metrics = Arc::new(WatchMetrics::new()?);

        let channel_settings = ChannelSettings {
            callback_url: config.watch.callback_url.clone(),
            ttl: seconds(config.watch.channel_ttl_secs),
            renewal_window: seconds(config.watch.renewal_window_secs),
            max_attempts: CHANNEL_CREATE_ATTEMPTS,
        };
        let channels = Arc::new(ChannelManager::new(
            components.channel_api,
            Arc::clone(&components.registry),
            Arc::clone(&components.signer),
            channel_settings,
        ));

        let reconciler = Arc::new(ReconcileScopeUseCase::new(
            components.remote,
            Arc::clone(&components.cache),
            components.emitter,
        ));

        let (dispatcher, queue_rx) = ReconcileDispatcher::new(
            reconciler,
            Arc::clone(&channels),
            Arc::clone(&metrics),
            DispatcherSettings {
                workers: config.reconcile.workers,
                recursive: config.watch.recursive,
            },
        );

        let full_interval = match config.reconcile.full_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        };
        let (scheduler, scheduler_handle) = ChannelScheduler::new(
            channels,
            components.cache,
            dispatcher.queue().clone(),
            Arc::clone(&metrics),
            SchedulerSettings {
                scopes: scopes.clone(),
                recursive: config.watch.recursive,
                check_interval: Duration::from_secs(config.watch.check_interval_secs.max(1)),
                full_interval,
            },
        );

        let notifications = Arc::new(NotificationHandler::new(
            ValidateNotificationUseCase::new(components.registry, components.signer),
            dispatcher.queue().clone(),
            scheduler_handle.clone(),
            Arc::clone(&metrics),
        ));

        Ok(Self {
            listen,
            control_listen,
            registry,
            scopes,
            metrics,
            dispatcher,
            queue_rx,
            scheduler,
            scheduler_handle,
            notifications,
        })
    }

    pub fn metrics(&self) -> Arc<WatchMetrics> {
        Arc::clone(&self.metrics)
    }

    pub fn queue(&self) -> ReconcileQueue {
        self.dispatcher.queue().clone()
    }

    pub fn notifications(&self) -> Arc<NotificationHandler> {
        Arc::clone(&self.notifications)
    }

    pub fn scheduler(&self) -> SchedulerHandle {
        self.scheduler_handle.clone()
    }

    /// Binds both listeners and spawns every component
    ///
    /// # Errors
    ///
    /// Returns an error if either address cannot be bound; nothing is
    /// spawned in that case.
    pub async fn start(self, shutdown: CancellationToken) -> anyhow::Result<RunningService> {
        let state = Arc::new(ServerState {
            notifications: self.notifications,
            dispatcher: Arc::clone(&self.dispatcher),
            scheduler: self.scheduler_handle,
            metrics: self.metrics,
            registry: self.registry,
            scopes: self.scopes,
        });
        let public = WebhookServer::bind(Arc::clone(&state), self.listen, Surface::Public)
            .await
            .with_context(|| format!("Failed to bind {}", self.listen))?;
        let control = WebhookServer::bind(state, self.control_listen, Surface::Control)
            .await
            .with_context(|| format!("Failed to bind {}", self.control_listen))?;
        let local_addr = public.local_addr();
        let control_addr = control.local_addr();

        let dispatcher = tokio::spawn(self.dispatcher.run(self.queue_rx, shutdown.clone()));
        let scheduler = tokio::spawn(self.scheduler.run(shutdown.clone()));
        let public = tokio::spawn(serve(public, shutdown.clone()));
        let control = tokio::spawn(serve(control, shutdown));

        info!(addr = %local_addr, control = %control_addr, "Watch service started");
        Ok(RunningService {
            local_addr,
            control_addr,
            handles: vec![dispatcher, scheduler, public, control],
        })
    }
}

/// Handles of a started [`WatchService`]
pub struct RunningService {
    local_addr: SocketAddr,
    control_addr: SocketAddr,
    handles: Vec<JoinHandle<()>>,
}

impl RunningService {
    /// Address the notification endpoint is actually bound to
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Address the control endpoint is actually bound to
    pub fn control_addr(&self) -> SocketAddr {
        self.control_addr
    }

    /// Waits for every component to stop after cancellation
    pub async fn wait(self) {
        for handle in self.handles {
            if let Err(e) = handle.await {
                error!(error = %e, "Watch service task failed");
            }
        }
        info!("Watch service stopped");
    }
}

async fn serve(server: WebhookServer, shutdown: CancellationToken) {
    let addr = server.local_addr();
    if let Err(e) = server.run(shutdown).await {
        error!(addr = %addr, error = %e, "HTTP endpoint failed");
    }
}

fn seconds(secs: u64) -> chrono::Duration {
    chrono::Duration::seconds(i64::try_from(secs).unwrap_or(i64::MAX / 1000))
}
