//! Shared harness for engine tests
//!
//! [`Harness`] owns the fakes; [`Harness::start`] runs a [`WatchService`]
//! over them on ephemeral ports.

use std::net::SocketAddr;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use drivewatch_core::config::Config;
use drivewatch_core::domain::{ChannelSigner, Item, ItemId, Notification, Revision, ScopeId};
use drivewatch_core::testing::{
    FakeChannelApi, FakeRemoteStore, MemoryChannelRegistry, MemorySnapshotCache, RecordingEmitter,
};
use drivewatch_sync::{
    NotificationHandler, ReconcileQueue, RunningService, SchedulerHandle, WatchComponents,
    WatchMetrics, WatchService,
};

pub const WEBHOOK_SECRET: &str = "integration-secret";

pub fn id(s: &str) -> ItemId {
    ItemId::new(s).unwrap()
}

pub fn scope(s: &str) -> ScopeId {
    ScopeId::new(s).unwrap()
}

pub fn folder(i: &str, parent: Option<&str>, name: &str) -> Item {
    Item::folder(id(i), parent.map(id), name, Revision::new("1"))
}

pub fn file(i: &str, parent: Option<&str>, name: &str) -> Item {
    Item::file(id(i), parent.map(id), name, Revision::new("1"))
}

/// Config watching `scopes`, with periodic work pushed out of the way
pub fn config(scopes: &[&str], recursive: bool) -> Config {
    let mut config = Config::default();
    config.watch.scopes = scopes.iter().map(|s| s.to_string()).collect();
    config.watch.recursive = recursive;
    config.watch.check_interval_secs = 3600;
    config.server.listen = "127.0.0.1:0".to_string();
    config.server.control_listen = "127.0.0.1:0".to_string();
    config
}

pub struct Harness {
    pub remote: Arc<FakeRemoteStore>,
    pub channel_api: Arc<FakeChannelApi>,
    pub cache: Arc<MemorySnapshotCache>,
    pub registry: Arc<MemoryChannelRegistry>,
    pub emitter: Arc<RecordingEmitter>,
    pub signer: Arc<ChannelSigner>,
}

/// A started engine and the handles tests drive it through
pub struct Running {
    pub queue: ReconcileQueue,
    pub notifications: Arc<NotificationHandler>,
    pub scheduler: SchedulerHandle,
    pub metrics: Arc<WatchMetrics>,
    pub addr: SocketAddr,
    pub control_addr: SocketAddr,
    shutdown: CancellationToken,
    service: RunningService,
}

impl Harness {
    pub fn new(remote: FakeRemoteStore) -> Self {
        Self::with_cache(remote, MemorySnapshotCache::new())
    }

    pub fn with_cache(remote: FakeRemoteStore, cache: MemorySnapshotCache) -> Self {
        Self {
            remote: Arc::new(remote),
            channel_api: Arc::new(FakeChannelApi::new()),
            cache: Arc::new(cache),
            registry: Arc::new(MemoryChannelRegistry::new()),
            emitter: Arc::new(RecordingEmitter::new()),
            signer: Arc::new(ChannelSigner::new(WEBHOOK_SECRET).unwrap()),
        }
    }

    fn components(&self) -> WatchComponents {
        WatchComponents {
            remote: self.remote.clone(),
            channel_api: self.channel_api.clone(),
            cache: self.cache.clone(),
            registry: self.registry.clone(),
            emitter: self.emitter.clone(),
            signer: self.signer.clone(),
        }
    }

    /// Starts the engine and waits for its startup passes to finish
    pub async fn start(&self, config: &Config) -> Running {
        let service = WatchService::new(config, self.components()).unwrap();
        let queue = service.queue();
        let notifications = service.notifications();
        let scheduler = service.scheduler();
        let metrics = service.metrics();

        let shutdown = CancellationToken::new();
        let service = service.start(shutdown.clone()).await.unwrap();

        let running = Running {
            queue,
            notifications,
            scheduler,
            metrics,
            addr: service.local_addr(),
            control_addr: service.control_addr(),
            shutdown,
            service,
        };
        running.settle().await;
        running
    }

    /// A correctly signed notification on the scope's registered channel
    pub fn notification(&self, scope: &ScopeId) -> Notification {
        let descriptor = self
            .registry
            .snapshot()
            .remove(scope)
            .expect("scope has a registered channel");
        Notification::new(
            descriptor.subscription_id,
            scope.clone(),
            descriptor.signing_token.as_str(),
        )
    }
}

impl Running {
    /// Waits until the scheduler has finished its startup work and every
    /// queued reconciliation, including follow-ups, has run
    pub async fn settle(&self) {
        // Requests are only served once the startup passes are done
        self.scheduler.sync_channels().await.unwrap();
        self.queue.wait_idle().await;
    }

    pub fn url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn control_url(&self, path: &str) -> String {
        format!("http://{}{}", self.control_addr, path)
    }

    pub async fn stop(self) {
        self.shutdown.cancel();
        self.service.wait().await;
    }
}
