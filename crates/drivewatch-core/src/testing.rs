//! In-memory port implementations for tests
//!
//! Available to this crate's unit tests and, through the `test-support`
//! feature, to the integration tests of downstream crates.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};

use crate::domain::{
    CacheBatch, ChangeEvent, ChannelDescriptor, ChannelRequest, Item, ItemId, ItemKind,
    RemoteError, ScopeId,
};
use crate::ports::{
    CacheCounts, IChannelApi, IChannelRegistry, IEventEmitter, IRemoteStore, ISnapshotCache,
    ItemPage,
};

// ============================================================================
// MemorySnapshotCache
// ============================================================================

/// Snapshot cache held in a map
#[derive(Debug, Default)]
pub struct MemorySnapshotCache {
    items: Mutex<BTreeMap<ItemId, Item>>,
    fail_writes: AtomicBool,
}

impl MemorySnapshotCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let cache = Self::new();
        {
            let mut map = cache.items.lock().unwrap();
            for item in items {
                map.insert(item.id.clone(), item);
            }
        }
        cache
    }

    /// Makes every subsequent write fail
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn snapshot(&self) -> BTreeMap<ItemId, Item> {
        self.items.lock().unwrap().clone()
    }

    fn check_writable(&self) -> anyhow::Result<()> {
        if self.fail_writes.load(Ordering::SeqCst) {
            anyhow::bail!("simulated storage failure");
        }
        Ok(())
    }
}

#[async_trait::async_trait]
impl ISnapshotCache for MemorySnapshotCache {
    async fn get(&self, id: &ItemId) -> anyhow::Result<Option<Item>> {
        Ok(self.items.lock().unwrap().get(id).cloned())
    }

    async fn put(&self, item: &Item) -> anyhow::Result<()> {
        self.check_writable()?;
        self.items
            .lock()
            .unwrap()
            .insert(item.id.clone(), item.clone());
        Ok(())
    }

    async fn remove(&self, id: &ItemId) -> anyhow::Result<()> {
        self.check_writable()?;
        self.items.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list_children(&self, parent_id: Option<&ItemId>) -> anyhow::Result<Vec<Item>> {
        Ok(self
            .items
            .lock()
            .unwrap()
            .values()
            .filter(|item| item.parent_id.as_ref() == parent_id)
            .cloned()
            .collect())
    }

    async fn apply_batch(&self, batch: &CacheBatch) -> anyhow::Result<()> {
        self.check_writable()?;
        let mut items = self.items.lock().unwrap();
        for id in &batch.removes {
            items.remove(id);
        }
        for item in &batch.puts {
            items.insert(item.id.clone(), item.clone());
        }
        Ok(())
    }

    async fn counts(&self) -> anyhow::Result<CacheCounts> {
        let items = self.items.lock().unwrap();
        let folders = items.values().filter(|i| i.kind == ItemKind::Folder).count() as u64;
        Ok(CacheCounts {
            files: items.len() as u64 - folders,
            folders,
        })
    }
}

// ============================================================================
// MemoryChannelRegistry
// ============================================================================

/// Channel registry held in a map
#[derive(Debug, Default)]
pub struct MemoryChannelRegistry {
    channels: Mutex<BTreeMap<ScopeId, ChannelDescriptor>>,
}

impl MemoryChannelRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> BTreeMap<ScopeId, ChannelDescriptor> {
        self.channels.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IChannelRegistry for MemoryChannelRegistry {
    async fn get(&self, scope_id: &ScopeId) -> anyhow::Result<Option<ChannelDescriptor>> {
        Ok(self.channels.lock().unwrap().get(scope_id).cloned())
    }

    async fn put(&self, descriptor: &ChannelDescriptor) -> anyhow::Result<()> {
        self.channels
            .lock()
            .unwrap()
            .insert(descriptor.scope_id.clone(), descriptor.clone());
        Ok(())
    }

    async fn remove(&self, scope_id: &ScopeId) -> anyhow::Result<()> {
        self.channels.lock().unwrap().remove(scope_id);
        Ok(())
    }

    async fn list_expiring_before(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ChannelDescriptor>> {
        let mut expiring: Vec<_> = self
            .channels
            .lock()
            .unwrap()
            .values()
            .filter(|d| d.expires_at < before)
            .cloned()
            .collect();
        expiring.sort_by_key(|d| d.expires_at);
        Ok(expiring)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<ChannelDescriptor>> {
        Ok(self.channels.lock().unwrap().values().cloned().collect())
    }
}

// ============================================================================
// FakeRemoteStore
// ============================================================================

/// Remote tree held in memory, paginated like the real listing API
///
/// Items are keyed by id; `parent_id = None` places an item under the
/// root. Listings return items in id order, `page_size` per page.
#[derive(Debug)]
pub struct FakeRemoteStore {
    items: Mutex<BTreeMap<ItemId, Item>>,
    page_size: usize,
    list_calls: AtomicUsize,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    delay: Mutex<Option<Duration>>,
    failures: Mutex<VecDeque<RemoteError>>,
}

impl Default for FakeRemoteStore {
    fn default() -> Self {
        Self {
            items: Mutex::new(BTreeMap::new()),
            page_size: 2,
            list_calls: AtomicUsize::new(0),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
            delay: Mutex::new(None),
            failures: Mutex::new(VecDeque::new()),
        }
    }
}

impl FakeRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_items(items: impl IntoIterator<Item = Item>) -> Self {
        let store = Self::new();
        for item in items {
            store.upsert(item);
        }
        store
    }

    pub fn upsert(&self, item: Item) {
        self.items.lock().unwrap().insert(item.id.clone(), item);
    }

    pub fn delete(&self, id: &ItemId) {
        self.items.lock().unwrap().remove(id);
    }

    /// Delays every listing call, to widen race windows
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    /// Queues an error returned by the next remote call
    pub fn fail_next(&self, error: RemoteError) {
        self.failures.lock().unwrap().push_back(error);
    }

    /// Number of `list_children` calls so far
    pub fn list_calls(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    /// Highest number of concurrent `list_children` calls seen
    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn take_failure(&self) -> Option<RemoteError> {
        self.failures.lock().unwrap().pop_front()
    }
}

#[async_trait::async_trait]
impl IRemoteStore for FakeRemoteStore {
    async fn list_children(
        &self,
        scope: &ScopeId,
        page_token: Option<&str>,
    ) -> Result<ItemPage, RemoteError> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        if let Some(error) = self.take_failure() {
            return Err(error);
        }

        let parent = scope.as_item_id();
        let items = self.items.lock().unwrap();
        if let Some(parent) = &parent {
            match items.get(parent) {
                Some(folder) if folder.is_folder() => {}
                _ => return Err(RemoteError::NotFound(parent.to_string())),
            }
        }

        let children: Vec<Item> = items
            .values()
            .filter(|item| item.parent_id == parent)
            .cloned()
            .collect();
        let start: usize = page_token.and_then(|t| t.parse().ok()).unwrap_or(0);
        let end = (start + self.page_size).min(children.len());
        let next_page_token = (end < children.len()).then(|| end.to_string());

        Ok(ItemPage {
            items: children[start.min(end)..end].to_vec(),
            next_page_token,
        })
    }

    async fn get_item(&self, id: &ItemId) -> Result<Item, RemoteError> {
        if let Some(error) = self.take_failure() {
            return Err(error);
        }
        self.items
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| RemoteError::NotFound(id.to_string()))
    }
}

// ============================================================================
// FakeChannelApi
// ============================================================================

/// Channel API that accepts every request and records the calls
#[derive(Debug, Default)]
pub struct FakeChannelApi {
    created: Mutex<Vec<ChannelRequest>>,
    stopped: Mutex<Vec<ChannelDescriptor>>,
    create_failures: Mutex<VecDeque<RemoteError>>,
    stop_failures: Mutex<VecDeque<RemoteError>>,
    /// Caps the granted expiry, like a remote store shortening the TTL
    max_expiry: Mutex<Option<DateTime<Utc>>>,
}

impl FakeChannelApi {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_create(&self, error: RemoteError) {
        self.create_failures.lock().unwrap().push_back(error);
    }

    pub fn fail_next_stop(&self, error: RemoteError) {
        self.stop_failures.lock().unwrap().push_back(error);
    }

    pub fn cap_expiry(&self, at: DateTime<Utc>) {
        *self.max_expiry.lock().unwrap() = Some(at);
    }

    pub fn created(&self) -> Vec<ChannelRequest> {
        self.created.lock().unwrap().clone()
    }

    pub fn stopped(&self) -> Vec<ChannelDescriptor> {
        self.stopped.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl IChannelApi for FakeChannelApi {
    async fn create_channel(
        &self,
        request: &ChannelRequest,
    ) -> Result<ChannelDescriptor, RemoteError> {
        self.created.lock().unwrap().push(request.clone());
        if let Some(error) = self.create_failures.lock().unwrap().pop_front() {
            return Err(error);
        }
        let mut descriptor =
            request.to_descriptor(Some(format!("res-{}", request.scope_id.as_str())));
        if let Some(cap) = *self.max_expiry.lock().unwrap() {
            descriptor.expires_at = descriptor.expires_at.min(cap);
        }
        Ok(descriptor)
    }

    async fn stop_channel(&self, descriptor: &ChannelDescriptor) -> Result<(), RemoteError> {
        self.stopped.lock().unwrap().push(descriptor.clone());
        match self.stop_failures.lock().unwrap().pop_front() {
            Some(error) => Err(error),
            None => Ok(()),
        }
    }
}

// ============================================================================
// RecordingEmitter
// ============================================================================

/// Emitter that keeps every batch it receives
#[derive(Debug, Default)]
pub struct RecordingEmitter {
    batches: Mutex<Vec<(ScopeId, Vec<ChangeEvent>)>>,
    failures: AtomicUsize,
    delay: Mutex<Option<Duration>>,
}

impl RecordingEmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rejects the next `count` batches
    pub fn fail_next(&self, count: usize) {
        self.failures.store(count, Ordering::SeqCst);
    }

    /// Holds every batch for `delay` before accepting it
    pub fn set_delay(&self, delay: Duration) {
        *self.delay.lock().unwrap() = Some(delay);
    }

    pub fn batches(&self) -> Vec<(ScopeId, Vec<ChangeEvent>)> {
        self.batches.lock().unwrap().clone()
    }

    /// All emitted events, flattened in emission order
    pub fn events(&self) -> Vec<ChangeEvent> {
        self.batches
            .lock()
            .unwrap()
            .iter()
            .flat_map(|(_, events)| events.iter().cloned())
            .collect()
    }

    /// Emitted events rendered as `name(id)`, handy for assertions
    pub fn event_names(&self) -> Vec<String> {
        self.events()
            .iter()
            .map(|e| format!("{}({})", e.name(), e.item().id))
            .collect()
    }

    /// Number of events per event name
    pub fn counts(&self) -> HashMap<&'static str, usize> {
        let mut counts = HashMap::new();
        for event in self.events() {
            *counts.entry(event.name()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait::async_trait]
impl IEventEmitter for RecordingEmitter {
    async fn emit(&self, scope_id: &ScopeId, events: &[ChangeEvent]) -> anyhow::Result<()> {
        let delay = *self.delay.lock().unwrap();
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        let pending = self.failures.load(Ordering::SeqCst);
        if pending > 0 {
            self.failures.store(pending - 1, Ordering::SeqCst);
            anyhow::bail!("simulated delivery failure");
        }
        self.batches
            .lock()
            .unwrap()
            .push((scope_id.clone(), events.to_vec()));
        Ok(())
    }
}
