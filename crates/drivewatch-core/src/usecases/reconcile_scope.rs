//! Scope reconciliation use case
//!
//! Lists the current remote state of one scope, diffs it against the
//! snapshot cache, hands the resulting events to the emitter, and only
//! then commits the cache batch. A pass that fails anywhere before the
//! commit leaves the cache exactly as it was, so the next pass re-diffs
//! from the same baseline.
//!
//! Scopes overlap: root contains every folder, and a watched folder may
//! sit inside another one. Listings run concurrently, but the section
//! from loading the cached snapshot to committing the batch holds one
//! commit gate per use case, so no two passes plan against the same
//! uncommitted baseline. Callers still serialize passes per scope to
//! avoid redundant listings.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{
    domain::{
        plan_reconciliation, ChangeEvent, Item, ItemId, RemoteError, ScopeId, ScopeListing,
        ScopeState, SnapshotIndex,
    },
    ports::{IEventEmitter, IRemoteStore, ISnapshotCache},
};

/// Failure of a reconciliation pass; nothing was committed
#[derive(Debug, Error)]
pub enum ReconcileError {
    /// Listing the remote store failed
    #[error("Remote store error: {0}")]
    Remote(#[from] RemoteError),

    /// Reading or committing the snapshot cache failed
    #[error("Snapshot cache error: {0:#}")]
    Storage(#[source] anyhow::Error),

    /// The emitter did not accept the event batch
    #[error("Event emission failed: {0:#}")]
    Emit(#[source] anyhow::Error),
}

impl ReconcileError {
    /// True if simply re-running the pass later may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_transient(),
            Self::Emit(_) => true,
            Self::Storage(_) => false,
        }
    }

    /// Short label used for metrics and logs
    pub fn status(&self) -> &'static str {
        match self {
            Self::Remote(RemoteError::AuthExpired) => "auth_expired",
            Self::Remote(_) => "remote_error",
            Self::Storage(_) => "storage_error",
            Self::Emit(_) => "emit_error",
        }
    }
}

/// Result of a committed reconciliation pass
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileOutcome {
    pub scope_id: ScopeId,
    /// Events in emission order
    pub events: Vec<ChangeEvent>,
    /// The scope folder itself no longer exists remotely
    pub scope_gone: bool,
}

impl ReconcileOutcome {
    /// Folders first seen in this pass
    pub fn created_folders(&self) -> Vec<ItemId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ChangeEvent::FolderCreated { item } => Some(item.id.clone()),
                _ => None,
            })
            .collect()
    }

    /// Folders removed in this pass, directly or through an ancestor
    pub fn deleted_folders(&self) -> Vec<ItemId> {
        self.events
            .iter()
            .filter_map(|event| match event {
                ChangeEvent::FolderDeleted { item, .. } => Some(item.id.clone()),
                _ => None,
            })
            .collect()
    }
}

/// Use case that reconciles a single scope
pub struct ReconcileScopeUseCase {
    remote: Arc<dyn IRemoteStore>,
    cache: Arc<dyn ISnapshotCache>,
    emitter: Arc<dyn IEventEmitter>,
    /// Held from snapshot load to batch commit
    commit_gate: Mutex<()>,
}

impl ReconcileScopeUseCase {
    /// Creates a new ReconcileScopeUseCase
    ///
    /// # Arguments
    ///
    /// * `remote` - Listing API of the remote store
    /// * `cache` - Durable snapshot cache
    /// * `emitter` - Receiver of the ordered event batches
    pub fn new(
        remote: Arc<dyn IRemoteStore>,
        cache: Arc<dyn ISnapshotCache>,
        emitter: Arc<dyn IEventEmitter>,
    ) -> Self {
        Self {
            remote,
            cache,
            emitter,
            commit_gate: Mutex::new(()),
        }
    }

    /// Runs one reconciliation pass for `scope`
    ///
    /// This method:
    /// 1. Fetches the scope folder and drains every page of its listing
    /// 2. Under the commit gate, loads the cached subtree of the scope
    ///    into a [`SnapshotIndex`]
    /// 3. Plans the events and cache batch
    /// 4. Emits the events, then commits the batch in one transaction
    ///
    /// # Errors
    ///
    /// Any error leaves the cache untouched; see [`ReconcileError`]
    pub async fn execute(&self, scope: &ScopeId) -> Result<ReconcileOutcome, ReconcileError> {
        let listing = self.fetch_listing(scope).await?;
        let scope_gone = listing.scope == ScopeState::Gone;

        let _gate = self.commit_gate.lock().await;
        let index = self
            .load_snapshot(scope, &listing)
            .await
            .map_err(ReconcileError::Storage)?;

        let plan = plan_reconciliation(scope, &listing, &index);

        if !plan.events.is_empty() {
            self.emitter
                .emit(scope, &plan.events)
                .await
                .map_err(ReconcileError::Emit)?;
        }

        if !plan.batch.is_empty() {
            self.cache
                .apply_batch(&plan.batch)
                .await
                .map_err(ReconcileError::Storage)?;
        }

        if plan.events.is_empty() {
            debug!(scope = %scope, listed = listing.children.len(), "Scope unchanged");
        } else {
            info!(
                scope = %scope,
                events = plan.events.len(),
                puts = plan.batch.puts.len(),
                removes = plan.batch.removes.len(),
                "Scope reconciled"
            );
        }

        Ok(ReconcileOutcome {
            scope_id: scope.clone(),
            events: plan.events,
            scope_gone,
        })
    }

    /// Fetches the scope folder and every page of its children
    async fn fetch_listing(&self, scope: &ScopeId) -> Result<ScopeListing, RemoteError> {
        let scope_item = match scope.as_item_id() {
            None => None,
            Some(id) => match self.remote.get_item(&id).await {
                Ok(item) if item.trashed => return Ok(ScopeListing::gone()),
                Ok(item) => Some(item),
                Err(RemoteError::NotFound(_)) => return Ok(ScopeListing::gone()),
                Err(e) => return Err(e),
            },
        };

        let mut children: Vec<Item> = Vec::new();
        let mut page_token: Option<String> = None;
        loop {
            let page = match self.remote.list_children(scope, page_token.as_deref()).await {
                Ok(page) => page,
                // Deleted between the lookup and the listing
                Err(RemoteError::NotFound(_)) if scope_item.is_some() => {
                    return Ok(ScopeListing::gone());
                }
                Err(e) => return Err(e),
            };
            children.extend(page.items);

            match page.next_page_token {
                Some(next) if page_token.as_deref() == Some(next.as_str()) => {
                    return Err(RemoteError::InvalidResponse(format!(
                        "listing of {scope} repeated page token"
                    )));
                }
                Some(next) => page_token = Some(next),
                None => break,
            }
        }

        Ok(match scope_item {
            Some(item) => ScopeListing::present(item, children),
            None => ScopeListing::root(children),
        })
    }

    /// Loads the cached scope item, its whole cached subtree, and the
    /// cached entries (with subtrees) of every listed item
    async fn load_snapshot(
        &self,
        scope: &ScopeId,
        listing: &ScopeListing,
    ) -> anyhow::Result<SnapshotIndex> {
        let mut index = SnapshotIndex::new();
        let mut queue: VecDeque<Option<ItemId>> = VecDeque::new();

        match scope.as_item_id() {
            Some(scope_id) => {
                if let Some(item) = self.cache.get(&scope_id).await? {
                    index.insert(item);
                }
                queue.push_back(Some(scope_id));
            }
            None => queue.push_back(None),
        }

        for listed in &listing.children {
            if index.contains(&listed.id) {
                continue;
            }
            if let Some(cached) = self.cache.get(&listed.id).await? {
                if cached.is_folder() {
                    queue.push_back(Some(cached.id.clone()));
                }
                index.insert(cached);
            }
        }

        let mut expanded = HashSet::new();
        while let Some(parent) = queue.pop_front() {
            if !expanded.insert(parent.clone()) {
                continue;
            }
            for child in self.cache.list_children(parent.as_ref()).await? {
                if child.is_folder() {
                    queue.push_back(Some(child.id.clone()));
                }
                index.insert(child);
            }
        }

        Ok(index)
    }
}
