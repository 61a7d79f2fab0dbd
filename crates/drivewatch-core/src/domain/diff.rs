//! Snapshot diffing
//!
//! Pure planning step of reconciliation: given the remote listing of one
//! scope and the relevant slice of the snapshot cache, compute the ordered
//! change events and the cache mutations that make the cache match the
//! remote store. Nothing here performs I/O; the caller commits the
//! resulting [`CacheBatch`] atomically.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use super::event::{ChangeEvent, DeletionCause};
use super::item::Item;
use super::newtypes::{ItemId, ScopeId};

// ============================================================================
// SnapshotIndex
// ============================================================================

/// In-memory view of cached items with a parent -> children index
///
/// Children are kept in id order so that planning is deterministic.
#[derive(Debug, Default, Clone)]
pub struct SnapshotIndex {
    items: HashMap<ItemId, Item>,
    children: HashMap<Option<ItemId>, BTreeSet<ItemId>>,
}

impl SnapshotIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts or replaces an item, keeping the children index in step
    pub fn insert(&mut self, item: Item) {
        if let Some(previous) = self.items.get(&item.id) {
            if previous.parent_id != item.parent_id {
                if let Some(siblings) = self.children.get_mut(&previous.parent_id) {
                    siblings.remove(&item.id);
                }
            }
        }
        self.children
            .entry(item.parent_id.clone())
            .or_default()
            .insert(item.id.clone());
        self.items.insert(item.id.clone(), item);
    }

    pub fn get(&self, id: &ItemId) -> Option<&Item> {
        self.items.get(id)
    }

    pub fn contains(&self, id: &ItemId) -> bool {
        self.items.contains_key(id)
    }

    /// Cached children of `parent` (`None` is the root), in id order
    pub fn children_of(&self, parent: Option<&ItemId>) -> Vec<&Item> {
        self.children
            .get(&parent.cloned())
            .map(|ids| ids.iter().filter_map(|id| self.items.get(id)).collect())
            .unwrap_or_default()
    }

    /// All cached descendants of `id`, deepest first (post-order)
    ///
    /// Traversal does not descend into items for which `keep` returns true;
    /// those items and everything beneath them are left out.
    pub fn descendants_post_order<F>(&self, id: &ItemId, keep: F) -> Vec<&Item>
    where
        F: Fn(&ItemId) -> bool,
    {
        let mut out = Vec::new();
        let mut visited = HashSet::new();
        visited.insert(id.clone());
        self.collect_post_order(id, &keep, &mut visited, &mut out);
        out
    }

    fn collect_post_order<'a, F>(
        &'a self,
        id: &ItemId,
        keep: &F,
        visited: &mut HashSet<ItemId>,
        out: &mut Vec<&'a Item>,
    ) where
        F: Fn(&ItemId) -> bool,
    {
        for child in self.children_of(Some(id)) {
            if keep(&child.id) || !visited.insert(child.id.clone()) {
                continue;
            }
            self.collect_post_order(&child.id, keep, visited, out);
            out.push(child);
        }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

impl FromIterator<Item> for SnapshotIndex {
    fn from_iter<T: IntoIterator<Item = Item>>(iter: T) -> Self {
        let mut index = Self::new();
        for item in iter {
            index.insert(item);
        }
        index
    }
}

// ============================================================================
// Remote listing
// ============================================================================

/// What the remote store currently says about the scope folder itself
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScopeState {
    /// The root sentinel, which always exists
    Root,
    /// A live folder; children were listed
    Present(Item),
    /// The scope folder is gone or trashed; nothing was listed
    Gone,
}

/// Fully drained remote listing of a single scope
#[derive(Debug, Clone)]
pub struct ScopeListing {
    pub scope: ScopeState,
    pub children: Vec<Item>,
}

impl ScopeListing {
    pub fn root(children: Vec<Item>) -> Self {
        Self {
            scope: ScopeState::Root,
            children,
        }
    }

    pub fn present(scope: Item, children: Vec<Item>) -> Self {
        Self {
            scope: ScopeState::Present(scope),
            children,
        }
    }

    pub fn gone() -> Self {
        Self {
            scope: ScopeState::Gone,
            children: Vec::new(),
        }
    }
}

// ============================================================================
// Plan
// ============================================================================

/// Cache mutations produced by one reconciliation pass
///
/// Removes are applied before puts, so an id may appear in both when an
/// item is replaced (kind change).
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct CacheBatch {
    pub puts: Vec<Item>,
    pub removes: Vec<ItemId>,
}

impl CacheBatch {
    pub fn is_empty(&self) -> bool {
        self.puts.is_empty() && self.removes.is_empty()
    }
}

/// Ordered events plus the cache batch that must be committed with them
#[derive(Debug, Default, Clone)]
pub struct ReconcilePlan {
    pub events: Vec<ChangeEvent>,
    pub batch: CacheBatch,
}

impl ReconcilePlan {
    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.batch.is_empty()
    }
}

#[derive(Default)]
struct PlanBuilder {
    deletions: Vec<ChangeEvent>,
    upserts: Vec<ChangeEvent>,
    tail: Vec<ChangeEvent>,
    batch: CacheBatch,
    removed: HashSet<ItemId>,
}

impl PlanBuilder {
    fn put(&mut self, item: &Item) {
        self.batch.puts.push(item.clone());
    }

    fn created(&mut self, item: &Item) {
        self.upserts.push(ChangeEvent::created(item.clone()));
        self.put(item);
    }

    fn updated(&mut self, item: &Item, previous: &Item) {
        self.upserts
            .push(ChangeEvent::updated(item.clone(), previous.clone()));
        self.put(item);
    }

    fn remove(&mut self, item: &Item, cause: DeletionCause, into_tail: bool) {
        if !self.removed.insert(item.id.clone()) {
            return;
        }
        let event = ChangeEvent::deleted(item.clone(), cause);
        if into_tail {
            self.tail.push(event);
        } else {
            self.deletions.push(event);
        }
        self.batch.removes.push(item.id.clone());
    }

    fn finish(self) -> ReconcilePlan {
        let mut events = self.deletions;
        events.extend(self.upserts);
        events.extend(self.tail);
        ReconcilePlan {
            events,
            batch: self.batch,
        }
    }
}

/// Deletes `top` and every cached descendant not in `alive`
///
/// Descendants are emitted deepest first with an ancestor cause, then
/// `top` itself with a direct cause.
fn delete_subtree(
    builder: &mut PlanBuilder,
    cache: &SnapshotIndex,
    top: &Item,
    alive: &HashSet<ItemId>,
    into_tail: bool,
) {
    for descendant in cache.descendants_post_order(&top.id, |id| alive.contains(id)) {
        builder.remove(
            descendant,
            DeletionCause::Ancestor {
                ancestor_id: top.id.clone(),
            },
            into_tail,
        );
    }
    builder.remove(top, DeletionCause::Direct, into_tail);
}

/// Computes the events and cache mutations for one scope
///
/// `cache` must hold the cached scope item (if any), its complete cached
/// subtree, and the cached entries of every id in `listing`. Event order:
/// deletions (each subtree children-before-parent), then creations and
/// updates (a first-seen scope precedes its children), then the scope's
/// own update or deletion.
pub fn plan_reconciliation(
    scope: &ScopeId,
    listing: &ScopeListing,
    cache: &SnapshotIndex,
) -> ReconcilePlan {
    let mut builder = PlanBuilder::default();

    let scope_item_id = scope.as_item_id();

    let scope_item = match &listing.scope {
        ScopeState::Root => None,
        ScopeState::Present(item) => Some(item),
        ScopeState::Gone => {
            let nothing_alive = HashSet::new();
            match scope_item_id.as_ref().and_then(|id| cache.get(id)) {
                Some(cached_scope) => {
                    delete_subtree(&mut builder, cache, cached_scope, &nothing_alive, true);
                }
                None => {
                    // Never saw the scope folder itself; drop whatever was
                    // cached beneath it.
                    if let Some(scope_id) = scope_item_id.as_ref() {
                        for item in cache.descendants_post_order(scope_id, |_| false) {
                            builder.remove(
                                item,
                                DeletionCause::Ancestor {
                                    ancestor_id: scope_id.clone(),
                                },
                                true,
                            );
                        }
                    }
                }
            }
            return builder.finish();
        }
    };

    if let Some(remote_scope) = scope_item {
        match cache.get(&remote_scope.id) {
            None => builder.created(remote_scope),
            Some(cached) if cached.kind != remote_scope.kind => {
                delete_subtree(&mut builder, cache, cached, &HashSet::new(), false);
                builder.created(remote_scope);
            }
            Some(cached) if remote_scope.metadata_differs(cached) => {
                builder
                    .tail
                    .push(ChangeEvent::updated(remote_scope.clone(), cached.clone()));
                builder.put(remote_scope);
            }
            Some(_) => {}
        }
    }

    // Last entry wins if the listing repeats an id
    let remote: BTreeMap<&ItemId, &Item> = listing
        .children
        .iter()
        .map(|item| (&item.id, item))
        .collect();
    let alive: HashSet<ItemId> = remote
        .values()
        .filter(|item| !item.trashed)
        .map(|item| item.id.clone())
        .collect();

    let cached_children = cache.children_of(scope_item_id.as_ref());
    let cached_child_ids: HashSet<&ItemId> = cached_children.iter().map(|c| &c.id).collect();

    for cached in &cached_children {
        match remote.get(&cached.id) {
            None => delete_subtree(&mut builder, cache, cached, &alive, false),
            Some(current) if current.trashed => {
                delete_subtree(&mut builder, cache, cached, &alive, false);
            }
            Some(current) if current.kind != cached.kind => {
                delete_subtree(&mut builder, cache, cached, &alive, false);
                builder.created(current);
            }
            Some(current) if current.metadata_differs(cached) => {
                builder.updated(current, cached);
            }
            Some(_) => {}
        }
    }

    for current in remote.values() {
        if cached_child_ids.contains(&current.id) {
            continue;
        }
        match cache.get(&current.id) {
            // Moved in from elsewhere in the cached tree
            Some(previous) if current.trashed => {
                delete_subtree(&mut builder, cache, previous, &alive, false);
            }
            Some(previous) if previous.kind != current.kind => {
                delete_subtree(&mut builder, cache, previous, &alive, false);
                builder.created(current);
            }
            Some(previous) => {
                if current.metadata_differs(previous) {
                    builder.updated(current, previous);
                }
            }
            None if current.trashed => {}
            None => builder.created(current),
        }
    }

    builder.finish()
}
