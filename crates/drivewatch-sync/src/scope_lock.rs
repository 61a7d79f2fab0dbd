//! Per-scope mutual exclusion
//!
//! Reconciliation of one scope must never overlap with another
//! reconciliation of the same scope, while different scopes run in
//! parallel. Locks are created on first use and dropped from the map as
//! soon as nobody holds or waits for them.

use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{Mutex, OwnedMutexGuard};

use drivewatch_core::domain::ScopeId;

/// Keyed async mutex map
#[derive(Default)]
pub struct ScopeLocks {
    locks: DashMap<ScopeId, Arc<Mutex<()>>>,
}

impl ScopeLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Waits for exclusive access to `scope`
    pub async fn lock(&self, scope: &ScopeId) -> ScopeGuard<'_> {
        // Clone out of the map before awaiting so no shard lock is held
        let mutex = Arc::clone(self.locks.entry(scope.clone()).or_default().value());
        let guard = mutex.lock_owned().await;
        ScopeGuard {
            owner: self,
            scope: scope.clone(),
            guard: Some(guard),
        }
    }

    /// Number of scopes with a live lock entry
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

/// Exclusive access to one scope, released on drop
pub struct ScopeGuard<'a> {
    owner: &'a ScopeLocks,
    scope: ScopeId,
    guard: Option<OwnedMutexGuard<()>>,
}

impl ScopeGuard<'_> {
    pub fn scope(&self) -> &ScopeId {
        &self.scope
    }
}

impl Drop for ScopeGuard<'_> {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the map's own reference left: nobody holds or awaits the lock
        self.owner
            .locks
            .remove_if(&self.scope, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
