//! Snapshot cache port (driven/secondary port)
//!
//! ## Design Notes
//!
//! - Uses `anyhow::Result` because storage errors are adapter-specific
//!   and any failure is fatal to the enclosing operation.
//! - Every mutation is durable once the call returns.
//! - `apply_batch` commits a whole reconciliation pass atomically: either
//!   every put and remove is applied or none is.

use crate::domain::{CacheBatch, Item, ItemId};

/// Number of cached items per kind
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheCounts {
    pub files: u64,
    pub folders: u64,
}

/// Port trait for the durable item snapshot store
#[async_trait::async_trait]
pub trait ISnapshotCache: Send + Sync {
    /// Last known snapshot of an item, if it was ever seen
    async fn get(&self, id: &ItemId) -> anyhow::Result<Option<Item>>;

    /// Inserts or replaces an item
    async fn put(&self, item: &Item) -> anyhow::Result<()>;

    /// Forgets an item; removing an unknown id is not an error
    async fn remove(&self, id: &ItemId) -> anyhow::Result<()>;

    /// Cached items whose parent is `parent_id` (`None` for the root)
    async fn list_children(&self, parent_id: Option<&ItemId>) -> anyhow::Result<Vec<Item>>;

    /// Applies all puts and removes of a batch in one transaction
    async fn apply_batch(&self, batch: &CacheBatch) -> anyhow::Result<()>;

    /// Number of cached files and folders
    async fn counts(&self) -> anyhow::Result<CacheCounts>;
}
