//! Remote store listing port (driven/secondary port)
//!
//! ## Design Notes
//!
//! - Returns the classified [`RemoteError`] so the reconciler can tell
//!   transient failures from a scope that no longer exists.
//! - Implementations normalize parent linkage: children listed under the
//!   root scope carry `parent_id = None`, and so does any item whose
//!   parent is the drive's real root folder.

use crate::domain::{Item, ItemId, RemoteError, ScopeId};

/// One page of a folder listing
#[derive(Debug, Clone, Default)]
pub struct ItemPage {
    /// Items on this page, including trashed ones
    pub items: Vec<Item>,
    /// Token for the next page (`None` on the last page)
    pub next_page_token: Option<String>,
}

/// Port trait for reading the remote hierarchy
#[async_trait::async_trait]
pub trait IRemoteStore: Send + Sync {
    /// Lists one page of the items directly under `scope`
    ///
    /// # Arguments
    /// * `scope` - Folder to list, or the root sentinel
    /// * `page_token` - Continuation token from the previous page
    ///
    /// # Errors
    /// * `RemoteError::NotFound` if the folder does not exist
    /// * `RemoteError::Transient` / `RateLimited` on retryable failures
    async fn list_children(
        &self,
        scope: &ScopeId,
        page_token: Option<&str>,
    ) -> Result<ItemPage, RemoteError>;

    /// Fetches the current metadata of a single item
    ///
    /// # Errors
    /// Returns `RemoteError::NotFound` if the item does not exist
    async fn get_item(&self, id: &ItemId) -> Result<Item, RemoteError>;
}
