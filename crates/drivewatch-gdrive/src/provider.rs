//! DriveProvider - remote-store port adapter for Google Drive
//!
//! Implements [`IRemoteStore`] and [`IChannelApi`] on top of the
//! [`listing`](crate::listing) and [`channels`](crate::channels) modules.
//!
//! ## Design Notes
//!
//! - Listing the root scope queries Drive's `root` alias; listing any other
//!   scope queries the folder id. The listed folder becomes each child's
//!   parent, so children of the root get `parent_id = None`.
//! - `get_item` needs the drive root's real id to normalize parents. It is
//!   fetched on first use and cached for the lifetime of the provider.

use drivewatch_core::domain::{
    ChannelDescriptor, ChannelRequest, Item, ItemId, RemoteError, ScopeId,
};
use drivewatch_core::ports::{IChannelApi, IRemoteStore, ItemPage};
use tokio::sync::OnceCell;
use tracing::debug;

use crate::client::DriveClient;
use crate::listing::{self, ROOT_ALIAS};
use crate::{channels, DriveError};

/// Largest page size `files.list` accepts
pub const MAX_PAGE_SIZE: u32 = 1000;

/// Remote store implementation backed by the Drive v3 API
pub struct DriveProvider {
    client: DriveClient,
    page_size: u32,
    root_id: OnceCell<String>,
}

impl DriveProvider {
    /// Creates a provider listing [`MAX_PAGE_SIZE`] items per page
    pub fn new(client: DriveClient) -> Self {
        Self {
            client,
            page_size: MAX_PAGE_SIZE,
            root_id: OnceCell::new(),
        }
    }

    /// Sets the listing page size, clamped to `1..=1000`
    pub fn with_page_size(mut self, page_size: u32) -> Self {
        self.page_size = page_size.clamp(1, MAX_PAGE_SIZE);
        self
    }

    pub fn client(&self) -> &DriveClient {
        &self.client
    }

    /// Drive file id used for a scope in API paths and queries
    fn file_id(scope: &ScopeId) -> &str {
        if scope.is_root() {
            ROOT_ALIAS
        } else {
            scope.as_str()
        }
    }

    async fn root_id(&self) -> Result<&str, DriveError> {
        let id = self
            .root_id
            .get_or_try_init(|| async {
                let root = listing::get_file(&self.client, ROOT_ALIAS).await?;
                debug!(root_id = %root.id, "Resolved drive root id");
                Ok::<_, DriveError>(root.id)
            })
            .await?;
        Ok(id.as_str())
    }
}

#[async_trait::async_trait]
impl IRemoteStore for DriveProvider {
    async fn list_children(
        &self,
        scope: &ScopeId,
        page_token: Option<&str>,
    ) -> Result<ItemPage, RemoteError> {
        let page = listing::list_children(
            &self.client,
            Self::file_id(scope),
            page_token,
            self.page_size,
        )
        .await?;

        let parent = scope.as_item_id();
        let items = page
            .files
            .into_iter()
            .map(|file| file.into_item(parent.clone()))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(ItemPage {
            items,
            next_page_token: page.next_page_token.filter(|t| !t.is_empty()),
        })
    }

    async fn get_item(&self, id: &ItemId) -> Result<Item, RemoteError> {
        let root_id = self.root_id().await?;
        let file = listing::get_file(&self.client, id.as_str()).await?;
        Ok(file.into_item_under_root(root_id)?)
    }
}

#[async_trait::async_trait]
impl IChannelApi for DriveProvider {
    async fn create_channel(
        &self,
        request: &ChannelRequest,
    ) -> Result<ChannelDescriptor, RemoteError> {
        Ok(channels::watch(&self.client, Self::file_id(&request.scope_id), request).await?)
    }

    async fn stop_channel(&self, descriptor: &ChannelDescriptor) -> Result<(), RemoteError> {
        Ok(channels::stop(&self.client, descriptor).await?)
    }
}
