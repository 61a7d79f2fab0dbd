//! Folder listing and item lookups
//!
//! Wire types for `files.list` and `files.get`, and their conversion into
//! domain [`Item`]s. Listings include trashed items so that trashing shows
//! up as a deletion rather than as silent disappearance.

use drivewatch_core::domain::{Item, ItemId, ItemKind, Revision};
use serde::Deserialize;
use tracing::debug;

use crate::client::DriveClient;
use crate::DriveError;

/// MIME type Drive uses for folders
pub const FOLDER_MIME_TYPE: &str = "application/vnd.google-apps.folder";

/// File fields requested for every item
pub const FILE_FIELDS: &str = "id,name,mimeType,parents,version,trashed";

/// Drive's alias for the user's root folder
pub const ROOT_ALIAS: &str = "root";

// ============================================================================
// Wire types
// ============================================================================

/// `version` is an int64 that Drive encodes as a JSON string
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum VersionField {
    Text(String),
    Number(u64),
}

/// A file resource as returned by `files.get` / `files.list`
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DriveFile {
    pub id: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub mime_type: String,
    #[serde(default)]
    pub parents: Vec<String>,
    version: Option<VersionField>,
    #[serde(default)]
    pub trashed: bool,
}

impl DriveFile {
    pub fn is_folder(&self) -> bool {
        self.mime_type == FOLDER_MIME_TYPE
    }

    /// The revision marker, or an empty string when Drive omitted it
    pub fn version(&self) -> String {
        match &self.version {
            Some(VersionField::Text(v)) => v.clone(),
            Some(VersionField::Number(n)) => n.to_string(),
            None => String::new(),
        }
    }

    /// Converts to a domain item with the given (already normalized) parent
    pub fn into_item(self, parent_id: Option<ItemId>) -> Result<Item, DriveError> {
        let revision = Revision::new(self.version());
        let kind = if self.is_folder() {
            ItemKind::Folder
        } else {
            ItemKind::File
        };
        let id = ItemId::new(self.id)
            .map_err(|e| DriveError::InvalidResponse(e.to_string()))?;

        Ok(Item {
            id,
            kind,
            parent_id,
            name: self.name,
            revision,
            trashed: self.trashed,
        })
    }

    /// Converts to a domain item, mapping the drive root to `None`
    pub fn into_item_under_root(self, root_id: &str) -> Result<Item, DriveError> {
        let parent_id = match self.parents.first() {
            Some(parent) if parent != root_id => Some(
                ItemId::new(parent.clone())
                    .map_err(|e| DriveError::InvalidResponse(e.to_string()))?,
            ),
            _ => None,
        };
        self.into_item(parent_id)
    }
}

/// Response body of `files.list`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileList {
    #[serde(default)]
    pub files: Vec<DriveFile>,
    pub next_page_token: Option<String>,
}

// ============================================================================
// Calls
// ============================================================================

/// Escapes a value for use inside a single-quoted Drive query literal
fn quote(value: &str) -> String {
    value.replace('\\', "\\\\").replace('\'', "\\'")
}

/// Lists one page of the items whose parent is `folder_id`
///
/// `folder_id` may be [`ROOT_ALIAS`].
pub async fn list_children(
    client: &DriveClient,
    folder_id: &str,
    page_token: Option<&str>,
    page_size: u32,
) -> Result<FileList, DriveError> {
    let mut query = vec![
        ("q", format!("'{}' in parents", quote(folder_id))),
        ("fields", format!("nextPageToken,files({FILE_FIELDS})")),
        ("pageSize", page_size.to_string()),
    ];
    if let Some(token) = page_token {
        query.push(("pageToken", token.to_string()));
    }

    let page: FileList = client.get_json("/files", &query).await?;
    debug!(
        folder_id,
        count = page.files.len(),
        has_more = page.next_page_token.is_some(),
        "Listed folder page"
    );
    Ok(page)
}

/// Fetches a single file resource
pub async fn get_file(client: &DriveClient, file_id: &str) -> Result<DriveFile, DriveError> {
    let path = format!("/files/{file_id}");
    client
        .get_json(&path, &[("fields", FILE_FIELDS.to_string())])
        .await
}
