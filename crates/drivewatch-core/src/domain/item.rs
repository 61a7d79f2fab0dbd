//! Item entity - last-known metadata of a remote file or folder

use serde::{Deserialize, Serialize};

use super::newtypes::{ItemId, Revision};

/// Whether an item is a file or a folder
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ItemKind {
    File,
    Folder,
}

impl ItemKind {
    /// Stable lowercase name used in storage and logs
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::File => "file",
            ItemKind::Folder => "folder",
        }
    }
}

impl std::fmt::Display for ItemKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of a remote file or folder
///
/// `parent_id` is `None` for items directly under the root. `revision` is
/// an opaque equality-only marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Item {
    pub id: ItemId,
    pub kind: ItemKind,
    pub parent_id: Option<ItemId>,
    pub name: String,
    pub revision: Revision,
    #[serde(default)]
    pub trashed: bool,
}

impl Item {
    /// Creates a non-trashed file snapshot
    pub fn file(
        id: ItemId,
        parent_id: Option<ItemId>,
        name: impl Into<String>,
        revision: Revision,
    ) -> Self {
        Self {
            id,
            kind: ItemKind::File,
            parent_id,
            name: name.into(),
            revision,
            trashed: false,
        }
    }

    /// Creates a non-trashed folder snapshot
    pub fn folder(
        id: ItemId,
        parent_id: Option<ItemId>,
        name: impl Into<String>,
        revision: Revision,
    ) -> Self {
        Self {
            id,
            kind: ItemKind::Folder,
            parent_id,
            name: name.into(),
            revision,
            trashed: false,
        }
    }

    /// Returns a copy with the trashed flag set
    #[must_use]
    pub fn into_trashed(mut self) -> Self {
        self.trashed = true;
        self
    }

    pub fn is_folder(&self) -> bool {
        self.kind == ItemKind::Folder
    }

    /// True if any tracked metadata field differs from `other`
    ///
    /// Compares name, parent linkage, revision, and the trashed flag.
    /// Kind changes are handled separately by the diff planner.
    pub fn metadata_differs(&self, other: &Item) -> bool {
        self.name != other.name
            || self.parent_id != other.parent_id
            || self.revision != other.revision
            || self.trashed != other.trashed
    }
}
