//! Semantic change events handed to the event emitter

use serde::{Deserialize, Serialize};

use super::item::{Item, ItemKind};
use super::newtypes::ItemId;

/// Why an item was reported deleted
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum DeletionCause {
    /// The item itself disappeared or was trashed
    Direct,
    /// The item was removed because a containing folder was deleted
    #[serde(rename_all = "camelCase")]
    Ancestor { ancestor_id: ItemId },
}

/// A change observed by reconciliation
///
/// Created and updated events carry the item's final known metadata;
/// deletions carry the last-known metadata from the snapshot cache.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ChangeEvent {
    FileCreated { item: Item },
    FileUpdated { item: Item, previous: Item },
    FileDeleted { item: Item, cause: DeletionCause },
    FolderCreated { item: Item },
    FolderUpdated { item: Item, previous: Item },
    FolderDeleted { item: Item, cause: DeletionCause },
}

impl ChangeEvent {
    /// Created event matching the item's kind
    pub fn created(item: Item) -> Self {
        match item.kind {
            ItemKind::File => Self::FileCreated { item },
            ItemKind::Folder => Self::FolderCreated { item },
        }
    }

    /// Updated event matching the item's kind
    pub fn updated(item: Item, previous: Item) -> Self {
        match item.kind {
            ItemKind::File => Self::FileUpdated { item, previous },
            ItemKind::Folder => Self::FolderUpdated { item, previous },
        }
    }

    /// Deleted event matching the item's kind
    pub fn deleted(item: Item, cause: DeletionCause) -> Self {
        match item.kind {
            ItemKind::File => Self::FileDeleted { item, cause },
            ItemKind::Folder => Self::FolderDeleted { item, cause },
        }
    }

    /// The affected item
    pub fn item(&self) -> &Item {
        match self {
            Self::FileCreated { item }
            | Self::FileUpdated { item, .. }
            | Self::FileDeleted { item, .. }
            | Self::FolderCreated { item }
            | Self::FolderUpdated { item, .. }
            | Self::FolderDeleted { item, .. } => item,
        }
    }

    /// Wire name of the event type
    pub fn name(&self) -> &'static str {
        match self {
            Self::FileCreated { .. } => "fileCreated",
            Self::FileUpdated { .. } => "fileUpdated",
            Self::FileDeleted { .. } => "fileDeleted",
            Self::FolderCreated { .. } => "folderCreated",
            Self::FolderUpdated { .. } => "folderUpdated",
            Self::FolderDeleted { .. } => "folderDeleted",
        }
    }

    pub fn is_deletion(&self) -> bool {
        matches!(self, Self::FileDeleted { .. } | Self::FolderDeleted { .. })
    }

    /// True for folder deletions caused by an ancestor's deletion
    pub fn is_recursive_folder_deletion(&self) -> bool {
        matches!(
            self,
            Self::FolderDeleted {
                cause: DeletionCause::Ancestor { .. },
                ..
            }
        )
    }
}
