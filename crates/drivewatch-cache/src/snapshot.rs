//! SQLite implementation of ISnapshotCache
//!
//! ## Type Mapping
//!
//! | Domain Type     | SQL Type | Strategy                                   |
//! |-----------------|----------|--------------------------------------------|
//! | ItemId          | TEXT     | `.as_str()` / `ItemId::new()`              |
//! | ItemKind        | TEXT     | `"file"` / `"folder"`                      |
//! | parent_id       | TEXT     | NULL for items directly under the root     |
//! | Revision        | TEXT     | opaque string                              |
//! | trashed         | INTEGER  | 0 / 1                                      |

use chrono::Utc;
use sqlx::sqlite::{SqliteArguments, SqliteRow};
use sqlx::{query::Query, Row, Sqlite, SqlitePool};

use drivewatch_core::domain::{CacheBatch, Item, ItemId, ItemKind, Revision};
use drivewatch_core::ports::{CacheCounts, ISnapshotCache};

use crate::CacheError;

/// SQLite-based snapshot cache
///
/// Every write is committed before the call returns; `apply_batch` runs
/// inside a single transaction.
#[derive(Clone)]
pub struct SqliteSnapshotCache {
    pool: SqlitePool,
}

impl SqliteSnapshotCache {
    /// Creates a new cache instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

// ============================================================================
// Row mapping
// ============================================================================

fn kind_from_str(s: &str) -> Result<ItemKind, CacheError> {
    match s {
        "file" => Ok(ItemKind::File),
        "folder" => Ok(ItemKind::Folder),
        other => Err(CacheError::CorruptRow(format!("Unknown item kind: {other}"))),
    }
}

fn item_from_row(row: &SqliteRow) -> Result<Item, CacheError> {
    let id: String = row.try_get("id")?;
    let kind: String = row.try_get("kind")?;
    let parent_id: Option<String> = row.try_get("parent_id")?;
    let name: String = row.try_get("name")?;
    let revision: String = row.try_get("revision")?;
    let trashed: bool = row.try_get("trashed")?;

    Ok(Item {
        id: ItemId::new(id)?,
        kind: kind_from_str(&kind)?,
        parent_id: parent_id.map(ItemId::new).transpose()?,
        name,
        revision: Revision::new(revision),
        trashed,
    })
}

fn upsert_item<'q>(
    item: &'q Item,
    updated_at: &'q str,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    sqlx::query(
        "INSERT OR REPLACE INTO snapshot_items \
         (id, kind, parent_id, name, revision, trashed, updated_at) \
         VALUES (?, ?, ?, ?, ?, ?, ?)",
    )
    .bind(item.id.as_str())
    .bind(item.kind.as_str())
    .bind(item.parent_id.as_ref().map(ItemId::as_str))
    .bind(item.name.as_str())
    .bind(item.revision.as_str())
    .bind(item.trashed)
    .bind(updated_at)
}

fn delete_item(id: &ItemId) -> Query<'_, Sqlite, SqliteArguments<'_>> {
    sqlx::query("DELETE FROM snapshot_items WHERE id = ?").bind(id.as_str())
}

// ============================================================================
// ISnapshotCache implementation
// ============================================================================

#[async_trait::async_trait]
impl ISnapshotCache for SqliteSnapshotCache {
    async fn get(&self, id: &ItemId) -> anyhow::Result<Option<Item>> {
        let row = sqlx::query("SELECT * FROM snapshot_items WHERE id = ?")
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(item_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, item: &Item) -> anyhow::Result<()> {
        let now = Utc::now().to_rfc3339();
        upsert_item(item, &now).execute(&self.pool).await?;
        tracing::trace!(item_id = %item.id, "Saved snapshot item");
        Ok(())
    }

    async fn remove(&self, id: &ItemId) -> anyhow::Result<()> {
        delete_item(id).execute(&self.pool).await?;
        tracing::trace!(item_id = %id, "Removed snapshot item");
        Ok(())
    }

    async fn list_children(&self, parent_id: Option<&ItemId>) -> anyhow::Result<Vec<Item>> {
        // `IS` matches NULL as well as equal values
        let rows = sqlx::query("SELECT * FROM snapshot_items WHERE parent_id IS ? ORDER BY id")
            .bind(parent_id.map(ItemId::as_str))
            .fetch_all(&self.pool)
            .await?;

        rows.iter()
            .map(|row| item_from_row(row).map_err(Into::into))
            .collect()
    }

    async fn apply_batch(&self, batch: &CacheBatch) -> anyhow::Result<()> {
        if batch.is_empty() {
            return Ok(());
        }

        let now = Utc::now().to_rfc3339();
        let mut tx = self.pool.begin().await?;

        for id in &batch.removes {
            delete_item(id).execute(&mut *tx).await?;
        }
        for item in &batch.puts {
            upsert_item(item, &now).execute(&mut *tx).await?;
        }

        tx.commit().await?;

        tracing::debug!(
            puts = batch.puts.len(),
            removes = batch.removes.len(),
            "Committed snapshot batch"
        );
        Ok(())
    }

    async fn counts(&self) -> anyhow::Result<CacheCounts> {
        let rows = sqlx::query("SELECT kind, COUNT(*) AS count FROM snapshot_items GROUP BY kind")
            .fetch_all(&self.pool)
            .await?;

        let mut counts = CacheCounts::default();
        for row in &rows {
            let kind: String = row.try_get("kind")?;
            let count: i64 = row.try_get("count")?;
            match kind_from_str(&kind)? {
                ItemKind::File => counts.files = count as u64,
                ItemKind::Folder => counts.folders = count as u64,
            }
        }
        Ok(counts)
    }
}
