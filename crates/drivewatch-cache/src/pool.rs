//! State database handle
//!
//! One SQLite file holds both the snapshot cache and the channel registry.
//! The schema is stamped with `PRAGMA user_version`; opening a file written
//! by a newer drivewatch fails instead of guessing at its layout.

use std::path::Path;
use std::time::Duration;

use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous,
};

use crate::CacheError;

/// Schema revision written to `user_version`
pub const SCHEMA_VERSION: i64 = 1;

/// Readers run alongside the single reconcile writer
const FILE_CONNECTIONS: u32 = 5;

/// Concurrent reconcile commits queue on the write lock this long
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// Pooled connections to the drivewatch state database
///
/// File databases use WAL with `synchronous = FULL`: a committed
/// reconciliation batch is durable once `commit_batch` returns.
pub struct DatabasePool {
    pool: SqlitePool,
}

impl DatabasePool {
    /// Opens (or creates) the state database at `db_path`
    ///
    /// Missing parent directories are created.
    ///
    /// # Errors
    ///
    /// `ConnectionFailed` if the directory or file cannot be opened,
    /// `MigrationFailed` if the schema cannot be applied or is newer than
    /// [`SCHEMA_VERSION`].
    pub async fn new(db_path: &Path) -> Result<Self, CacheError> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot create {}: {e}", parent.display()))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(db_path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Full)
            .busy_timeout(BUSY_TIMEOUT);

        let pool = SqlitePoolOptions::new()
            .max_connections(FILE_CONNECTIONS)
            .connect_with(options)
            .await
            .map_err(|e| {
                CacheError::ConnectionFailed(format!("Cannot open {}: {e}", db_path.display()))
            })?;

        migrate(&pool).await?;
        tracing::info!(path = %db_path.display(), "State database opened");
        Ok(Self { pool })
    }

    /// Private database living as long as the pool
    ///
    /// An in-memory SQLite database belongs to one connection, so the pool
    /// is capped at one.
    pub async fn in_memory() -> Result<Self, CacheError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .map_err(|e| CacheError::ConnectionFailed(format!("In-memory database: {e}")))?;

        migrate(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Checkpoints the WAL into the main file and closes every connection
    pub async fn close(&self) {
        if let Err(e) = sqlx::raw_sql("PRAGMA wal_checkpoint(TRUNCATE);")
            .execute(&self.pool)
            .await
        {
            tracing::warn!(error = %e, "WAL checkpoint failed on close");
        }
        self.pool.close().await;
        tracing::debug!("State database closed");
    }
}

/// Applies the schema unless the file is already at [`SCHEMA_VERSION`]
async fn migrate(pool: &SqlitePool) -> Result<(), CacheError> {
    let found: i64 = sqlx::query_scalar("PRAGMA user_version;")
        .fetch_one(pool)
        .await
        .map_err(|e| CacheError::MigrationFailed(format!("Cannot read schema version: {e}")))?;

    if found > SCHEMA_VERSION {
        return Err(CacheError::MigrationFailed(format!(
            "schema version {found} is newer than supported version {SCHEMA_VERSION}"
        )));
    }
    if found == SCHEMA_VERSION {
        return Ok(());
    }

    let schema = include_str!("migrations/20261001_initial.sql");
    let stamp = format!("PRAGMA user_version = {SCHEMA_VERSION};");
    let mut tx = pool.begin().await?;
    sqlx::raw_sql(schema)
        .execute(&mut *tx)
        .await
        .map_err(|e| CacheError::MigrationFailed(format!("Initial schema: {e}")))?;
    sqlx::raw_sql(&stamp)
        .execute(&mut *tx)
        .await
        .map_err(|e| CacheError::MigrationFailed(format!("Stamping schema version: {e}")))?;
    tx.commit().await?;

    tracing::debug!(from = found, to = SCHEMA_VERSION, "Schema migrated");
    Ok(())
}
