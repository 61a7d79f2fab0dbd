//! drivewatch Cache - Durable reconciliation state
//!
//! SQLite-based storage for:
//! - The snapshot cache of last-known item metadata
//! - The channel registry of active push-notification channels
//!
//! ## Architecture
//!
//! This crate implements the `ISnapshotCache` and `IChannelRegistry` ports
//! from `drivewatch-core` using SQLite as the storage backend. It is a
//! driven (secondary) adapter in the hexagonal architecture.
//!
//! ## Key Components
//!
//! - [`DatabasePool`] - Connection pool with migration support
//! - [`SqliteSnapshotCache`] - `ISnapshotCache` implementation
//! - [`SqliteChannelRegistry`] - `IChannelRegistry` implementation
//! - [`CacheError`] - Error types for cache operations
//!
//! ## Usage
//!
//! ```no_run
//! use std::path::Path;
//! use drivewatch_cache::{DatabasePool, SqliteChannelRegistry, SqliteSnapshotCache};
//!
//! # async fn example() -> anyhow::Result<()> {
//! let pool = DatabasePool::new(Path::new("/home/user/.local/share/drivewatch/state.db")).await?;
//! let cache = SqliteSnapshotCache::new(pool.pool().clone());
//! let registry = SqliteChannelRegistry::new(pool.pool().clone());
//! // ...
//! pool.close().await;
//! # Ok(())
//! # }
//! ```

pub mod channels;
pub mod pool;
pub mod snapshot;

pub use channels::SqliteChannelRegistry;
pub use pool::DatabasePool;
pub use snapshot::SqliteSnapshotCache;

/// Errors that can occur during cache operations
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// Failed to establish a database connection
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// A database query failed
    #[error("Query failed: {0}")]
    QueryFailed(String),

    /// Schema migration failed
    #[error("Migration failed: {0}")]
    MigrationFailed(String),

    /// A stored row could not be turned back into a domain value
    #[error("Corrupt row: {0}")]
    CorruptRow(String),
}

impl From<sqlx::Error> for CacheError {
    fn from(e: sqlx::Error) -> Self {
        CacheError::QueryFailed(e.to_string())
    }
}

impl From<drivewatch_core::domain::DomainError> for CacheError {
    fn from(e: drivewatch_core::domain::DomainError) -> Self {
        CacheError::CorruptRow(e.to_string())
    }
}

/// Parse a stored RFC 3339 timestamp
pub(crate) fn parse_datetime(s: &str) -> Result<chrono::DateTime<chrono::Utc>, CacheError> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| CacheError::CorruptRow(format!("Failed to parse datetime '{s}': {e}")))
}
