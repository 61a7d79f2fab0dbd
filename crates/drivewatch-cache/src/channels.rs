//! SQLite implementation of IChannelRegistry
//!
//! One row per scope. Timestamps are stored as RFC 3339 strings in UTC,
//! which sort chronologically, so expiry queries compare them as text.

use chrono::{DateTime, SecondsFormat, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use drivewatch_core::domain::{ChannelDescriptor, ScopeId, SigningToken, SubscriptionId};
use drivewatch_core::ports::IChannelRegistry;

use crate::{parse_datetime, CacheError};

/// SQLite-based channel registry
#[derive(Clone)]
pub struct SqliteChannelRegistry {
    pool: SqlitePool,
}

impl SqliteChannelRegistry {
    /// Creates a new registry instance with the given connection pool
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Fixed-width UTC encoding so that text order matches time order
fn format_timestamp(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn descriptor_from_row(row: &SqliteRow) -> Result<ChannelDescriptor, CacheError> {
    let scope_id: String = row.try_get("scope_id")?;
    let subscription_id: String = row.try_get("subscription_id")?;
    let resource_id: Option<String> = row.try_get("resource_id")?;
    let expires_at: String = row.try_get("expires_at")?;
    let signing_token: String = row.try_get("signing_token")?;

    Ok(ChannelDescriptor {
        scope_id: ScopeId::new(scope_id)?,
        subscription_id: SubscriptionId::new(subscription_id)?,
        resource_id,
        expires_at: parse_datetime(&expires_at)?,
        signing_token: SigningToken::new(signing_token)?,
    })
}

fn descriptors_from_rows(rows: &[SqliteRow]) -> anyhow::Result<Vec<ChannelDescriptor>> {
    rows.iter()
        .map(|row| descriptor_from_row(row).map_err(Into::into))
        .collect()
}

#[async_trait::async_trait]
impl IChannelRegistry for SqliteChannelRegistry {
    async fn get(&self, scope_id: &ScopeId) -> anyhow::Result<Option<ChannelDescriptor>> {
        let row = sqlx::query("SELECT * FROM channels WHERE scope_id = ?")
            .bind(scope_id.as_str())
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(ref r) => Ok(Some(descriptor_from_row(r)?)),
            None => Ok(None),
        }
    }

    async fn put(&self, descriptor: &ChannelDescriptor) -> anyhow::Result<()> {
        sqlx::query(
            "INSERT OR REPLACE INTO channels \
             (scope_id, subscription_id, resource_id, expires_at, signing_token, created_at) \
             VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(descriptor.scope_id.as_str())
        .bind(descriptor.subscription_id.as_str())
        .bind(descriptor.resource_id.as_deref())
        .bind(format_timestamp(&descriptor.expires_at))
        .bind(descriptor.signing_token.as_str())
        .bind(format_timestamp(&Utc::now()))
        .execute(&self.pool)
        .await?;

        tracing::trace!(scope = %descriptor.scope_id, "Saved channel descriptor");
        Ok(())
    }

    async fn remove(&self, scope_id: &ScopeId) -> anyhow::Result<()> {
        sqlx::query("DELETE FROM channels WHERE scope_id = ?")
            .bind(scope_id.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_expiring_before(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ChannelDescriptor>> {
        let rows = sqlx::query("SELECT * FROM channels WHERE expires_at < ? ORDER BY expires_at")
            .bind(format_timestamp(&before))
            .fetch_all(&self.pool)
            .await?;
        descriptors_from_rows(&rows)
    }

    async fn list_all(&self) -> anyhow::Result<Vec<ChannelDescriptor>> {
        let rows = sqlx::query("SELECT * FROM channels ORDER BY scope_id")
            .fetch_all(&self.pool)
            .await?;
        descriptors_from_rows(&rows)
    }
}
