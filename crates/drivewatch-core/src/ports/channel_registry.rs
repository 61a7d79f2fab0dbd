//! Channel registry port (driven/secondary port)
//!
//! Same durability contract as the snapshot cache. At most one descriptor
//! is stored per scope; `put` replaces any existing one.

use chrono::{DateTime, Utc};

use crate::domain::{ChannelDescriptor, ScopeId};

/// Port trait for the durable channel descriptor store
#[async_trait::async_trait]
pub trait IChannelRegistry: Send + Sync {
    async fn get(&self, scope_id: &ScopeId) -> anyhow::Result<Option<ChannelDescriptor>>;

    /// Stores a descriptor, replacing the scope's previous one
    async fn put(&self, descriptor: &ChannelDescriptor) -> anyhow::Result<()>;

    async fn remove(&self, scope_id: &ScopeId) -> anyhow::Result<()>;

    /// Descriptors whose `expires_at` is strictly before `before`,
    /// soonest first
    async fn list_expiring_before(
        &self,
        before: DateTime<Utc>,
    ) -> anyhow::Result<Vec<ChannelDescriptor>>;

    /// Every registered descriptor, ordered by scope id
    async fn list_all(&self) -> anyhow::Result<Vec<ChannelDescriptor>>;
}
