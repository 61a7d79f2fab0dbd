//! Event emitter port (driving the outbound delivery collaborator)

use crate::domain::{ChangeEvent, ScopeId};

/// Port trait for handing reconciled events to the delivery transport
///
/// Events for one reconciliation pass arrive as a single ordered batch.
/// An error means the batch was not accepted; the reconciler then leaves
/// the cache uncommitted so the same events are produced again.
#[async_trait::async_trait]
pub trait IEventEmitter: Send + Sync {
    async fn emit(&self, scope_id: &ScopeId, events: &[ChangeEvent]) -> anyhow::Result<()>;
}
