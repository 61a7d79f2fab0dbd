//! Remote store channel port (driven/secondary port)

use crate::domain::{ChannelDescriptor, ChannelRequest, RemoteError};

/// Port trait for the remote store's push-notification channel API
///
/// ## Implementation Notes
///
/// - `create_channel` must use the request's subscription id as the
///   channel id so a retried call is recognisable by the remote store.
///   A duplicate id is reported as `RemoteError::AlreadyExists`.
/// - `stop_channel` needs the descriptor rather than just the subscription
///   id because the remote store also wants the watched resource handle.
#[async_trait::async_trait]
pub trait IChannelApi: Send + Sync {
    /// Opens a channel delivering notifications for `request.scope_id`
    /// to `request.callback_url`
    ///
    /// # Returns
    /// The descriptor as accepted by the remote store; `expires_at` may be
    /// earlier than requested
    async fn create_channel(
        &self,
        request: &ChannelRequest,
    ) -> Result<ChannelDescriptor, RemoteError>;

    /// Stops a channel so that no further notifications are delivered
    async fn stop_channel(&self, descriptor: &ChannelDescriptor) -> Result<(), RemoteError>;
}
