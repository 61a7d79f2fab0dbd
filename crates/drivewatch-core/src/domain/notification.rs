//! Inbound push notifications
//!
//! A notification only says "something changed under this scope". It is
//! never persisted and carries no delivery-order guarantee.

use chrono::{DateTime, Utc};

use super::newtypes::{ScopeId, SubscriptionId};

/// What the remote store reports about the watched resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResourceState {
    /// Handshake sent once when a channel opens
    Sync,
    Add,
    Remove,
    Update,
    Trash,
    Untrash,
    Change,
    Unknown(String),
}

impl ResourceState {
    /// Parse the remote store's resource-state header value
    pub fn parse(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "sync" => Self::Sync,
            "add" => Self::Add,
            "remove" => Self::Remove,
            "update" => Self::Update,
            "trash" => Self::Trash,
            "untrash" => Self::Untrash,
            "change" => Self::Change,
            other => Self::Unknown(other.to_string()),
        }
    }

    /// True when the watched resource itself went away
    pub fn closes_channel(&self) -> bool {
        matches!(self, Self::Remove | Self::Trash)
    }
}

/// A notification received on the inbound endpoint
///
/// `signing_token` is kept as the raw presented string; it is only
/// trusted after validation against the registered descriptor.
#[derive(Debug, Clone)]
pub struct Notification {
    pub subscription_id: SubscriptionId,
    pub scope_id: ScopeId,
    pub signing_token: String,
    pub resource_state: ResourceState,
    pub message_number: Option<u64>,
    pub received_at: DateTime<Utc>,
}

impl Notification {
    /// Creates a `change` notification received now
    pub fn new(
        subscription_id: SubscriptionId,
        scope_id: ScopeId,
        signing_token: impl Into<String>,
    ) -> Self {
        Self {
            subscription_id,
            scope_id,
            signing_token: signing_token.into(),
            resource_state: ResourceState::Change,
            message_number: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_resource_state(mut self, state: ResourceState) -> Self {
        self.resource_state = state;
        self
    }

    pub fn with_message_number(mut self, number: u64) -> Self {
        self.message_number = Some(number);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_resource_state() {
        assert_eq!(ResourceState::parse("sync"), ResourceState::Sync);
        assert_eq!(ResourceState::parse(" Trash "), ResourceState::Trash);
        assert_eq!(
            ResourceState::parse("weird"),
            ResourceState::Unknown("weird".to_string())
        );
    }

    #[test]
    fn test_closes_channel() {
        assert!(ResourceState::Remove.closes_channel());
        assert!(ResourceState::Trash.closes_channel());
        assert!(!ResourceState::Update.closes_channel());
        assert!(!ResourceState::Sync.closes_channel());
    }

    #[test]
    fn test_builder() {
        let n = Notification::new(SubscriptionId::generate(), ScopeId::root(), "ab")
            .with_resource_state(ResourceState::Add)
            .with_message_number(7);
        assert_eq!(n.resource_state, ResourceState::Add);
        assert_eq!(n.message_number, Some(7));
    }
}
