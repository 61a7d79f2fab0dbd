//! Push-notification channel descriptors

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::newtypes::{ScopeId, SigningToken, SubscriptionId};

/// An active notification channel registered for one scope
///
/// At most one descriptor exists per scope. `resource_id` is the remote
/// store's handle for the watched resource, needed to stop the channel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelDescriptor {
    pub scope_id: ScopeId,
    pub subscription_id: SubscriptionId,
    pub resource_id: Option<String>,
    pub expires_at: DateTime<Utc>,
    pub signing_token: SigningToken,
}

impl ChannelDescriptor {
    /// Returns true if the channel has expired at `now`
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Returns true if the channel expires within `window` of `now`
    pub fn expires_within(&self, now: DateTime<Utc>, window: Duration) -> bool {
        now + window >= self.expires_at
    }

    /// Time left before expiry, clamped at zero
    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.expires_at - now).max(Duration::zero())
    }
}

/// Parameters for opening a channel on the remote store
///
/// The subscription id and signing token are minted locally before the
/// call so that a retried request carries the same identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelRequest {
    pub scope_id: ScopeId,
    pub subscription_id: SubscriptionId,
    pub signing_token: SigningToken,
    pub callback_url: String,
    pub expires_at: DateTime<Utc>,
}

impl ChannelRequest {
    /// Descriptor assuming the remote store accepted the request as sent
    pub fn to_descriptor(&self, resource_id: Option<String>) -> ChannelDescriptor {
        ChannelDescriptor {
            scope_id: self.scope_id.clone(),
            subscription_id: self.subscription_id.clone(),
            resource_id,
            expires_at: self.expires_at,
            signing_token: self.signing_token.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn descriptor(expires_at: DateTime<Utc>) -> ChannelDescriptor {
        ChannelDescriptor {
            scope_id: ScopeId::root(),
            subscription_id: SubscriptionId::new("sub-1").unwrap(),
            resource_id: Some("res-1".to_string()),
            expires_at,
            signing_token: SigningToken::new("abcd").unwrap(),
        }
    }

    #[test]
    fn test_expiry_checks() {
        let now = Utc::now();
        let d = descriptor(now + Duration::minutes(1));

        assert!(!d.is_expired_at(now));
        assert!(d.is_expired_at(now + Duration::minutes(2)));
        assert!(d.expires_within(now, Duration::minutes(5)));
        assert!(!d.expires_within(now, Duration::seconds(30)));
    }

    #[test]
    fn test_remaining_clamped() {
        let now = Utc::now();
        let d = descriptor(now - Duration::minutes(1));
        assert_eq!(d.remaining(now), Duration::zero());
    }

    #[test]
    fn test_request_to_descriptor() {
        let expires_at = Utc::now() + Duration::hours(1);
        let request = ChannelRequest {
            scope_id: ScopeId::new("F1").unwrap(),
            subscription_id: SubscriptionId::new("sub-2").unwrap(),
            signing_token: SigningToken::new("00ff").unwrap(),
            callback_url: "https://hooks.example.com/notifications".to_string(),
            expires_at,
        };

        let d = request.to_descriptor(None);
        assert_eq!(d.scope_id.as_str(), "F1");
        assert_eq!(d.expires_at, expires_at);
        assert!(d.resource_id.is_none());
    }
}
