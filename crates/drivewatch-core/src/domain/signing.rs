//! Channel token signing
//!
//! Every channel carries a token that the remote store echoes back on each
//! notification. The token is an HMAC-SHA-256 tag over the channel's scope
//! and subscription id, keyed with the webhook secret, so a caller that does
//! not know the secret cannot forge a notification for a live channel.

use constant_time_eq::constant_time_eq;
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::channel::ChannelDescriptor;
use super::errors::DomainError;
use super::newtypes::{ScopeId, SigningToken, SubscriptionId};

type HmacSha256 = Hmac<Sha256>;

/// Mints and verifies channel signing tokens
///
/// Holds a MAC pre-keyed with the webhook secret; the raw secret is not kept.
#[derive(Clone)]
pub struct ChannelSigner {
    keyed: HmacSha256,
}

impl std::fmt::Debug for ChannelSigner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChannelSigner").finish_non_exhaustive()
    }
}

impl ChannelSigner {
    /// Creates a signer keyed with the shared webhook secret
    ///
    /// # Errors
    /// Returns `DomainError::ValidationFailed` if the secret is empty
    pub fn new(secret: impl AsRef<[u8]>) -> Result<Self, DomainError> {
        let secret = secret.as_ref();
        if secret.is_empty() {
            return Err(DomainError::ValidationFailed(
                "webhook secret must not be empty".to_string(),
            ));
        }
        let keyed = HmacSha256::new_from_slice(secret)
            .map_err(|e| DomainError::ValidationFailed(format!("invalid webhook secret: {e}")))?;
        Ok(Self { keyed })
    }

    fn mac_for(&self, scope_id: &ScopeId, subscription_id: &SubscriptionId) -> HmacSha256 {
        let mut mac = self.keyed.clone();
        mac.update(scope_id.as_str().as_bytes());
        mac.update(b"\n");
        mac.update(subscription_id.as_str().as_bytes());
        mac
    }

    /// Signing token for a channel on `scope_id` with `subscription_id`
    pub fn sign(&self, scope_id: &ScopeId, subscription_id: &SubscriptionId) -> SigningToken {
        let tag = self.mac_for(scope_id, subscription_id).finalize().into_bytes();
        SigningToken::from_tag(&tag)
    }

    /// Checks a presented token against a registered descriptor
    ///
    /// The presented token must equal the stored token and be a valid tag
    /// for the descriptor's scope and subscription under the current secret.
    /// Both comparisons run in constant time.
    pub fn verify(&self, descriptor: &ChannelDescriptor, presented: &str) -> bool {
        let presented = presented.trim();
        let matches_stored = constant_time_eq(
            presented.as_bytes(),
            descriptor.signing_token.as_str().as_bytes(),
        );

        let Ok(presented_tag) = hex::decode(presented) else {
            return false;
        };
        let tag_valid = self
            .mac_for(&descriptor.scope_id, &descriptor.subscription_id)
            .verify_slice(&presented_tag)
            .is_ok();

        matches_stored & tag_valid
    }
}
