//! Notification validation use case
//!
//! Decides whether an inbound notification may trigger reconciliation.
//! The checks run in a fixed order and each failure mode is distinct:
//! unknown scope, superseded subscription, bad signature, expired channel.
//! Only the last one still allows the scope to be reconciled.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::debug;

use crate::{
    domain::{ChannelSigner, Notification, ScopeId, SubscriptionId},
    ports::IChannelRegistry,
};

/// Reasons a notification is not accepted as-is
#[derive(Debug, Error)]
pub enum NotificationError {
    /// No channel is registered for the scope (stale or foreign)
    #[error("No channel registered for scope {0}")]
    UnknownScope(ScopeId),

    /// The channel was superseded by a newer subscription
    #[error("Subscription {received} is not the active channel for scope {scope}")]
    SubscriptionMismatch {
        scope: ScopeId,
        received: SubscriptionId,
    },

    /// The presented token does not verify; possible spoofing attempt
    #[error("Invalid signature on notification for scope {0}")]
    InvalidSignature(ScopeId),

    /// Authentic, but the channel is past its expiry and must be renewed
    #[error("Channel for scope {scope} expired at {expired_at}")]
    ExpiredChannel {
        scope: ScopeId,
        expired_at: DateTime<Utc>,
    },

    /// The channel registry could not be read
    #[error("Channel registry error: {0:#}")]
    Storage(#[from] anyhow::Error),
}

impl NotificationError {
    /// Scope that may still be reconciled despite the error
    pub fn reconcilable_scope(&self) -> Option<&ScopeId> {
        match self {
            Self::ExpiredChannel { scope, .. } => Some(scope),
            _ => None,
        }
    }

    /// Short label used for metrics and logs
    pub fn outcome(&self) -> &'static str {
        match self {
            Self::UnknownScope(_) => "unknown_scope",
            Self::SubscriptionMismatch { .. } => "subscription_mismatch",
            Self::InvalidSignature(_) => "invalid_signature",
            Self::ExpiredChannel { .. } => "expired_channel",
            Self::Storage(_) => "storage_error",
        }
    }
}

/// Use case that validates inbound notifications against the registry
pub struct ValidateNotificationUseCase {
    registry: Arc<dyn IChannelRegistry>,
    signer: Arc<ChannelSigner>,
}

impl ValidateNotificationUseCase {
    /// Creates a new ValidateNotificationUseCase
    ///
    /// # Arguments
    ///
    /// * `registry` - Durable channel descriptors
    /// * `signer` - Signer keyed with the shared webhook secret
    pub fn new(registry: Arc<dyn IChannelRegistry>, signer: Arc<ChannelSigner>) -> Self {
        Self { registry, signer }
    }

    /// Validates a notification, yielding the scope to reconcile
    ///
    /// Read-only: the registry is never modified here. An expired channel
    /// is reported as [`NotificationError::ExpiredChannel`] and renewing it
    /// is left to the caller.
    ///
    /// # Errors
    ///
    /// Returns the first failed check, see [`NotificationError`]
    pub async fn execute(&self, notification: &Notification) -> Result<ScopeId, NotificationError> {
        let scope = &notification.scope_id;

        let descriptor = self
            .registry
            .get(scope)
            .await?
            .ok_or_else(|| NotificationError::UnknownScope(scope.clone()))?;

        if descriptor.subscription_id != notification.subscription_id {
            return Err(NotificationError::SubscriptionMismatch {
                scope: scope.clone(),
                received: notification.subscription_id.clone(),
            });
        }

        if !self.signer.verify(&descriptor, &notification.signing_token) {
            return Err(NotificationError::InvalidSignature(scope.clone()));
        }

        if descriptor.is_expired_at(notification.received_at) {
            return Err(NotificationError::ExpiredChannel {
                scope: scope.clone(),
                expired_at: descriptor.expires_at,
            });
        }

        debug!(scope = %scope, subscription = %notification.subscription_id, "Notification validated");
        Ok(scope.clone())
    }
}
