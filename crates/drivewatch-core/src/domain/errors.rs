//! Domain error types
//!
//! This module defines error types for domain validation and for the
//! classified failures reported by the remote store adapters.

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur in domain operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// Invalid item identifier
    #[error("Invalid item ID: {0}")]
    InvalidItemId(String),

    /// Invalid scope identifier
    #[error("Invalid scope ID: {0}")]
    InvalidScopeId(String),

    /// Invalid channel subscription identifier
    #[error("Invalid subscription ID: {0}")]
    InvalidSubscriptionId(String),

    /// Signing token is not a well-formed hex digest
    #[error("Invalid signing token: {0}")]
    InvalidSigningToken(String),

    /// Generic validation failure
    #[error("Validation failed: {0}")]
    ValidationFailed(String),
}

/// Classified failure from the remote store (listing or channel API)
///
/// Adapters map their transport-level errors into these variants so the
/// use cases can decide between retrying, deferring, and discarding.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RemoteError {
    /// Network failure, 5xx, or an exhausted 429 retry budget
    #[error("Transient remote error: {0}")]
    Transient(String),

    /// Throttled by the remote store; retry after the given delay
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited {
        /// Delay requested by the remote store
        retry_after: Duration,
    },

    /// The access token was rejected and must be refreshed
    #[error("Authorization expired")]
    AuthExpired,

    /// The requested item or channel does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A subscription with the requested id already exists
    #[error("Already exists: {0}")]
    AlreadyExists(String),

    /// The request was rejected for a non-retryable reason (other 4xx)
    #[error("Rejected by remote store: {0}")]
    Rejected(String),

    /// The response could not be decoded
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl RemoteError {
    /// Returns true if the failed call may succeed when simply re-attempted
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient(_) | Self::RateLimited { .. })
    }
}
