//! drivewatch Google Drive adapter
//!
//! Implements the remote-store ports of `drivewatch-core` on top of the
//! Drive v3 REST API:
//! - Folder listing with pagination (`files.list`)
//! - Item metadata lookups (`files.get`)
//! - Push-notification channels (`files.watch` / `channels.stop`)
//!
//! ## Modules
//!
//! - [`auth`] - Access-token sources (static and OAuth2 refresh-token grant)
//! - [`client`] - Authenticated HTTP client with 429/5xx retry handling
//! - [`listing`] - Wire types and calls for `files.list` / `files.get`
//! - [`channels`] - Wire types and calls for `files.watch` / `channels.stop`
//! - [`provider`] - [`DriveProvider`](provider::DriveProvider), the port adapter

pub mod auth;
pub mod channels;
pub mod client;
pub mod listing;
pub mod provider;

use std::time::Duration;

use drivewatch_core::domain::RemoteError;
use thiserror::Error;

pub use auth::{AccessTokenSource, RefreshTokenSource, StaticToken};
pub use client::DriveClient;
pub use provider::DriveProvider;

/// Errors that can occur when communicating with the Drive API
#[derive(Debug, Error)]
pub enum DriveError {
    /// Credentials were rejected, or the token endpoint refused the grant
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Insufficient permissions for the requested operation
    #[error("Forbidden: {0}")]
    Forbidden(String),

    /// The requested file or channel does not exist
    #[error("Not found: {0}")]
    NotFound(String),

    /// A channel with the requested id already exists
    #[error("Conflict: {0}")]
    Conflict(String),

    /// The request was malformed or otherwise rejected (other 4xx)
    #[error("Bad request: {0}")]
    BadRequest(String),

    /// Rate limit exceeded; retry after the specified duration
    #[error("Too many requests, retry after {retry_after:?}")]
    TooManyRequests {
        /// Duration to wait before retrying
        retry_after: Duration,
    },

    /// A server-side error occurred (5xx)
    #[error("Server error: {0}")]
    ServerError(String),

    /// A network-level error occurred
    #[error("Network error: {0}")]
    NetworkError(#[from] reqwest::Error),

    /// The API response could not be parsed or was malformed
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl From<DriveError> for RemoteError {
    fn from(err: DriveError) -> Self {
        match err {
            DriveError::Unauthorized(_) => RemoteError::AuthExpired,
            DriveError::NotFound(what) => RemoteError::NotFound(what),
            DriveError::Conflict(what) => RemoteError::AlreadyExists(what),
            DriveError::Forbidden(msg) | DriveError::BadRequest(msg) => {
                RemoteError::Rejected(msg)
            }
            DriveError::TooManyRequests { retry_after } => {
                RemoteError::RateLimited { retry_after }
            }
            DriveError::ServerError(msg) => RemoteError::Transient(msg),
            DriveError::NetworkError(e) => RemoteError::Transient(e.to_string()),
            DriveError::InvalidResponse(msg) => RemoteError::InvalidResponse(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_remote_error_mapping() {
        assert_eq!(
            RemoteError::from(DriveError::Unauthorized("expired".into())),
            RemoteError::AuthExpired
        );
        assert_eq!(
            RemoteError::from(DriveError::Conflict("chan-1".into())),
            RemoteError::AlreadyExists("chan-1".into())
        );
        assert_eq!(
            RemoteError::from(DriveError::ServerError("503".into())),
            RemoteError::Transient("503".into())
        );
        assert!(RemoteError::from(DriveError::TooManyRequests {
            retry_after: Duration::from_secs(2)
        })
        .is_transient());
        assert!(!RemoteError::from(DriveError::Forbidden("no".into())).is_transient());
    }
}
