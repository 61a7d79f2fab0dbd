//! Access-token sources for the Drive API
//!
//! The daemon runs unattended, so the only supported grant is the OAuth2
//! refresh-token grant: a long-lived refresh token (obtained out of band)
//! is exchanged for short-lived access tokens on demand.
//!
//! ## Components
//!
//! - [`AccessTokenSource`] - What [`DriveClient`](crate::client::DriveClient) asks for a bearer token
//! - [`StaticToken`] - Fixed token, for tests and short-lived tooling
//! - [`RefreshTokenSource`] - Caches an access token and refreshes it before expiry

use std::time::Duration;

use drivewatch_core::config::Secrets;
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::DriveError;

/// Default Google OAuth2 token endpoint
pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Access tokens are refreshed this long before their reported expiry
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

/// Lifetime assumed when the token endpoint omits `expires_in`
const DEFAULT_TOKEN_LIFETIME: Duration = Duration::from_secs(3600);

/// Supplies bearer tokens to the Drive client
#[async_trait::async_trait]
pub trait AccessTokenSource: Send + Sync {
    /// Returns a token that is currently believed to be valid
    async fn access_token(&self) -> Result<Zeroizing<String>, DriveError>;

    /// Drops any cached token after the API rejected it with 401
    async fn invalidate(&self);
}

// ============================================================================
// StaticToken
// ============================================================================

/// A fixed access token that is never refreshed
pub struct StaticToken(Zeroizing<String>);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(Zeroizing::new(token.into()))
    }
}

#[async_trait::async_trait]
impl AccessTokenSource for StaticToken {
    async fn access_token(&self) -> Result<Zeroizing<String>, DriveError> {
        Ok(self.0.clone())
    }

    async fn invalidate(&self) {}
}

// ============================================================================
// RefreshTokenSource
// ============================================================================

/// Token endpoint response for the refresh-token grant
#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: Option<u64>,
}

/// Token endpoint error body (RFC 6749 section 5.2)
#[derive(Deserialize)]
struct TokenErrorResponse {
    error: String,
    error_description: Option<String>,
}

struct CachedToken {
    value: Zeroizing<String>,
    refresh_at: Instant,
}

/// Exchanges a refresh token for access tokens, caching the result
///
/// Concurrent callers share one in-flight refresh: the cache is guarded by
/// an async mutex held across the token request.
pub struct RefreshTokenSource {
    http: Client,
    token_url: String,
    client_id: String,
    client_secret: Zeroizing<String>,
    refresh_token: Zeroizing<String>,
    cached: Mutex<Option<CachedToken>>,
}

impl RefreshTokenSource {
    /// Creates a source using the given OAuth2 client credentials
    pub fn new(
        token_url: impl Into<String>,
        client_id: impl Into<String>,
        client_secret: Zeroizing<String>,
        refresh_token: Zeroizing<String>,
    ) -> Self {
        Self {
            http: Client::new(),
            token_url: token_url.into(),
            client_id: client_id.into(),
            client_secret,
            refresh_token,
            cached: Mutex::new(None),
        }
    }

    /// Creates a source from the secrets loaded out of the environment
    pub fn from_secrets(token_url: impl Into<String>, secrets: &Secrets) -> Self {
        Self::new(
            token_url,
            secrets.client_id.clone(),
            secrets.client_secret.clone(),
            secrets.refresh_token.clone(),
        )
    }

    async fn refresh(&self) -> Result<CachedToken, DriveError> {
        debug!(token_url = %self.token_url, "Refreshing access token");

        let params = [
            ("grant_type", "refresh_token"),
            ("client_id", self.client_id.as_str()),
            ("client_secret", self.client_secret.as_str()),
            ("refresh_token", self.refresh_token.as_str()),
        ];

        let response = self.http.post(&self.token_url).form(&params).send().await?;
        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            let reason = serde_json::from_str::<TokenErrorResponse>(&body)
                .map(|e| match e.error_description {
                    Some(desc) => format!("{}: {}", e.error, desc),
                    None => e.error,
                })
                .unwrap_or_else(|_| format!("HTTP {status}"));

            warn!(%status, reason = %reason, "Access token refresh failed");
            return Err(match status {
                StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED => {
                    DriveError::Unauthorized(reason)
                }
                StatusCode::TOO_MANY_REQUESTS => DriveError::TooManyRequests {
                    retry_after: Duration::from_secs(1),
                },
                s if s.is_server_error() => DriveError::ServerError(reason),
                _ => DriveError::BadRequest(reason),
            });
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| DriveError::InvalidResponse(format!("token response: {e}")))?;

        let lifetime = token
            .expires_in
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TOKEN_LIFETIME);

        info!(expires_in_secs = lifetime.as_secs(), "Access token refreshed");
        Ok(CachedToken {
            value: Zeroizing::new(token.access_token),
            refresh_at: Instant::now() + lifetime.saturating_sub(EXPIRY_MARGIN),
        })
    }
}

#[async_trait::async_trait]
impl AccessTokenSource for RefreshTokenSource {
    async fn access_token(&self) -> Result<Zeroizing<String>, DriveError> {
        let mut cached = self.cached.lock().await;

        if let Some(token) = cached.as_ref() {
            if Instant::now() < token.refresh_at {
                return Ok(token.value.clone());
            }
        }

        let fresh = self.refresh().await?;
        let value = fresh.value.clone();
        *cached = Some(fresh);
        Ok(value)
    }

    async fn invalidate(&self) {
        self.cached.lock().await.take();
        debug!("Cached access token invalidated");
    }
}
