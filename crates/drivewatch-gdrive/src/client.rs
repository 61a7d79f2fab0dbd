//! Drive API HTTP client
//!
//! Wraps `reqwest::Client` with bearer authentication, base URL
//! construction, and retry handling for throttling and server errors.
//!
//! ## Retry policy
//!
//! - 429, and 403 with a rate-limit reason: wait for `Retry-After` (or an
//!   exponential backoff when absent) and retry
//! - 5xx and network failures: exponential backoff and retry
//! - 401: invalidate the cached access token and retry once
//! - Anything else: classify into a [`DriveError`] and return immediately
//!
//! Once the retry budget is spent, the last failure is returned so the
//! caller can still distinguish throttling from outages.

use std::{sync::Arc, time::Duration};

use reqwest::{Client, Method, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::auth::AccessTokenSource;
use crate::DriveError;

/// Base URL for the Drive v3 API
pub const DRIVE_BASE_URL: &str = "https://www.googleapis.com/drive/v3";

/// Default retry-after duration when the header is missing or unparseable
const DEFAULT_RETRY_AFTER: Duration = Duration::from_secs(30);

/// Default number of retries after the first attempt
const DEFAULT_MAX_RETRIES: u32 = 5;

/// First backoff step for 5xx/network failures; doubles per attempt
const BACKOFF_BASE: Duration = Duration::from_millis(500);

/// Upper bound for a single backoff sleep
const BACKOFF_CAP: Duration = Duration::from_secs(30);

/// Error `reason` values Drive uses for throttling on 403 responses
const RATE_LIMIT_REASONS: &[&str] = &["rateLimitExceeded", "userRateLimitExceeded"];

/// Error `reason` Drive reports when a channel id is reused
const CHANNEL_ID_NOT_UNIQUE: &str = "channelIdNotUnique";

// ============================================================================
// Error body
// ============================================================================

/// Standard Google API error envelope
#[derive(Debug, Default, Deserialize)]
struct ApiErrorBody {
    error: ApiErrorDetail,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorDetail {
    #[serde(default)]
    message: String,
    #[serde(default)]
    errors: Vec<ApiErrorReason>,
}

#[derive(Debug, Default, Deserialize)]
struct ApiErrorReason {
    #[serde(default)]
    reason: String,
}

impl ApiErrorDetail {
    fn has_reason(&self, candidates: &[&str]) -> bool {
        self.errors
            .iter()
            .any(|e| candidates.contains(&e.reason.as_str()))
    }
}

/// Parses a `Retry-After` header value
///
/// Accepts delay-seconds or an HTTP-date; HTTP-dates further than an hour
/// out, in the past, or unparseable values yield `default`.
pub fn parse_retry_after(value: &str, default: Duration) -> Duration {
    if let Ok(seconds) = value.trim().parse::<u64>() {
        return Duration::from_secs(seconds);
    }

    if let Ok(date) = chrono::DateTime::parse_from_rfc2822(value.trim()) {
        let now = chrono::Utc::now();
        let target = date.with_timezone(&chrono::Utc);
        if target > now {
            if let Some(secs) = (target - now)
                .num_seconds()
                .try_into()
                .ok()
                .filter(|&s: &u64| s <= 3600)
            {
                return Duration::from_secs(secs);
            }
        }
    }

    warn!(value, "Could not parse Retry-After header, using default");
    default
}

fn backoff(attempt: u32) -> Duration {
    BACKOFF_BASE
        .saturating_mul(2u32.saturating_pow(attempt))
        .min(BACKOFF_CAP)
}

fn retry_after_header(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get("Retry-After")
        .and_then(|v| v.to_str().ok())
        .map(|v| parse_retry_after(v, DEFAULT_RETRY_AFTER))
}

/// What to do with a non-success response
enum Disposition {
    Retry { delay: Duration, error: DriveError },
    Fail(DriveError),
}

async fn classify(response: Response, path: &str, attempt: u32) -> Disposition {
    let status = response.status();
    let retry_after = retry_after_header(&response);
    let body = response.text().await.unwrap_or_default();
    let detail = serde_json::from_str::<ApiErrorBody>(&body)
        .map(|b| b.error)
        .unwrap_or_default();
    let message = if detail.message.is_empty() {
        format!("{status} for {path}")
    } else {
        format!("{} ({status})", detail.message)
    };

    let throttled = status == StatusCode::TOO_MANY_REQUESTS
        || (status == StatusCode::FORBIDDEN && detail.has_reason(RATE_LIMIT_REASONS));

    if throttled {
        let delay = retry_after.unwrap_or_else(|| backoff(attempt));
        return Disposition::Retry {
            delay,
            error: DriveError::TooManyRequests { retry_after: delay },
        };
    }

    if status.is_server_error() {
        return Disposition::Retry {
            delay: retry_after.unwrap_or_else(|| backoff(attempt)),
            error: DriveError::ServerError(message),
        };
    }

    if status == StatusCode::CONFLICT || detail.has_reason(&[CHANNEL_ID_NOT_UNIQUE]) {
        return Disposition::Fail(DriveError::Conflict(message));
    }

    Disposition::Fail(match status {
        StatusCode::UNAUTHORIZED => DriveError::Unauthorized(message),
        StatusCode::FORBIDDEN => DriveError::Forbidden(message),
        StatusCode::NOT_FOUND | StatusCode::GONE => DriveError::NotFound(path.to_string()),
        _ => DriveError::BadRequest(message),
    })
}

// ============================================================================
// DriveClient
// ============================================================================

/// HTTP client for Drive API calls
pub struct DriveClient {
    /// The underlying HTTP client
    client: Client,
    /// Base URL for API requests
    base_url: String,
    /// Where bearer tokens come from
    tokens: Arc<dyn AccessTokenSource>,
    /// Retries after the first attempt for retryable failures
    max_retries: u32,
}

impl DriveClient {
    /// Creates a client for the public Drive v3 endpoint
    pub fn new(tokens: Arc<dyn AccessTokenSource>) -> Self {
        Self::with_base_url(tokens, DRIVE_BASE_URL)
    }

    /// Creates a client with a custom base URL (useful for testing)
    pub fn with_base_url(tokens: Arc<dyn AccessTokenSource>, base_url: impl Into<String>) -> Self {
        Self {
            client: Client::new(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            tokens,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    /// Sets the retry budget for throttling and transient failures
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Returns the base URL for API requests
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    /// Executes a request with authentication and the retry policy above
    ///
    /// # Arguments
    /// * `method` - HTTP method
    /// * `path` - API path relative to the base URL (e.g. `/files`)
    /// * `query` - Query string parameters
    /// * `body` - Optional JSON body
    pub async fn execute_with_retry<B: Serialize + ?Sized>(
        &self,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<&B>,
    ) -> Result<Response, DriveError> {
        let url = format!("{}{}", self.base_url, path);
        let mut reauthenticated = false;
        let mut attempt = 0;

        loop {
            let token = self.tokens.access_token().await?;
            let mut request = self
                .client
                .request(method.clone(), &url)
                .bearer_auth(token.as_str())
                .query(query);
            if let Some(body) = body {
                request = request.json(body);
            }

            let (delay, error) = match request.send().await {
                Ok(response) if response.status().is_success() => {
                    if attempt > 0 {
                        info!(path, attempt, "Request succeeded after retry");
                    }
                    return Ok(response);
                }
                Ok(response) if response.status() == StatusCode::UNAUTHORIZED && !reauthenticated => {
                    debug!(path, "Access token rejected, refreshing");
                    self.tokens.invalidate().await;
                    reauthenticated = true;
                    continue;
                }
                Ok(response) => match classify(response, path, attempt).await {
                    Disposition::Retry { delay, error } => (delay, error),
                    Disposition::Fail(error) => return Err(error),
                },
                Err(e) if e.is_builder() => return Err(DriveError::NetworkError(e)),
                Err(e) => (backoff(attempt), DriveError::NetworkError(e)),
            };

            if attempt >= self.max_retries {
                warn!(path, attempts = attempt + 1, error = %error, "Retry limit exhausted");
                return Err(error);
            }

            info!(
                path,
                attempt,
                retry_after_ms = delay.as_millis() as u64,
                error = %error,
                "Retryable failure, backing off"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    /// Sends a GET and decodes the JSON response
    pub async fn get_json<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> Result<T, DriveError> {
        let response = self
            .execute_with_retry::<()>(Method::GET, path, query, None)
            .await?;
        decode(response, path).await
    }

    /// Sends a POST with a JSON body and decodes the JSON response
    pub async fn post_json<B: Serialize + ?Sized, T: DeserializeOwned>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, DriveError> {
        let response = self
            .execute_with_retry(Method::POST, path, &[], Some(body))
            .await?;
        decode(response, path).await
    }

    /// Sends a POST with a JSON body, ignoring any response body
    pub async fn post_no_content<B: Serialize + ?Sized>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<(), DriveError> {
        self.execute_with_retry(Method::POST, path, &[], Some(body))
            .await?;
        Ok(())
    }
}

async fn decode<T: DeserializeOwned>(response: Response, path: &str) -> Result<T, DriveError> {
    let bytes = response.bytes().await?;
    serde_json::from_slice(&bytes)
        .map_err(|e| DriveError::InvalidResponse(format!("{path}: {e}")))
}
