//! Push-notification channels
//!
//! `files.watch` opens a `web_hook` channel on a folder; Drive then POSTs
//! to the callback address whenever the folder or its direct children
//! change. The channel id is our subscription id and the channel token is
//! our signing token, both echoed back on every delivery. The callback
//! address carries the scope as a `scope` query parameter.

use chrono::{DateTime, TimeZone, Utc};
use drivewatch_core::domain::{ChannelDescriptor, ChannelRequest, ScopeId};
use reqwest::Url;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::client::DriveClient;
use crate::DriveError;

const WEB_HOOK: &str = "web_hook";

/// Request body of `files.watch`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct WatchRequest<'a> {
    id: &'a str,
    #[serde(rename = "type")]
    kind: &'static str,
    address: &'a str,
    token: &'a str,
    /// Requested expiry in epoch milliseconds, as a string
    expiration: String,
}

/// Channel resource returned by `files.watch`
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct WatchResponse {
    resource_id: Option<String>,
    /// Granted expiry in epoch milliseconds, as a string
    expiration: Option<String>,
}

/// Request body of `channels.stop`
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct StopRequest<'a> {
    id: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    resource_id: Option<&'a str>,
}

fn parse_expiration(millis: &str) -> Result<DateTime<Utc>, DriveError> {
    millis
        .trim()
        .parse::<i64>()
        .ok()
        .and_then(|ms| Utc.timestamp_millis_opt(ms).single())
        .ok_or_else(|| DriveError::InvalidResponse(format!("invalid channel expiration: {millis}")))
}

/// Callback address for a scope's channel
pub fn notification_address(callback_url: &str, scope: &ScopeId) -> Result<String, DriveError> {
    let mut url = Url::parse(callback_url)
        .map_err(|e| DriveError::BadRequest(format!("invalid callback url {callback_url}: {e}")))?;
    url.query_pairs_mut().append_pair("scope", scope.as_str());
    Ok(url.into())
}

/// Opens a channel watching `request.scope_id`
///
/// Drive may grant an earlier expiry than requested; the returned
/// descriptor carries the granted one.
pub async fn watch(
    client: &DriveClient,
    file_id: &str,
    request: &ChannelRequest,
) -> Result<ChannelDescriptor, DriveError> {
    let address = notification_address(&request.callback_url, &request.scope_id)?;
    let body = WatchRequest {
        id: request.subscription_id.as_str(),
        kind: WEB_HOOK,
        address: &address,
        token: request.signing_token.as_str(),
        expiration: request.expires_at.timestamp_millis().to_string(),
    };

    let path = format!("/files/{file_id}/watch");
    let response: WatchResponse = client.post_json(&path, &body).await?;

    let expires_at = match response.expiration.as_deref() {
        Some(millis) => parse_expiration(millis)?,
        None => request.expires_at,
    };

    info!(
        scope = %request.scope_id,
        subscription = %request.subscription_id,
        %expires_at,
        "Opened notification channel"
    );

    let mut descriptor = request.to_descriptor(response.resource_id);
    descriptor.expires_at = expires_at;
    Ok(descriptor)
}

/// Stops a channel
pub async fn stop(client: &DriveClient, descriptor: &ChannelDescriptor) -> Result<(), DriveError> {
    let body = StopRequest {
        id: descriptor.subscription_id.as_str(),
        resource_id: descriptor.resource_id.as_deref(),
    };
    client.post_no_content("/channels/stop", &body).await?;

    debug!(
        scope = %descriptor.scope_id,
        subscription = %descriptor.subscription_id,
        "Stopped notification channel"
    );
    Ok(())
}
