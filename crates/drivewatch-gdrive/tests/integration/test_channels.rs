//! Integration tests for channel create/stop

use chrono::{Duration, TimeZone, Utc};
use drivewatch_core::domain::{
    ChannelRequest, RemoteError, ScopeId, SigningToken, SubscriptionId,
};
use drivewatch_core::ports::IChannelApi;
use wiremock::matchers::{body_json, body_partial_json, method, path};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

fn request(scope: ScopeId) -> ChannelRequest {
    ChannelRequest {
        scope_id: scope,
        subscription_id: SubscriptionId::new("sub-0001").unwrap(),
        signing_token: SigningToken::new("a1b2c3d4").unwrap(),
        callback_url: "https://hooks.example.com/notifications".to_string(),
        expires_at: Utc.timestamp_millis_opt(1_800_000_000_000).unwrap(),
    }
}

#[tokio::test]
async fn test_create_channel_on_folder() {
    let (server, provider) = common::setup_drive_mock().await;

    Mock::given(method("POST"))
        .and(path("/files/d1/watch"))
        .and(body_json(serde_json::json!({
            "id": "sub-0001",
            "type": "web_hook",
            "address": "https://hooks.example.com/notifications?scope=d1",
            "token": "a1b2c3d4",
            "expiration": "1800000000000"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "kind": "api#channel",
            "id": "sub-0001",
            "resourceId": "res-d1",
            "resourceUri": "https://www.googleapis.com/drive/v3/files/d1",
            "token": "a1b2c3d4",
            // Drive granted less than requested
            "expiration": "1799999000000"
        })))
        .expect(1)
        .mount(&server)
        .await;

    let req = request(ScopeId::new("d1").unwrap());
    let descriptor = provider.create_channel(&req).await.expect("watch failed");

    assert_eq!(descriptor.scope_id, req.scope_id);
    assert_eq!(descriptor.subscription_id, req.subscription_id);
    assert_eq!(descriptor.signing_token, req.signing_token);
    assert_eq!(descriptor.resource_id.as_deref(), Some("res-d1"));
    assert_eq!(descriptor.expires_at, req.expires_at - Duration::seconds(1000));
}

#[tokio::test]
async fn test_create_channel_on_root_uses_alias() {
    let (server, provider) = common::setup_drive_mock().await;

    Mock::given(method("POST"))
        .and(path("/files/root/watch"))
        .and(body_partial_json(serde_json::json!({
            "address": "https://hooks.example.com/notifications?scope=root"
        })))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "sub-0001",
            "resourceId": "res-root"
        })))
        .mount(&server)
        .await;

    let req = request(ScopeId::root());
    let descriptor = provider.create_channel(&req).await.unwrap();

    // Without a granted expiration the requested one stands
    assert_eq!(descriptor.expires_at, req.expires_at);
    assert_eq!(descriptor.resource_id.as_deref(), Some("res-root"));
}

#[tokio::test]
async fn test_duplicate_channel_id_is_already_exists() {
    let (server, provider) = common::setup_drive_mock().await;
    common::mount_error(&server, "POST", "/files/d1/watch", 400, "channelIdNotUnique").await;

    let err = provider
        .create_channel(&request(ScopeId::new("d1").unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_conflict_status_is_already_exists() {
    let (server, provider) = common::setup_drive_mock().await;
    common::mount_error(&server, "POST", "/files/d2/watch", 409, "conflict").await;

    let err = provider
        .create_channel(&request(ScopeId::new("d2").unwrap()))
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::AlreadyExists(_)));
}

#[tokio::test]
async fn test_stop_channel_sends_resource_id() {
    let (server, provider) = common::setup_drive_mock().await;

    Mock::given(method("POST"))
        .and(path("/channels/stop"))
        .and(body_json(serde_json::json!({
            "id": "sub-0001",
            "resourceId": "res-d1"
        })))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let descriptor = request(ScopeId::new("d1").unwrap()).to_descriptor(Some("res-d1".into()));
    provider.stop_channel(&descriptor).await.expect("stop failed");
}

#[tokio::test]
async fn test_stop_unknown_channel_is_not_found() {
    let (server, provider) = common::setup_drive_mock().await;
    common::mount_error(&server, "POST", "/channels/stop", 404, "notFound").await;

    let descriptor = request(ScopeId::new("d1").unwrap()).to_descriptor(None);
    let err = provider.stop_channel(&descriptor).await.unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
}
