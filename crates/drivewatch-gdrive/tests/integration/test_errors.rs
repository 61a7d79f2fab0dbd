//! Integration tests for error classification and retry handling

use std::sync::Arc;

use drivewatch_core::domain::{ItemId, RemoteError, ScopeId};
use drivewatch_core::ports::IRemoteStore;
use drivewatch_gdrive::{AccessTokenSource, DriveClient, DriveError, DriveProvider};
use tokio::sync::Mutex;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};
use zeroize::Zeroizing;

use crate::common;

fn empty_listing() -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(serde_json::json!({ "files": [] }))
}

#[tokio::test]
async fn test_429_retried_after_retry_after() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 2);

    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(empty_listing())
        .mount(&server)
        .await;

    let page = provider.list_children(&ScopeId::root(), None).await.unwrap();
    assert!(page.items.is_empty());
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_rate_limit_exhausted_is_rate_limited() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 1);

    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(429).append_header("Retry-After", "0"))
        .expect(2)
        .mount(&server)
        .await;

    let err = provider
        .list_children(&ScopeId::root(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::RateLimited { .. }));
    assert!(err.is_transient());
}

#[tokio::test]
async fn test_403_rate_limit_reason_is_throttling() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 0);
    common::mount_error(&server, "GET", "/files", 403, "userRateLimitExceeded").await;

    let err = provider
        .list_children(&ScopeId::root(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::RateLimited { .. }));
}

#[tokio::test]
async fn test_403_permission_is_rejected() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 3);
    common::mount_error(&server, "GET", "/files", 403, "insufficientFilePermissions").await;

    let err = provider
        .list_children(&ScopeId::root(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Rejected(_)));
    // Not retried
    assert_eq!(server.received_requests().await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_server_error_is_transient() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 0);
    common::mount_error(&server, "GET", "/files", 503, "backendError").await;

    let err = provider
        .list_children(&ScopeId::root(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::Transient(_)));
}

#[tokio::test]
async fn test_server_error_then_success() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 1);

    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(502).append_header("Retry-After", "0"))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(empty_listing())
        .mount(&server)
        .await;

    assert!(provider.list_children(&ScopeId::root(), None).await.is_ok());
}

/// Hands out "stale" until invalidated, then "fresh"
struct RotatingToken {
    current: Mutex<&'static str>,
}

#[async_trait::async_trait]
impl AccessTokenSource for RotatingToken {
    async fn access_token(&self) -> Result<Zeroizing<String>, DriveError> {
        Ok(Zeroizing::new(self.current.lock().await.to_string()))
    }

    async fn invalidate(&self) {
        *self.current.lock().await = "fresh";
    }
}

#[tokio::test]
async fn test_401_refreshes_token_once() {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/f1"))
        .and(header("authorization", "Bearer stale"))
        .respond_with(ResponseTemplate::new(401))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/f1"))
        .and(header("authorization", "Bearer fresh"))
        .respond_with(ResponseTemplate::new(200).set_body_json(common::file_json("f1", "a.txt", "3")))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/files/root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({ "id": common::ROOT_ID })))
        .mount(&server)
        .await;

    let tokens = Arc::new(RotatingToken {
        current: Mutex::new("stale"),
    });
    let client = DriveClient::with_base_url(tokens, server.uri()).with_max_retries(0);
    let provider = DriveProvider::new(client);

    // The item lookup is rejected once, then succeeds with the refreshed token
    let item = provider.get_item(&ItemId::new("f1").unwrap()).await.unwrap();
    assert_eq!(item.revision.as_str(), "3");
}

#[tokio::test]
async fn test_persistent_401_is_auth_expired() {
    let server = MockServer::start().await;
    let provider = common::provider_for(&server, 3);

    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(401))
        .expect(2)
        .mount(&server)
        .await;

    let err = provider
        .list_children(&ScopeId::root(), None)
        .await
        .unwrap_err();
    assert_eq!(err, RemoteError::AuthExpired);
}
