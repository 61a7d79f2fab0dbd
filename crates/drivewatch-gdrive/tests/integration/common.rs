//! Shared test helpers for Drive API integration tests
//!
//! Each helper mounts mock endpoints on a wiremock server; [`setup_drive_mock`]
//! returns a provider pointing at it with retries disabled.

use std::sync::Arc;

use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use drivewatch_gdrive::{DriveClient, DriveProvider, StaticToken};

pub const ROOT_ID: &str = "0AROOTREAL";

/// Starts a mock server that resolves the drive root and returns a
/// provider whose client makes a single attempt per call
pub async fn setup_drive_mock() -> (MockServer, DriveProvider) {
    let server = MockServer::start().await;

    Mock::given(method("GET"))
        .and(path("/files/root"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": ROOT_ID,
            "name": "My Drive",
            "mimeType": "application/vnd.google-apps.folder",
            "version": "1"
        })))
        .mount(&server)
        .await;

    let provider = provider_for(&server, 0);
    (server, provider)
}

pub fn provider_for(server: &MockServer, max_retries: u32) -> DriveProvider {
    let client = DriveClient::with_base_url(Arc::new(StaticToken::new("test-access-token")), server.uri())
        .with_max_retries(max_retries);
    DriveProvider::new(client).with_page_size(2)
}

pub fn file_json(id: &str, name: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "mimeType": "text/plain",
        "version": version,
        "trashed": false
    })
}

pub fn folder_json(id: &str, name: &str, version: &str) -> serde_json::Value {
    serde_json::json!({
        "id": id,
        "name": name,
        "mimeType": "application/vnd.google-apps.folder",
        "version": version,
        "trashed": false
    })
}

/// Mounts an error response with the standard Google error envelope
pub async fn mount_error(
    server: &MockServer,
    http_method: &str,
    url_path: &str,
    status: u16,
    reason: &str,
) {
    Mock::given(method(http_method))
        .and(path(url_path))
        .respond_with(ResponseTemplate::new(status).set_body_json(serde_json::json!({
            "error": {
                "code": status,
                "message": format!("{reason} ({status})"),
                "errors": [{ "domain": "global", "reason": reason }]
            }
        })))
        .mount(server)
        .await;
}
