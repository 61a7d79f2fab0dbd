//! Integration tests for folder listing and item lookups

use drivewatch_core::domain::{ItemId, ItemKind, RemoteError, ScopeId};
use drivewatch_core::ports::IRemoteStore;
use wiremock::matchers::{method, path, query_param, query_param_is_missing};
use wiremock::{Mock, ResponseTemplate};

use crate::common;

#[tokio::test]
async fn test_root_listing_has_no_parent() {
    let (server, provider) = common::setup_drive_mock().await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", "'root' in parents"))
        .and(query_param("pageSize", "2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                common::file_json("f1", "a.txt", "4"),
                common::folder_json("d1", "Docs", "9")
            ]
        })))
        .mount(&server)
        .await;

    let page = provider
        .list_children(&ScopeId::root(), None)
        .await
        .expect("root listing failed");

    assert!(page.next_page_token.is_none());
    assert_eq!(page.items.len(), 2);
    assert!(page.items.iter().all(|i| i.parent_id.is_none()));
    assert_eq!(page.items[0].kind, ItemKind::File);
    assert_eq!(page.items[0].revision.as_str(), "4");
    assert_eq!(page.items[1].kind, ItemKind::Folder);
}

#[tokio::test]
async fn test_folder_listing_paginates() {
    let (server, provider) = common::setup_drive_mock().await;
    let scope = ScopeId::new("d1").unwrap();

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", "'d1' in parents"))
        .and(query_param_is_missing("pageToken"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                common::file_json("f1", "one.txt", "1"),
                common::file_json("f2", "two.txt", "1")
            ],
            "nextPageToken": "page-2"
        })))
        .expect(1)
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .and(query_param("q", "'d1' in parents"))
        .and(query_param("pageToken", "page-2"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "files": [
                {
                    "id": "f3",
                    "name": "three.txt",
                    "mimeType": "text/plain",
                    "version": "5",
                    "trashed": true
                }
            ]
        })))
        .expect(1)
        .mount(&server)
        .await;

    let first = provider.list_children(&scope, None).await.unwrap();
    assert_eq!(first.items.len(), 2);
    assert_eq!(first.next_page_token.as_deref(), Some("page-2"));

    let second = provider
        .list_children(&scope, first.next_page_token.as_deref())
        .await
        .unwrap();
    assert!(second.next_page_token.is_none());
    assert_eq!(second.items.len(), 1);

    let trashed = &second.items[0];
    assert!(trashed.trashed);
    assert_eq!(trashed.parent_id.as_ref().map(ItemId::as_str), Some("d1"));
}

#[tokio::test]
async fn test_get_item_normalizes_root_parent() {
    let (server, provider) = common::setup_drive_mock().await;

    Mock::given(method("GET"))
        .and(path("/files/d1"))
        .and(query_param("fields", "id,name,mimeType,parents,version,trashed"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "d1",
            "name": "Docs",
            "mimeType": "application/vnd.google-apps.folder",
            "parents": [common::ROOT_ID],
            "version": "12",
            "trashed": false
        })))
        .mount(&server)
        .await;

    Mock::given(method("GET"))
        .and(path("/files/f9"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
            "id": "f9",
            "name": "nested.txt",
            "mimeType": "text/plain",
            "parents": ["d1"],
            "version": "2"
        })))
        .mount(&server)
        .await;

    let folder = provider.get_item(&ItemId::new("d1").unwrap()).await.unwrap();
    assert!(folder.is_folder());
    assert!(folder.parent_id.is_none());

    let file = provider.get_item(&ItemId::new("f9").unwrap()).await.unwrap();
    assert_eq!(file.parent_id, Some(ItemId::new("d1").unwrap()));

    // The drive root is resolved once and reused
    let root_lookups = server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/files/root")
        .count();
    assert_eq!(root_lookups, 1);
}

#[tokio::test]
async fn test_get_item_not_found() {
    let (server, provider) = common::setup_drive_mock().await;
    common::mount_error(&server, "GET", "/files/gone", 404, "notFound").await;

    let err = provider
        .get_item(&ItemId::new("gone").unwrap())
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::NotFound(_)));
}

#[tokio::test]
async fn test_malformed_listing_is_invalid_response() {
    let (server, provider) = common::setup_drive_mock().await;

    Mock::given(method("GET"))
        .and(path("/files"))
        .respond_with(ResponseTemplate::new(200).set_body_string("<html>oops</html>"))
        .mount(&server)
        .await;

    let err = provider
        .list_children(&ScopeId::root(), None)
        .await
        .unwrap_err();
    assert!(matches!(err, RemoteError::InvalidResponse(_)));
}
