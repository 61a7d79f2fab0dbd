//! HTTP endpoint exercised over a real socket

use drivewatch_core::domain::ScopeId;
use drivewatch_core::testing::FakeRemoteStore;
use drivewatch_sync::server::{
    HEADER_CHANNEL_ID, HEADER_CHANNEL_TOKEN, HEADER_MESSAGE_NUMBER, HEADER_RESOURCE_STATE,
};

use crate::common::{config, file, folder, id, Harness};

#[tokio::test]
async fn test_valid_notification_is_accepted_and_reconciled() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let notification = harness.notification(&ScopeId::root());

    harness.remote.upsert(file("r1", None, "r.txt"));

    let response = reqwest::Client::new()
        .post(running.url("/notifications?scope=root"))
        .header(HEADER_CHANNEL_ID, notification.subscription_id.as_str())
        .header(HEADER_CHANNEL_TOKEN, notification.signing_token.as_str())
        .header(HEADER_RESOURCE_STATE, "change")
        .header(HEADER_MESSAGE_NUMBER, "7")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    running.queue.wait_idle().await;
    assert_eq!(harness.emitter.event_names(), vec!["fileCreated(r1)"]);

    running.stop().await;
}

#[tokio::test]
async fn test_notification_status_codes() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let notification = harness.notification(&ScopeId::root());
    let client = reqwest::Client::new();

    // Bad signature
    let response = client
        .post(running.url("/notifications?scope=root"))
        .header(HEADER_CHANNEL_ID, notification.subscription_id.as_str())
        .header(HEADER_CHANNEL_TOKEN, "00")
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 401);

    // No channel id
    let response = client
        .post(running.url("/notifications?scope=root"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 400);

    // Unknown scope is acknowledged so the sender stops retrying
    let response = client
        .post(running.url("/notifications?scope=elsewhere"))
        .header(HEADER_CHANNEL_ID, notification.subscription_id.as_str())
        .header(HEADER_CHANNEL_TOKEN, notification.signing_token.as_str())
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 204);

    let response = client.get(running.url("/notifications")).send().await.unwrap();
    assert_eq!(response.status(), 405);

    let response = client.get(running.url("/nowhere")).send().await.unwrap();
    assert_eq!(response.status(), 404);

    running.stop().await;
}

#[tokio::test]
async fn test_control_endpoints() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let client = reqwest::Client::new();

    let response = client.get(running.control_url("/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    let report: serde_json::Value = client
        .post(running.control_url("/sync-channels"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert!(report["created"].as_array().unwrap().is_empty());
    assert!(report["needsCatchUp"].is_array());

    harness.remote.upsert(file("r1", None, "r.txt"));
    let outcome: serde_json::Value = client
        .post(running.control_url("/reconcile?scope=root"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(outcome["scopeId"], "root");
    assert_eq!(outcome["events"][0]["type"], "fileCreated");
    assert_eq!(outcome["scopeGone"], false);

    let response = client.post(running.control_url("/reconcile")).send().await.unwrap();
    assert_eq!(response.status(), 400);

    let metrics = client
        .get(running.control_url("/metrics"))
        .send()
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert!(metrics.contains("drivewatch_reconciliations_total"));

    running.stop().await;
}

#[tokio::test]
async fn test_control_routes_are_not_served_publicly() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let client = reqwest::Client::new();

    for path in ["/sync-channels", "/reconcile?scope=root"] {
        let response = client.post(running.url(path)).send().await.unwrap();
        assert_eq!(response.status(), 404, "{path}");
    }
    let response = client.get(running.url("/metrics")).send().await.unwrap();
    assert_eq!(response.status(), 404);
    let response = client.get(running.url("/healthz")).send().await.unwrap();
    assert_eq!(response.status(), 200);

    // Nor is the notification callback served on the control socket
    let response = client
        .post(running.control_url("/notifications?scope=root"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 404);

    assert!(running.control_addr.ip().is_loopback());
    assert!(harness.emitter.event_names().is_empty());

    running.stop().await;
}

#[tokio::test]
async fn test_reconcile_rejects_unwatched_scope() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let client = reqwest::Client::new();

    harness.remote.upsert(folder("OTHER", Some("elsewhere"), "Other"));
    harness.remote.upsert(file("o1", Some("OTHER"), "o.txt"));
    let before = harness.emitter.event_names();

    let response = client
        .post(running.control_url("/reconcile?scope=OTHER"))
        .send()
        .await
        .unwrap();
    assert_eq!(response.status(), 403);
    assert!(response.text().await.unwrap().contains("OTHER"));

    running.queue.wait_idle().await;
    assert_eq!(harness.emitter.event_names(), before);
    assert!(!harness.cache.snapshot().contains_key(&id("o1")));
    assert!(!harness.registry.snapshot().contains_key(&ScopeId::new("OTHER").unwrap()));

    running.stop().await;
}
