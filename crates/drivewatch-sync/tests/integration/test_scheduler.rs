//! Channel maintenance driven by the scheduler

use std::time::Duration as StdDuration;

use chrono::{Duration, Utc};

use drivewatch_core::domain::{ChannelDescriptor, ScopeId, SubscriptionId};
use drivewatch_core::ports::IChannelRegistry;
use drivewatch_core::testing::{FakeRemoteStore, MemorySnapshotCache};

use crate::common::{config, file, folder, scope, Harness};

#[tokio::test]
async fn test_startup_opens_channels_and_catches_up() {
    let harness = Harness::new(FakeRemoteStore::with_items([file("r1", None, "r.txt")]));
    let running = harness.start(&config(&["root"], false)).await;

    let created = harness.channel_api.created();
    assert_eq!(created.len(), 1);
    assert!(created[0].scope_id.is_root());
    assert_eq!(harness.emitter.event_names(), vec!["fileCreated(r1)"]);

    running.stop().await;
}

#[tokio::test]
async fn test_expiring_channel_is_renewed_with_later_expiry() {
    let harness = Harness::new(FakeRemoteStore::new());
    harness.channel_api.cap_expiry(Utc::now() + Duration::minutes(1));
    let running = harness.start(&config(&["root"], false)).await;

    let before = harness.registry.snapshot()[&ScopeId::root()].clone();
    assert!(before.expires_at <= Utc::now() + Duration::minutes(1));

    harness.channel_api.cap_expiry(Utc::now() + Duration::days(2));
    let report = running.scheduler.sync_channels().await.unwrap();

    assert_eq!(report.renewed, vec![ScopeId::root()]);
    let after = harness.registry.snapshot()[&ScopeId::root()].clone();
    assert!(after.expires_at > before.expires_at);
    assert_ne!(after.subscription_id, before.subscription_id);

    running.stop().await;
}

#[tokio::test]
async fn test_unwatched_scope_is_retired() {
    let harness = Harness::new(FakeRemoteStore::new());
    let stale_scope = scope("OLD");
    let subscription = SubscriptionId::generate();
    harness
        .registry
        .put(&ChannelDescriptor {
            scope_id: stale_scope.clone(),
            signing_token: harness.signer.sign(&stale_scope, &subscription),
            subscription_id: subscription,
            resource_id: Some("res-OLD".to_string()),
            expires_at: Utc::now() + Duration::hours(1),
        })
        .await
        .unwrap();

    let running = harness.start(&config(&["root"], false)).await;

    let channels = harness.registry.snapshot();
    assert!(!channels.contains_key(&stale_scope));
    assert!(channels.contains_key(&ScopeId::root()));
    assert_eq!(harness.channel_api.stopped()[0].scope_id, stale_scope);

    running.stop().await;
}

#[tokio::test]
async fn test_recursive_watch_set_covers_cached_folders() {
    let cached = [
        folder("A", None, "A"),
        folder("B", Some("A"), "B"),
        folder("C", None, "C").into_trashed(),
        file("f", Some("A"), "f.txt"),
    ];
    let harness = Harness::with_cache(
        FakeRemoteStore::with_items([folder("A", None, "A"), folder("B", Some("A"), "B")]),
        MemorySnapshotCache::with_items(cached),
    );
    let running = harness.start(&config(&["root"], true)).await;

    let channels = harness.registry.snapshot();
    let mut watched: Vec<&str> = channels.keys().map(ScopeId::as_str).collect();
    watched.sort_unstable();
    assert_eq!(watched, vec!["A", "B", "root"]);

    running.stop().await;
}

#[tokio::test]
async fn test_full_interval_requeues_watched_scopes() {
    let harness = Harness::new(FakeRemoteStore::new());
    let mut config = config(&["root"], false);
    config.reconcile.full_interval_secs = 1;
    let running = harness.start(&config).await;
    let calls_before = harness.remote.list_calls();

    tokio::time::sleep(StdDuration::from_millis(1500)).await;
    running.queue.wait_idle().await;

    assert!(harness.remote.list_calls() > calls_before);
    running.stop().await;
}
