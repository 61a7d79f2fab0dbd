//! Notification validation through the running engine

use chrono::{Duration, Utc};

use drivewatch_core::domain::{ResourceState, ScopeId};
use drivewatch_core::ports::IChannelRegistry;
use drivewatch_core::testing::{FakeRemoteStore, MemorySnapshotCache};
use drivewatch_core::usecases::NotificationError;
use drivewatch_sync::NotificationDisposition;

use crate::common::{config, file, folder, scope, Harness};

#[tokio::test]
async fn test_tampered_token_never_reaches_remote() {
    let harness = Harness::new(FakeRemoteStore::with_items([file("r1", None, "r.txt")]));
    let running = harness.start(&config(&["root"], false)).await;
    let calls_before = harness.remote.list_calls();

    let mut notification = harness.notification(&ScopeId::root());
    let mut token = notification.signing_token.into_bytes();
    token[0] = if token[0] == b'0' { b'1' } else { b'0' };
    notification.signing_token = String::from_utf8(token).unwrap();

    let err = running.notifications.handle(&notification).await.unwrap_err();
    assert!(matches!(err, NotificationError::InvalidSignature(_)));

    running.queue.wait_idle().await;
    assert_eq!(harness.remote.list_calls(), calls_before);
    assert_eq!(
        running
            .metrics
            .notifications_total
            .with_label_values(&["invalid_signature"])
            .get(),
        1
    );

    running.stop().await;
}

#[tokio::test]
async fn test_sync_handshake_is_acknowledged_only() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let calls_before = harness.remote.list_calls();

    let notification = harness
        .notification(&ScopeId::root())
        .with_resource_state(ResourceState::Sync)
        .with_message_number(1);

    let disposition = running.notifications.handle(&notification).await.unwrap();
    assert_eq!(disposition, NotificationDisposition::SyncAcknowledged(ScopeId::root()));

    running.queue.wait_idle().await;
    assert_eq!(harness.remote.list_calls(), calls_before);

    running.stop().await;
}

#[tokio::test]
async fn test_replayed_message_number_is_ignored() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;

    let base = harness.notification(&ScopeId::root());

    let first = running
        .notifications
        .handle(&base.clone().with_message_number(5))
        .await
        .unwrap();
    assert!(matches!(
        first,
        NotificationDisposition::Enqueued(_) | NotificationDisposition::Coalesced(_)
    ));

    for number in [5, 3] {
        let replay = running
            .notifications
            .handle(&base.clone().with_message_number(number))
            .await
            .unwrap();
        assert_eq!(replay, NotificationDisposition::Replayed(ScopeId::root()));
    }

    let newer = running
        .notifications
        .handle(&base.with_message_number(6))
        .await
        .unwrap();
    assert_ne!(newer, NotificationDisposition::Replayed(ScopeId::root()));

    running.queue.wait_idle().await;
    running.stop().await;
}

#[tokio::test]
async fn test_trashed_scope_retires_its_channel() {
    let harness = Harness::new(FakeRemoteStore::with_items([
        folder("F1", None, "A"),
        file("F2", Some("F1"), "a.txt"),
    ]));
    let running = harness.start(&config(&["F1"], false)).await;
    assert_eq!(
        harness.emitter.event_names(),
        vec!["folderCreated(F1)", "fileCreated(F2)"]
    );

    harness.remote.upsert(folder("F1", None, "A").into_trashed());
    let notification = harness
        .notification(&scope("F1"))
        .with_resource_state(ResourceState::Trash);
    running.notifications.handle(&notification).await.unwrap();
    running.queue.wait_idle().await;

    assert_eq!(
        harness.emitter.event_names()[2..],
        ["fileDeleted(F2)", "folderDeleted(F1)"]
    );
    assert!(harness.cache.snapshot().is_empty());
    assert!(!harness.registry.snapshot().contains_key(&scope("F1")));
    assert_eq!(harness.channel_api.stopped().len(), 1);

    running.stop().await;
}

#[tokio::test]
async fn test_expired_channel_still_reconciles_and_is_replaced() {
    let harness = Harness::with_cache(
        FakeRemoteStore::with_items([file("r1", None, "r.txt")]),
        MemorySnapshotCache::with_items([file("r1", None, "r.txt")]),
    );
    let running = harness.start(&config(&["root"], false)).await;

    // Age the registered channel past its expiry
    let mut expired = harness.registry.snapshot()[&ScopeId::root()].clone();
    expired.expires_at = Utc::now() - Duration::minutes(1);
    harness.registry.put(&expired).await.unwrap();

    harness.remote.upsert(file("r2", None, "new.txt"));
    let notification = harness.notification(&ScopeId::root());
    let disposition = running.notifications.handle(&notification).await.unwrap();
    assert_eq!(disposition.scope(), &ScopeId::root());
    running.queue.wait_idle().await;

    assert_eq!(harness.emitter.event_names(), vec!["fileCreated(r2)"]);

    // The scheduler serves requests in order, so the renewal is done once
    // a later sync request has been answered
    running.scheduler.sync_channels().await.unwrap();
    let renewed = harness.registry.snapshot()[&ScopeId::root()].clone();
    assert_ne!(renewed.subscription_id, expired.subscription_id);
    assert!(renewed.expires_at > Utc::now());

    running.stop().await;
}
