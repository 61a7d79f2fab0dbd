//! Queueing, coalescing, and per-scope exclusion

use std::time::Duration;

use drivewatch_core::domain::{ScopeId, SubscriptionId};
use drivewatch_core::testing::FakeRemoteStore;
use drivewatch_sync::Enqueued;

use crate::common::{config, file, folder, id, scope, Harness, Running};

fn completed_passes(running: &Running) -> u64 {
    running
        .metrics
        .reconciliations_total
        .with_label_values(&["ok"])
        .get()
}

#[tokio::test]
async fn test_concurrent_notifications_never_overlap() {
    let harness = Harness::new(FakeRemoteStore::with_items([
        folder("A", None, "A"),
        file("a1", Some("A"), "1.txt"),
        file("r1", None, "r.txt"),
    ]));
    let running = harness.start(&config(&["root"], false)).await;
    let passes_before = completed_passes(&running);

    harness.remote.set_delay(Duration::from_millis(50));
    harness.remote.upsert(file("r2", None, "new.txt"));

    let notification = harness.notification(&ScopeId::root());
    let mut tasks = Vec::new();
    for _ in 0..10 {
        let handler = running.notifications.clone();
        let notification = notification.clone();
        tasks.push(tokio::spawn(async move { handler.handle(&notification).await }));
    }
    for task in tasks {
        task.await.unwrap().unwrap();
    }
    running.queue.wait_idle().await;

    assert_eq!(harness.remote.max_in_flight(), 1);
    // One pass for the first notification, at most one follow-up for the rest
    let passes = completed_passes(&running) - passes_before;
    assert!((1..=2).contains(&passes), "ran {passes} passes");

    assert_eq!(harness.emitter.event_names().last().unwrap(), "fileCreated(r2)");
    assert_eq!(harness.emitter.counts()["fileCreated"], 2);
    assert!(harness.cache.snapshot().contains_key(&id("r2")));

    running.stop().await;
}

#[tokio::test]
async fn test_different_scopes_reconcile_in_parallel() {
    let harness = Harness::new(FakeRemoteStore::with_items([
        folder("F1", None, "one"),
        folder("F2", None, "two"),
    ]));
    harness.remote.set_delay(Duration::from_millis(50));

    let running = harness.start(&config(&["F1", "F2"], false)).await;

    assert_eq!(harness.remote.max_in_flight(), 2);
    running.stop().await;
}

#[tokio::test]
async fn test_nested_scopes_emit_one_recursive_deletion() {
    let harness = Harness::new(FakeRemoteStore::with_items([
        folder("F", None, "F"),
        file("f", Some("F"), "f.txt"),
    ]));
    let running = harness.start(&config(&["root", "F"], false)).await;
    let root_notification = harness.notification(&ScopeId::root());
    let folder_notification = harness.notification(&scope("F"));

    harness.emitter.set_delay(Duration::from_millis(50));
    harness.remote.upsert(folder("F", None, "F").into_trashed());

    let (a, b) = tokio::join!(
        running.notifications.handle(&root_notification),
        running.notifications.handle(&folder_notification)
    );
    a.unwrap();
    b.unwrap();
    running.queue.wait_idle().await;

    let counts = harness.emitter.counts();
    assert_eq!(counts["fileDeleted"], 1);
    assert_eq!(counts["folderDeleted"], 1);
    assert!(harness.cache.snapshot().is_empty());

    running.stop().await;
}

#[tokio::test]
async fn test_queue_absorbs_pending_scope() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;

    harness.remote.set_delay(Duration::from_millis(100));

    // The first pass is claimed by a worker right away; the next request
    // queues one follow-up and every later one is absorbed by it
    assert_eq!(running.queue.enqueue(ScopeId::root()), Enqueued::Queued);
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert_eq!(running.queue.enqueue(ScopeId::root()), Enqueued::Queued);
    assert_eq!(running.queue.enqueue(ScopeId::root()), Enqueued::Coalesced);
    assert_eq!(running.queue.pending(), 1);

    running.queue.wait_idle().await;
    assert_eq!(running.queue.pending(), 0);

    running.stop().await;
}

#[tokio::test]
async fn test_recursive_watch_follows_new_folder() {
    let harness = Harness::new(FakeRemoteStore::with_items([
        folder("F3", None, "B"),
        file("F4", Some("F3"), "b.txt"),
    ]));
    let running = harness.start(&config(&["root"], true)).await;

    assert_eq!(
        harness.emitter.event_names(),
        vec!["folderCreated(F3)", "fileCreated(F4)"]
    );
    let cached = harness.cache.snapshot();
    assert_eq!(cached.len(), 2);
    assert_eq!(cached[&id("F4")].parent_id, Some(id("F3")));

    let channels = harness.registry.snapshot();
    assert!(channels.contains_key(&ScopeId::root()));
    assert!(channels.contains_key(&scope("F3")));

    running.stop().await;
}

#[tokio::test]
async fn test_failed_pass_is_retried_on_next_trigger() {
    let harness = Harness::new(FakeRemoteStore::with_items([file("r1", None, "r.txt")]));
    harness.emitter.fail_next(1);

    let running = harness.start(&config(&["root"], false)).await;
    // Startup catch-up and full pass coalesce or repeat; either way the
    // first delivery failed and nothing was committed by it
    let delivered = harness.emitter.event_names();
    assert!(delivered.len() <= 1);

    running.queue.enqueue(ScopeId::root());
    running.queue.wait_idle().await;

    assert_eq!(harness.emitter.event_names(), vec!["fileCreated(r1)"]);
    assert!(harness.cache.snapshot().contains_key(&id("r1")));

    let failures = running
        .metrics
        .reconciliations_total
        .with_label_values(&["emit_error"])
        .get();
    assert_eq!(failures, 1);

    running.stop().await;
}

#[tokio::test]
async fn test_unknown_subscription_does_not_queue() {
    let harness = Harness::new(FakeRemoteStore::new());
    let running = harness.start(&config(&["root"], false)).await;
    let passes_before = harness.remote.list_calls();

    let mut notification = harness.notification(&ScopeId::root());
    notification.subscription_id = SubscriptionId::new("someone-else").unwrap();

    assert!(running.notifications.handle(&notification).await.is_err());
    running.queue.wait_idle().await;
    assert_eq!(harness.remote.list_calls(), passes_before);

    running.stop().await;
}
