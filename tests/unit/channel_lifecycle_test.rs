//! Unit tests for the change-channel lifecycle driven by session changes:
//! token gating, token refresh, sign-out and transport status reports.

#[path = "../support/mod.rs"]
mod support;

use std::sync::atomic::Ordering;

use marksync::managers::sync_controller::{ControllerOptions, SyncController};
use marksync::types::query::Filter;
use marksync::types::realtime::{event_queue, ChangeKind, ChannelState, ChannelStatus};
use marksync::types::settings::ReauthPolicy;
use support::{bookmark, controller, ids, session, FakeRealtime, FakeStore};

#[tokio::test]
async fn test_no_channel_without_token() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);

    c.set_token(None).await;
    c.resubscribe().await;

    assert_eq!(c.state(), ChannelState::Unauthenticated);
    assert_eq!(rt.open_calls(), 0);
}

#[tokio::test]
async fn test_empty_token_counts_as_missing() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);

    c.set_token(Some("")).await;

    assert_eq!(c.state(), ChannelState::Unauthenticated);
    assert_eq!(rt.open_calls(), 0);
}

#[tokio::test]
async fn test_token_opens_filtered_channel() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);

    c.set_token(Some("tok")).await;

    assert_eq!(c.state(), ChannelState::Subscribed);
    assert_eq!(rt.open_calls(), 1);
    assert_eq!(store.token().as_deref(), Some("tok"));
    assert_eq!(rt.authorization().as_deref(), Some("tok"));

    let spec = rt.last_spec().unwrap();
    assert_eq!(spec.topic, "bookmarks-u1");
    assert_eq!(spec.table, "bookmarks");
    assert_eq!(spec.filter, Filter::eq("user_id", "u1"));
    assert_eq!(spec.kinds, vec![ChangeKind::Insert, ChangeKind::Delete]);
}

#[tokio::test]
async fn test_same_token_again_keeps_channel() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);

    c.set_token(Some("tok")).await;
    c.set_token(Some("tok")).await;

    assert_eq!(rt.open_calls(), 1);
    assert_eq!(rt.close_calls(), 0);
}

#[tokio::test]
async fn test_refreshed_token_resubscribes_with_one_open_channel() {
    let store = FakeStore::with_rows(vec![bookmark("a", "u1", "A", 1)]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok1")).await;
    c.load_initial().await.unwrap();
    let first = rt.last_id().unwrap();
    let queries = store.queries.load(Ordering::SeqCst);

    c.set_token(Some("tok2")).await;

    assert_eq!(c.state(), ChannelState::Subscribed);
    assert_eq!(rt.open_calls(), 2);
    assert_eq!(rt.open_channels(), 1);
    assert_eq!(*rt.closed.lock().unwrap(), vec![first]);
    assert_ne!(c.subscription(), Some(first));
    assert_eq!(rt.authorization().as_deref(), Some("tok2"));
    assert_eq!(store.token().as_deref(), Some("tok2"));
    // The gap between the two channels is closed with a re-read.
    assert_eq!(store.queries.load(Ordering::SeqCst), queries + 1);
}

#[tokio::test]
async fn test_reconcile_snapshot_supersedes_replaced_channel_backlog() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, mut rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok1")).await;
    c.initialize(vec![]);
    let first = rt.last_id().unwrap();

    // "x" was inserted and then deleted remotely while the channels swapped.
    rt.push_insert(first, bookmark("x", "u1", "X", 1));
    c.set_token(Some("tok2")).await;
    assert!(c.bookmarks().is_empty());

    let second = rt.last_id().unwrap();
    rt.push_insert(second, bookmark("y", "u1", "Y", 2));

    assert_eq!(c.drain(&mut rx), 1);
    assert_eq!(ids(c.bookmarks()), vec!["y"]);
    assert!(store.rows().is_empty());
}

#[tokio::test]
async fn test_replaced_channel_backlog_kept_when_reconcile_fails() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, mut rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok1")).await;
    c.initialize(vec![]);
    let first = rt.last_id().unwrap();

    rt.push_insert(first, bookmark("x", "u1", "X", 1));
    store.fail_query.store(true, Ordering::SeqCst);
    c.set_token(Some("tok2")).await;
    let second = rt.last_id().unwrap();
    rt.push_insert(second, bookmark("y", "u1", "Y", 2));

    assert_eq!(c.drain(&mut rx), 2);
    assert_eq!(ids(c.bookmarks()), vec!["y", "x"]);
}

#[tokio::test]
async fn test_in_place_reauth_keeps_channel() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (tx, _rx) = event_queue();
    let options = ControllerOptions { reauth: ReauthPolicy::InPlace, ..ControllerOptions::default() };
    let mut c = SyncController::new("u1", options, store.clone(), rt.clone(), tx);

    c.set_token(Some("tok1")).await;
    let first = c.subscription();
    c.set_token(Some("tok2")).await;

    assert_eq!(c.subscription(), first);
    assert_eq!(rt.open_calls(), 1);
    assert_eq!(rt.authorization().as_deref(), Some("tok2"));
}

#[tokio::test]
async fn test_sign_out_closes_channel_and_drops_late_events() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, mut rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok")).await;
    c.initialize(vec![bookmark("a", "u1", "A", 1)]);
    let id = rt.last_id().unwrap();

    c.on_session_change(None).await;
    rt.push_insert(id, bookmark("late", "u1", "Late", 5));

    assert_eq!(c.state(), ChannelState::Unauthenticated);
    assert_eq!(rt.open_channels(), 0);
    assert_eq!(rt.authorization(), None);
    assert_eq!(store.token(), None);
    assert_eq!(c.drain(&mut rx), 0);
    assert_eq!(ids(c.bookmarks()), vec!["a"]);
}

#[tokio::test]
async fn test_session_for_other_user_ends_channel() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);
    c.on_session_change(Some(&session("u1", "tok"))).await;
    assert_eq!(c.state(), ChannelState::Subscribed);

    c.on_session_change(Some(&session("u2", "other"))).await;

    assert_eq!(c.state(), ChannelState::Unauthenticated);
    assert_eq!(rt.open_channels(), 0);
}

#[tokio::test]
async fn test_shutdown_is_final_and_idempotent() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, mut rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok")).await;
    c.initialize(vec![]);
    let id = rt.last_id().unwrap();

    c.shutdown().await;
    c.shutdown().await;
    rt.push_insert(id, bookmark("x", "u1", "X", 1));
    c.set_token(Some("tok2")).await;

    assert!(c.is_closed());
    assert_eq!(rt.close_calls(), 1);
    assert_eq!(rt.open_calls(), 1);
    assert_eq!(c.drain(&mut rx), 0);
    assert!(!c.apply_remote_insert(bookmark("y", "u1", "Y", 2)));
    assert!(c.bookmarks().is_empty());
}

#[tokio::test]
async fn test_status_reports_drive_live_flag() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, mut rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok")).await;
    let id = rt.last_id().unwrap();
    assert!(!c.is_live());

    rt.push_status(id, ChannelStatus::Subscribed);
    c.drain(&mut rx);
    assert!(c.is_live());

    rt.push_status(id, ChannelStatus::Errored("timeout".to_string()));
    c.drain(&mut rx);
    assert!(!c.is_live());
    assert_eq!(c.state(), ChannelState::Subscribed);
}

#[tokio::test]
async fn test_transport_close_allows_resubscribe() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, mut rx) = controller("u1", &store, &rt);
    c.set_token(Some("tok")).await;
    let id = rt.last_id().unwrap();

    rt.push_status(id, ChannelStatus::Closed);
    c.drain(&mut rx);
    assert_eq!(c.state(), ChannelState::TokenAcquired);
    assert_eq!(c.subscription(), None);

    c.resubscribe().await;
    assert_eq!(c.state(), ChannelState::Subscribed);
    assert_eq!(rt.open_calls(), 2);
}

#[tokio::test]
async fn test_failed_open_leaves_list_usable() {
    let store = FakeStore::with_rows(vec![bookmark("a", "u1", "A", 1)]);
    let rt = FakeRealtime::new();
    rt.fail_open.store(true, Ordering::SeqCst);
    let (mut c, _rx) = controller("u1", &store, &rt);

    c.set_token(Some("tok")).await;
    assert_eq!(c.state(), ChannelState::TokenAcquired);

    c.load_initial().await.unwrap();
    c.add_bookmark("B", "b.example").await.unwrap();
    assert_eq!(ids(c.bookmarks()), vec!["a"]);
    assert_eq!(store.insert_count(), 1);

    rt.fail_open.store(false, Ordering::SeqCst);
    c.resubscribe().await;
    assert_eq!(c.state(), ChannelState::Subscribed);
}

#[tokio::test]
async fn test_published_view_tracks_state() {
    let store = FakeStore::with_rows(vec![]);
    let rt = FakeRealtime::new();
    let (mut c, _rx) = controller("u1", &store, &rt);
    let view = c.watch();

    c.set_token(Some("tok")).await;
    assert_eq!(view.borrow().state, ChannelState::Subscribed);

    c.set_token(None).await;
    assert_eq!(view.borrow().state, ChannelState::Unauthenticated);
    assert!(!view.borrow().live);
}
