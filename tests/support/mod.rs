//! Shared test doubles: an in-memory record store, a scripted change feed and
//! an auth service that never leaves the process.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde_json::Value;
use tokio::sync::{oneshot, watch};

use marksync::managers::sync_controller::{ControllerOptions, SyncController};
use marksync::services::auth_service::AuthServiceTrait;
use marksync::services::realtime_service::RealtimeTrait;
use marksync::services::record_store::RecordStoreTrait;
use marksync::types::bookmark::Bookmark;
use marksync::types::errors::{AuthError, ChannelError, StoreError};
use marksync::types::query::{Filter, Order};
use marksync::types::realtime::{
    event_queue, ChangeEvent, ChannelMessage, ChannelSpec, ChannelStatus, EventReceiver, EventSender,
    SubscriptionId,
};
use marksync::types::session::{Session, User};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|p| p.into_inner())
}

pub fn bookmark(id: &str, owner: &str, title: &str, created_secs: i64) -> Bookmark {
    Bookmark {
        id: id.to_string(),
        owner: owner.to_string(),
        title: title.to_string(),
        location: format!("https://{}.example", id),
        created_at: Utc.timestamp_opt(1_700_000_000 + created_secs, 0).unwrap(),
    }
}

pub fn session(user: &str, token: &str) -> Session {
    Session {
        access_token: token.to_string(),
        refresh_token: Some(format!("refresh-{}", token)),
        expires_at: None,
        user: User {
            id: user.to_string(),
            email: Some(format!("{}@example.com", user)),
        },
    }
}

pub fn ids(bookmarks: &[Bookmark]) -> Vec<&str> {
    bookmarks.iter().map(|b| b.id.as_str()).collect()
}

// ─── Record store ───

/// Store double holding rows in memory and recording every call.
#[derive(Default)]
pub struct FakeStore {
    rows: Mutex<Vec<Bookmark>>,
    pub inserted: Mutex<Vec<Value>>,
    pub deleted: Mutex<Vec<String>>,
    pub queries: AtomicUsize,
    pub token: Mutex<Option<String>>,
    pub fail_insert: AtomicBool,
    pub fail_delete: AtomicBool,
    pub fail_query: AtomicBool,
    delete_gate: Mutex<Option<oneshot::Receiver<()>>>,
}

impl FakeStore {
    pub fn with_rows(rows: Vec<Bookmark>) -> Arc<Self> {
        let store = Self::default();
        *lock(&store.rows) = rows;
        Arc::new(store)
    }

    pub fn set_rows(&self, rows: Vec<Bookmark>) {
        *lock(&self.rows) = rows;
    }

    pub fn rows(&self) -> Vec<Bookmark> {
        lock(&self.rows).clone()
    }

    pub fn insert_count(&self) -> usize {
        lock(&self.inserted).len()
    }

    pub fn delete_count(&self) -> usize {
        lock(&self.deleted).len()
    }

    pub fn token(&self) -> Option<String> {
        lock(&self.token).clone()
    }

    /// Makes the next delete wait until the returned sender fires.
    pub fn hold_next_delete(&self) -> oneshot::Sender<()> {
        let (tx, rx) = oneshot::channel();
        *lock(&self.delete_gate) = Some(rx);
        tx
    }
}

fn matches(row: &Bookmark, filters: &[Filter]) -> bool {
    filters.iter().all(|f| match f.column.as_str() {
        "user_id" => row.owner == f.value,
        "id" => row.id == f.value,
        _ => false,
    })
}

#[async_trait]
impl RecordStoreTrait for FakeStore {
    fn set_access_token(&self, token: Option<&str>) {
        *lock(&self.token) = token.map(str::to_string);
    }

    async fn query(&self, _table: &str, filters: &[Filter], _order: &Order) -> Result<Vec<Value>, StoreError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if self.fail_query.load(Ordering::SeqCst) {
            return Err(StoreError::Network("query refused".to_string()));
        }
        // Rows come back in storage order; sorting is the caller's job.
        Ok(lock(&self.rows)
            .iter()
            .filter(|r| matches(r, filters))
            .map(|r| serde_json::to_value(r).unwrap())
            .collect())
    }

    async fn insert(&self, _table: &str, record: Value) -> Result<(), StoreError> {
        if self.fail_insert.load(Ordering::SeqCst) {
            return Err(StoreError::Rejected { status: 409, message: "duplicate key".to_string() });
        }
        lock(&self.inserted).push(record);
        Ok(())
    }

    async fn delete(&self, _table: &str, filters: &[Filter]) -> Result<(), StoreError> {
        let gate = lock(&self.delete_gate).take();
        if let Some(gate) = gate {
            let _ = gate.await;
        }
        if self.fail_delete.load(Ordering::SeqCst) {
            return Err(StoreError::Network("connection reset".to_string()));
        }
        let mut rows = lock(&self.rows);
        for f in filters.iter().filter(|f| f.column == "id") {
            lock(&self.deleted).push(f.value.clone());
        }
        rows.retain(|r| !matches(r, filters));
        Ok(())
    }
}

// ─── Change feed ───

/// Channel double: records open/close calls and lets tests push messages
/// onto the sink handed to `open_channel`.
#[derive(Default)]
pub struct FakeRealtime {
    pub authorization: Mutex<Option<String>>,
    pub opened: Mutex<Vec<(SubscriptionId, ChannelSpec)>>,
    pub closed: Mutex<Vec<SubscriptionId>>,
    sinks: Mutex<HashMap<SubscriptionId, EventSender>>,
    queue: Mutex<Option<EventSender>>,
    pub fail_open: AtomicBool,
}

impl FakeRealtime {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn authorization(&self) -> Option<String> {
        lock(&self.authorization).clone()
    }

    pub fn open_calls(&self) -> usize {
        lock(&self.opened).len()
    }

    pub fn close_calls(&self) -> usize {
        lock(&self.closed).len()
    }

    /// Channels opened and not yet closed.
    pub fn open_channels(&self) -> usize {
        lock(&self.sinks).len()
    }

    pub fn last_spec(&self) -> Option<ChannelSpec> {
        lock(&self.opened).last().map(|(_, spec)| spec.clone())
    }

    pub fn last_id(&self) -> Option<SubscriptionId> {
        lock(&self.opened).last().map(|(id, _)| *id)
    }

    /// Sends a message on the event queue as if channel `msg.subscription()`
    /// produced it, even if that channel has since been closed.
    pub fn send(&self, msg: ChannelMessage) {
        if let Some(sink) = lock(&self.queue).as_ref() {
            let _ = sink.send(msg);
        }
    }

    pub fn push_insert(&self, id: SubscriptionId, bookmark: Bookmark) {
        self.send(ChannelMessage::Change { subscription: id, event: ChangeEvent::Insert(bookmark) });
    }

    pub fn push_delete(&self, id: SubscriptionId, bookmark_id: &str) {
        self.send(ChannelMessage::Change {
            subscription: id,
            event: ChangeEvent::Delete { id: bookmark_id.to_string() },
        });
    }

    pub fn push_status(&self, id: SubscriptionId, status: ChannelStatus) {
        self.send(ChannelMessage::Status { subscription: id, status });
    }
}

#[async_trait]
impl RealtimeTrait for FakeRealtime {
    fn set_authorization(&self, token: Option<&str>) {
        *lock(&self.authorization) = token.map(str::to_string);
    }

    async fn open_channel(&self, spec: ChannelSpec, sink: EventSender) -> Result<SubscriptionId, ChannelError> {
        if self.authorization().is_none() {
            return Err(ChannelError::Unauthorized);
        }
        if self.fail_open.load(Ordering::SeqCst) {
            return Err(ChannelError::Connect("refused".to_string()));
        }
        let id = SubscriptionId::new();
        lock(&self.opened).push((id, spec));
        *lock(&self.queue) = Some(sink.clone());
        lock(&self.sinks).insert(id, sink);
        Ok(id)
    }

    async fn close_channel(&self, id: SubscriptionId) {
        if lock(&self.sinks).remove(&id).is_some() {
            lock(&self.closed).push(id);
        }
    }
}

// ─── Auth ───

/// Auth double. `exchange_code("x")` signs in `user-1` with token `token-x`;
/// each refresh appends `-r` to the current token.
pub struct FakeAuth {
    state: watch::Sender<Option<Session>>,
    pub sign_outs: AtomicUsize,
}

impl FakeAuth {
    pub fn new() -> Arc<Self> {
        let (state, _) = watch::channel(None);
        Arc::new(Self { state, sign_outs: AtomicUsize::new(0) })
    }

    pub fn sign_in(&self, session: Session) {
        self.state.send_replace(Some(session));
    }
}

#[async_trait]
impl AuthServiceTrait for FakeAuth {
    async fn current_session(&self) -> Result<Option<Session>, AuthError> {
        Ok(self.state.borrow().clone())
    }

    fn watch_session(&self) -> watch::Receiver<Option<Session>> {
        self.state.subscribe()
    }

    fn restore(&self, session: Session) {
        self.state.send_replace(Some(session));
    }

    fn authorize_url(&self) -> Result<String, AuthError> {
        Ok("https://auth.test/authorize?provider=google".to_string())
    }

    async fn exchange_code(&self, code: &str) -> Result<Session, AuthError> {
        if code == "bad" {
            return Err(AuthError::InvalidCallback("code expired".to_string()));
        }
        let s = session("user-1", &format!("token-{}", code));
        self.state.send_replace(Some(s.clone()));
        Ok(s)
    }

    async fn refresh_session(&self) -> Result<Session, AuthError> {
        let current = self.state.borrow().clone().ok_or(AuthError::NoSession)?;
        let next = session(current.user_id(), &format!("{}-r", current.access_token));
        self.state.send_replace(Some(next.clone()));
        Ok(next)
    }

    async fn sign_out(&self) -> Result<(), AuthError> {
        self.sign_outs.fetch_add(1, Ordering::SeqCst);
        self.state.send_replace(None);
        Ok(())
    }
}

// ─── Controller ───

pub fn controller(owner: &str, store: &Arc<FakeStore>, realtime: &Arc<FakeRealtime>) -> (SyncController, EventReceiver) {
    let (tx, rx) = event_queue();
    let c = SyncController::new(owner, ControllerOptions::default(), store.clone(), realtime.clone(), tx);
    (c, rx)
}
