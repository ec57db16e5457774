//! Synchronization controller.
//!
//! Owns the bookmark list of one signed-in user and keeps it consistent with
//! the remote table. Three inputs feed it, all applied one at a time:
//!
//! - the initial snapshot (and later full re-reads),
//! - local add/delete requests,
//! - change events from the live channel, drained from a single queue.
//!
//! The channel lifecycle follows the session token:
//! `Unauthenticated -> TokenAcquired -> Subscribed`, back to `TokenAcquired`
//! while a refreshed token is re-armed, and `Unauthenticated` again on
//! sign-out. A channel is never opened without a token, and at most one is
//! open at a time. Messages from a channel that has been closed are dropped.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use zeroize::Zeroizing;

use crate::managers::bookmark_list::BookmarkList;
use crate::services::realtime_service::RealtimeTrait;
use crate::services::record_store::RecordStoreTrait;
use crate::types::bookmark::{Bookmark, NewBookmark};
use crate::types::errors::BookmarkError;
use crate::types::query::{Filter, Order};
use crate::types::realtime::{
    ChangeEvent, ChangeKind, ChannelMessage, ChannelSpec, ChannelState, ChannelStatus, EventReceiver,
    EventSender, SubscriptionId,
};
use crate::types::session::Session;
use crate::types::settings::{AppConfig, ReauthPolicy};

const OWNER_COLUMN: &str = "user_id";
const ID_COLUMN: &str = "id";
const SORT_COLUMN: &str = "created_at";

/// Tunables for a controller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerOptions {
    pub table: String,
    pub reauth: ReauthPolicy,
}

impl Default for ControllerOptions {
    fn default() -> Self {
        Self {
            table: "bookmarks".to_string(),
            reauth: ReauthPolicy::default(),
        }
    }
}

impl ControllerOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            table: config.table.clone(),
            reauth: config.realtime.reauth,
        }
    }
}

/// What observers see after each complete mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SyncView {
    pub bookmarks: Vec<Bookmark>,
    pub state: ChannelState,
    /// True once the transport has confirmed the channel.
    pub live: bool,
}

pub struct SyncController {
    owner: String,
    options: ControllerOptions,
    store: Arc<dyn RecordStoreTrait>,
    realtime: Arc<dyn RealtimeTrait>,
    events: EventSender,
    bookmarks: BookmarkList,
    state: ChannelState,
    token: Option<Zeroizing<String>>,
    subscription: Option<SubscriptionId>,
    /// Channel replaced by a token refresh; its already queued changes are still applied.
    retired: Option<SubscriptionId>,
    live: bool,
    initialized: bool,
    closed: bool,
    view: watch::Sender<SyncView>,
}

impl SyncController {
    /// Creates a controller for `owner`. Channel events must be delivered on
    /// the queue whose sending half is `events`.
    pub fn new(
        owner: &str,
        options: ControllerOptions,
        store: Arc<dyn RecordStoreTrait>,
        realtime: Arc<dyn RealtimeTrait>,
        events: EventSender,
    ) -> Self {
        let (view, _) = watch::channel(SyncView {
            bookmarks: Vec::new(),
            state: ChannelState::Unauthenticated,
            live: false,
        });
        Self {
            owner: owner.to_string(),
            options,
            store,
            realtime,
            events,
            bookmarks: BookmarkList::new(),
            state: ChannelState::Unauthenticated,
            token: None,
            subscription: None,
            retired: None,
            live: false,
            initialized: false,
            closed: false,
            view,
        }
    }

    pub fn owner(&self) -> &str {
        &self.owner
    }

    pub fn state(&self) -> ChannelState {
        self.state
    }

    pub fn is_live(&self) -> bool {
        self.live
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn subscription(&self) -> Option<SubscriptionId> {
        self.subscription
    }

    pub fn bookmarks(&self) -> &[Bookmark] {
        self.bookmarks.as_slice()
    }

    /// Subscribes to the published view. Only complete states are published.
    pub fn watch(&self) -> watch::Receiver<SyncView> {
        self.view.subscribe()
    }

    pub fn view(&self) -> SyncView {
        SyncView {
            bookmarks: self.bookmarks.as_slice().to_vec(),
            state: self.state,
            live: self.live,
        }
    }

    fn publish(&self) {
        self.view.send_replace(self.view());
    }

    fn owns(&self, bookmark: &Bookmark) -> bool {
        bookmark.owner == self.owner
    }

    // ─── List operations ───

    /// Seeds the list from the session's initial snapshot. Only the first
    /// call has an effect; returns whether it was applied.
    pub fn initialize(&mut self, snapshot: Vec<Bookmark>) -> bool {
        if self.closed {
            return false;
        }
        if self.initialized {
            log::warn!("sync: ignoring second initial snapshot for {}", self.owner);
            return false;
        }
        self.replace_list(snapshot);
        self.initialized = true;
        true
    }

    fn replace_list(&mut self, snapshot: Vec<Bookmark>) {
        let total = snapshot.len();
        let owned: Vec<Bookmark> = snapshot.into_iter().filter(|b| self.owns(b)).collect();
        if owned.len() != total {
            log::warn!("sync: dropped {} snapshot rows owned by other users", total - owned.len());
        }
        self.bookmarks.replace(owned);
        log::debug!("sync: list replaced ({} bookmarks)", self.bookmarks.len());
        self.publish();
    }

    /// Applies a remote insert. Redelivered ids are ignored.
    pub fn apply_remote_insert(&mut self, bookmark: Bookmark) -> bool {
        if self.closed {
            return false;
        }
        if !self.owns(&bookmark) {
            log::warn!("sync: ignoring insert {} for another owner", bookmark.id);
            return false;
        }
        let id = bookmark.id.clone();
        let changed = self.bookmarks.insert(bookmark);
        if changed {
            log::debug!("sync: remote insert {}", id);
            self.publish();
        } else {
            log::debug!("sync: duplicate insert {} ignored", id);
        }
        changed
    }

    /// Applies a remote delete. Absent ids are ignored.
    pub fn apply_remote_delete(&mut self, id: &str) -> bool {
        if self.closed {
            return false;
        }
        let changed = self.bookmarks.remove(id).is_some();
        if changed {
            log::debug!("sync: remote delete {}", id);
            self.publish();
        }
        changed
    }

    /// Reads the owner's full collection from the store, newest first.
    pub async fn fetch_snapshot(&self) -> Result<Vec<Bookmark>, BookmarkError> {
        let rows = self
            .store
            .query(
                &self.options.table,
                &[Filter::eq(OWNER_COLUMN, &self.owner)],
                &Order::desc(SORT_COLUMN),
            )
            .await?;
        rows.into_iter()
            .map(|row| serde_json::from_value(row).map_err(|e| BookmarkError::Decode(e.to_string())))
            .collect()
    }

    /// Fetches the snapshot and seeds the list with it.
    pub async fn load_initial(&mut self) -> Result<(), BookmarkError> {
        let snapshot = self.fetch_snapshot().await?;
        self.initialize(snapshot);
        Ok(())
    }

    /// Replaces the list wholesale with a fresh snapshot.
    pub async fn refresh(&mut self) -> Result<(), BookmarkError> {
        if self.closed {
            return Err(BookmarkError::NotAuthenticated);
        }
        let snapshot = self.fetch_snapshot().await?;
        if self.closed {
            return Ok(());
        }
        self.replace_list(snapshot);
        self.initialized = true;
        Ok(())
    }

    /// Validates, normalizes and persists a new bookmark.
    ///
    /// The list is not touched: the row appears when the channel reports
    /// the insert (or on the next snapshot).
    pub async fn add_bookmark(&mut self, title: &str, location: &str) -> Result<NewBookmark, BookmarkError> {
        let record = NewBookmark::from_input(&self.owner, title, location)?;
        if self.closed || self.token.is_none() {
            return Err(BookmarkError::NotAuthenticated);
        }

        let payload = serde_json::to_value(&record).map_err(|e| BookmarkError::Decode(e.to_string()))?;
        if let Err(e) = self.store.insert(&self.options.table, payload).await {
            log::error!("sync: insert failed: {}", e);
            return Err(e.into());
        }
        log::info!("sync: persisted bookmark '{}'", record.title);
        Ok(record)
    }

    /// Removes a bookmark locally at once, then deletes it remotely.
    ///
    /// If the remote delete fails the error is returned after the list has
    /// been replaced by a fresh snapshot.
    pub async fn delete_bookmark(&mut self, id: &str) -> Result<(), BookmarkError> {
        if self.closed || self.token.is_none() {
            return Err(BookmarkError::NotAuthenticated);
        }
        if self.bookmarks.remove(id).is_some() {
            self.publish();
        }

        let result = self
            .store
            .delete(&self.options.table, &[Filter::eq(ID_COLUMN, id)])
            .await;

        match result {
            Ok(()) => {
                log::info!("sync: deleted bookmark {}", id);
                Ok(())
            }
            Err(e) => {
                log::error!("sync: delete of {} failed: {}", id, e);
                if let Err(reload) = self.refresh().await {
                    log::error!("sync: reload after failed delete also failed: {}", reload);
                }
                Err(e.into())
            }
        }
    }

    // ─── Channel lifecycle ───

    /// Reacts to a session change (sign-in, token refresh, sign-out).
    ///
    /// A session for a different user is treated as the end of this one.
    pub async fn on_session_change(&mut self, session: Option<&Session>) {
        let token = match session {
            Some(s) if s.user_id() != self.owner => {
                log::info!("sync: session switched away from {}", self.owner);
                None
            }
            Some(s) => s.token(),
            None => None,
        };
        self.set_token(token).await;
    }

    /// Propagates `token` to the store and channel authorizer and drives the
    /// channel state machine.
    pub async fn set_token(&mut self, token: Option<&str>) {
        if self.closed {
            return;
        }
        let token = token.filter(|t| !t.is_empty());

        let Some(token) = token else {
            self.teardown().await;
            self.retired = None;
            self.token = None;
            self.store.set_access_token(None);
            self.realtime.set_authorization(None);
            self.transition(ChannelState::Unauthenticated);
            self.publish();
            return;
        };

        let changed = self.token.as_ref().map(|t| t.as_str()) != Some(token);
        self.token = Some(Zeroizing::new(token.to_string()));
        self.store.set_access_token(Some(token));
        self.realtime.set_authorization(Some(token));

        match self.state {
            ChannelState::Unauthenticated => {
                self.transition(ChannelState::TokenAcquired);
                self.subscribe().await;
            }
            ChannelState::TokenAcquired => self.subscribe().await,
            ChannelState::Subscribed if !changed => {}
            ChannelState::Subscribed => match self.options.reauth {
                ReauthPolicy::InPlace => {
                    log::info!("sync: channel re-authorized in place");
                }
                ReauthPolicy::Resubscribe => {
                    let previous = self.subscription;
                    self.teardown().await;
                    self.retired = previous;
                    self.subscribe().await;
                    // Rows changed while no channel was open are picked up here.
                    // A fresh snapshot supersedes anything still queued from the
                    // retired channel.
                    if self.initialized {
                        match self.refresh().await {
                            Ok(()) => self.retired = None,
                            Err(e) => log::warn!("sync: reconcile after resubscribe failed: {}", e),
                        }
                    }
                }
            },
        }
        self.publish();
    }

    /// Opens the channel if a token is present and none is open.
    pub async fn resubscribe(&mut self) {
        if self.closed || self.token.is_none() || self.state == ChannelState::Subscribed {
            return;
        }
        self.subscribe().await;
        self.publish();
    }

    fn channel_spec(&self) -> ChannelSpec {
        ChannelSpec {
            topic: format!("{}-{}", self.options.table, self.owner),
            table: self.options.table.clone(),
            filter: Filter::eq(OWNER_COLUMN, &self.owner),
            kinds: vec![ChangeKind::Insert, ChangeKind::Delete],
        }
    }

    async fn subscribe(&mut self) {
        if self.token.is_none() {
            return;
        }
        if self.subscription.is_some() {
            self.teardown().await;
        }
        match self.realtime.open_channel(self.channel_spec(), self.events.clone()).await {
            Ok(id) => {
                self.subscription = Some(id);
                self.transition(ChannelState::Subscribed);
            }
            Err(e) => {
                log::warn!("sync: subscription failed, continuing without live updates: {}", e);
            }
        }
    }

    /// Closes the open channel, if any. Safe to call repeatedly.
    async fn teardown(&mut self) {
        if let Some(id) = self.subscription.take() {
            self.realtime.close_channel(id).await;
        }
        self.live = false;
        if self.state == ChannelState::Subscribed {
            self.transition(ChannelState::TokenAcquired);
        }
    }

    fn transition(&mut self, next: ChannelState) {
        if self.state != next {
            log::info!("sync: channel {} -> {}", self.state.as_str(), next.as_str());
            self.state = next;
        }
    }

    /// Ends the session: closes the channel and ignores everything after.
    pub async fn shutdown(&mut self) {
        if self.closed {
            return;
        }
        self.teardown().await;
        self.retired = None;
        self.token = None;
        self.transition(ChannelState::Unauthenticated);
        self.closed = true;
        self.publish();
    }

    // ─── Event queue ───

    /// Applies one message from the event queue. Returns whether the list changed.
    pub fn dispatch(&mut self, msg: ChannelMessage) -> bool {
        let source = Some(msg.subscription());
        let current = self.subscription.is_some() && self.subscription == source;
        let retired = self.retired.is_some() && self.retired == source;
        if self.closed || !(current || retired) {
            log::debug!("sync: dropping message from inactive channel {}", msg.subscription());
            return false;
        }
        match msg {
            ChannelMessage::Change { event, .. } => match event {
                ChangeEvent::Insert(bookmark) => self.apply_remote_insert(bookmark),
                ChangeEvent::Delete { id } => self.apply_remote_delete(&id),
                ChangeEvent::Update(bookmark) => {
                    log::debug!("sync: ignoring update for {}", bookmark.id);
                    false
                }
            },
            ChannelMessage::Status { subscription, status } if current => {
                self.on_channel_status(subscription, status);
                false
            }
            ChannelMessage::Status { .. } => false,
        }
    }

    fn on_channel_status(&mut self, subscription: SubscriptionId, status: ChannelStatus) {
        match status {
            ChannelStatus::Subscribed => {
                log::info!("sync: channel {} is live", subscription);
                self.live = true;
            }
            ChannelStatus::Errored(reason) => {
                log::warn!("sync: channel {} error: {}", subscription, reason);
                self.live = false;
            }
            ChannelStatus::Closed => {
                log::warn!("sync: channel {} closed by transport", subscription);
                // The transport has already gone; only local state is reset.
                self.subscription = None;
                self.live = false;
                self.transition(ChannelState::TokenAcquired);
            }
        }
        self.publish();
    }

    /// Applies every message already waiting on `rx`, in order. Returns the
    /// number that changed the list.
    pub fn drain(&mut self, rx: &mut EventReceiver) -> usize {
        let mut changed = 0;
        while let Ok(msg) = rx.try_recv() {
            if self.dispatch(msg) {
                changed += 1;
            }
        }
        changed
    }
}
