//! App Core for marksync.
//!
//! Holds the backend services, the session cache and the sync controller of
//! the signed-in user, and routes session changes and channel messages to it.

use std::error::Error;
use std::fs;
use std::sync::Arc;
use std::time::Duration;

use tokio::time::Instant;

use crate::database::connection::Database;
use crate::managers::session_manager::{SessionManager, SessionManagerTrait};
use crate::managers::sync_controller::{ControllerOptions, SyncController, SyncView};
use crate::platform::SESSION_DB_FILE;
use crate::services::auth_service::{AuthServiceTrait, HttpAuthService, EXPIRY_LEEWAY_SECS};
use crate::services::realtime_service::{RealtimeTrait, SseRealtime};
use crate::services::record_store::{RecordStoreTrait, RestRecordStore};
use crate::services::settings_engine;
use crate::types::errors::BookmarkError;
use crate::types::realtime::{event_queue, ChannelMessage, EventReceiver, EventSender};
use crate::types::session::Session;
use crate::types::settings::AppConfig;

/// Minimum spacing between two expiry checks of the same session.
const SESSION_RECHECK: Duration = Duration::from_secs(30);

/// Central application struct.
///
/// A controller exists only while a user is signed in; it is rebuilt when a
/// different user signs in.
pub struct App {
    pub config: AppConfig,
    pub auth: Arc<dyn AuthServiceTrait>,
    pub store: Arc<dyn RecordStoreTrait>,
    pub realtime: Arc<dyn RealtimeTrait>,
    pub session_manager: SessionManager,
    events: EventSender,
    controller: Option<SyncController>,
    last_expiry_check: Option<Instant>,
}

impl App {
    /// Assembles an App from already constructed services. Channel messages
    /// are delivered on `events`; the caller keeps the receiving half.
    pub fn new(
        config: AppConfig,
        auth: Arc<dyn AuthServiceTrait>,
        store: Arc<dyn RecordStoreTrait>,
        realtime: Arc<dyn RealtimeTrait>,
        session_manager: SessionManager,
        events: EventSender,
    ) -> Self {
        Self {
            config,
            auth,
            store,
            realtime,
            session_manager,
            events,
            controller: None,
            last_expiry_check: None,
        }
    }

    /// Builds the HTTP-backed services and opens the on-disk session cache.
    pub fn connect(config: AppConfig) -> Result<(Self, EventReceiver), Box<dyn Error>> {
        let data_dir = settings_engine::data_dir(&config);
        fs::create_dir_all(&data_dir)?;
        let db = Database::open(data_dir.join(SESSION_DB_FILE))?;

        let auth = Arc::new(HttpAuthService::new(&config)?);
        let store = Arc::new(RestRecordStore::new(&config)?);
        let realtime = Arc::new(SseRealtime::new(&config)?);
        let (events, rx) = event_queue();

        let app = Self::new(config, auth, store, realtime, SessionManager::new(db), events);
        Ok((app, rx))
    }

    /// Startup sequence: restore the cached session, let the auth service
    /// validate or refresh it, and bring up sync for the resulting user.
    pub async fn start(&mut self) -> Result<(), BookmarkError> {
        match self.session_manager.restore_session() {
            Ok(Some(cached)) => {
                log::info!("restoring cached session for {}", cached.user_id());
                self.auth.restore(cached);
            }
            Ok(None) => {}
            Err(e) => log::warn!("could not read session cache: {}", e),
        }

        let session = match self.auth.current_session().await {
            Ok(session) => session,
            Err(e) => {
                log::warn!("could not validate cached session: {}", e);
                None
            }
        };
        self.on_session_change(session).await
    }

    /// Applies the auth service's current session.
    pub async fn sync_session(&mut self) -> Result<(), BookmarkError> {
        let session = self.auth.watch_session().borrow().clone();
        self.on_session_change(session).await
    }

    /// When the current session needs [`check_session`](Self::check_session):
    /// `EXPIRY_LEEWAY_SECS` before `expires_at`. `None` when nothing expires.
    pub fn session_deadline(&self) -> Option<Instant> {
        let expires_at = self.auth.watch_session().borrow().as_ref()?.expires_at?;
        let remaining = expires_at - EXPIRY_LEEWAY_SECS - chrono::Utc::now().timestamp();
        let due = Instant::now() + Duration::from_secs(remaining.max(0) as u64);
        match self.last_expiry_check {
            Some(last) if last + SESSION_RECHECK > due => Some(last + SESSION_RECHECK),
            _ => Some(due),
        }
    }

    /// Lets the auth service refresh a session that is about to expire, or
    /// drop one that can no longer be refreshed, then applies the result.
    pub async fn check_session(&mut self) -> Result<(), BookmarkError> {
        self.last_expiry_check = Some(Instant::now());
        if let Err(e) = self.auth.current_session().await {
            log::warn!("session refresh failed, retrying later: {}", e);
            return Ok(());
        }
        self.sync_session().await
    }

    /// Reacts to sign-in, token refresh, user switch and sign-out.
    pub async fn on_session_change(&mut self, session: Option<Session>) -> Result<(), BookmarkError> {
        let Some(session) = session.filter(|s| s.token().is_some()) else {
            if let Err(e) = self.session_manager.clear_session() {
                log::warn!("could not clear session cache: {}", e);
            }
            if let Some(mut controller) = self.controller.take() {
                controller.on_session_change(None).await;
                controller.shutdown().await;
            }
            return Ok(());
        };

        if let Err(e) = self.session_manager.save_session(&session) {
            log::warn!("could not write session cache: {}", e);
        }

        if let Some(controller) = self.controller.as_mut() {
            if controller.owner() == session.user_id() {
                controller.on_session_change(Some(&session)).await;
                return Ok(());
            }
        }

        if let Some(mut previous) = self.controller.take() {
            log::info!("user changed from {} to {}", previous.owner(), session.user_id());
            previous.shutdown().await;
        }

        let mut controller = SyncController::new(
            session.user_id(),
            ControllerOptions::from_config(&self.config),
            self.store.clone(),
            self.realtime.clone(),
            self.events.clone(),
        );
        controller.on_session_change(Some(&session)).await;
        let loaded = controller.load_initial().await;
        self.controller = Some(controller);
        loaded
    }

    /// Forwards one queued channel message. Returns whether the list changed.
    pub fn dispatch_event(&mut self, msg: ChannelMessage) -> bool {
        match self.controller.as_mut() {
            Some(controller) => controller.dispatch(msg),
            None => {
                log::debug!("dropping channel message with no active session");
                false
            }
        }
    }

    pub fn controller(&self) -> Option<&SyncController> {
        self.controller.as_ref()
    }

    pub fn controller_mut(&mut self) -> Result<&mut SyncController, BookmarkError> {
        self.controller.as_mut().ok_or(BookmarkError::NotAuthenticated)
    }

    pub fn view(&self) -> Option<SyncView> {
        self.controller.as_ref().map(SyncController::view)
    }

    /// Shutdown sequence: close the channel. The session cache is kept.
    pub async fn shutdown(&mut self) {
        if let Some(mut controller) = self.controller.take() {
            controller.shutdown().await;
        }
    }
}
