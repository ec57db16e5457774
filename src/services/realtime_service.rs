//! Change-notification channel.
//!
//! `RealtimeTrait` opens filtered, push-based channels on a table and
//! delivers decoded changes onto an [`EventSender`]. `SseRealtime` consumes
//! the platform change feed as server-sent events.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use reqwest_eventsource::{retry, Event, EventSource};
use serde_json::Value;
use tokio::sync::mpsc;

use crate::types::bookmark::Bookmark;
use crate::types::errors::ChannelError;
use crate::types::realtime::{
    ChangeEvent, ChangeKind, ChannelMessage, ChannelSpec, ChannelStatus, EventSender, SubscriptionId,
};
use crate::types::settings::{AppConfig, ReconnectSettings};

/// Trait defining the change-channel operations.
#[async_trait]
pub trait RealtimeTrait: Send + Sync {
    /// Arms (or disarms, with `None`) the authorizer used by channels.
    /// Open channels pick the new token up without being reopened.
    fn set_authorization(&self, token: Option<&str>);

    /// Opens a channel and returns its id. Every message the channel
    /// produces is pushed onto `sink` tagged with that id.
    async fn open_channel(&self, spec: ChannelSpec, sink: EventSender) -> Result<SubscriptionId, ChannelError>;

    /// Closes a channel. Closing an unknown or already closed id is a no-op.
    async fn close_channel(&self, id: SubscriptionId);
}

struct OpenChannel {
    topic: String,
    shutdown_tx: mpsc::Sender<()>,
}

/// Change feed consumer over server-sent events.
pub struct SseRealtime {
    client: reqwest::Client,
    base_url: String,
    anon_key: String,
    token: Arc<RwLock<Option<String>>>,
    reconnect: ReconnectSettings,
    channels: Arc<Mutex<HashMap<SubscriptionId, OpenChannel>>>,
}

impl SseRealtime {
    pub fn new(config: &AppConfig) -> Result<Self, ChannelError> {
        // No overall timeout: the response body is a long-lived stream.
        let client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| ChannelError::Connect(e.to_string()))?;

        Ok(Self {
            client,
            base_url: config.api_url.trim_end_matches('/').to_string(),
            anon_key: config.anon_key.clone(),
            token: Arc::new(RwLock::new(None)),
            reconnect: config.realtime.reconnect.clone(),
            channels: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn current_token(&self) -> Option<String> {
        read_token(&self.token)
    }

    fn channels(&self) -> MutexGuard<'_, HashMap<SubscriptionId, OpenChannel>> {
        lock_channels(&self.channels)
    }

    /// Number of channels currently open.
    pub fn open_count(&self) -> usize {
        self.channels().len()
    }
}

fn lock_channels(channels: &Mutex<HashMap<SubscriptionId, OpenChannel>>) -> MutexGuard<'_, HashMap<SubscriptionId, OpenChannel>> {
    match channels.lock() {
        Ok(g) => g,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn read_token(cell: &RwLock<Option<String>>) -> Option<String> {
    match cell.read() {
        Ok(g) => g.clone(),
        Err(poisoned) => poisoned.into_inner().clone(),
    }
}

#[async_trait]
impl RealtimeTrait for SseRealtime {
    fn set_authorization(&self, token: Option<&str>) {
        let mut guard = match self.token.write() {
            Ok(g) => g,
            Err(poisoned) => poisoned.into_inner(),
        };
        *guard = token.filter(|t| !t.is_empty()).map(str::to_string);
    }

    async fn open_channel(&self, spec: ChannelSpec, sink: EventSender) -> Result<SubscriptionId, ChannelError> {
        if self.current_token().is_none() {
            return Err(ChannelError::Unauthorized);
        }

        let id = SubscriptionId::new();
        let (shutdown_tx, shutdown_rx) = mpsc::channel(1);
        {
            let mut channels = self.channels();
            if channels.values().any(|c| c.topic == spec.topic) {
                return Err(ChannelError::AlreadyOpen(spec.topic));
            }
            channels.insert(
                id,
                OpenChannel {
                    topic: spec.topic.clone(),
                    shutdown_tx,
                },
            );
        }

        let feed = FeedTarget {
            client: self.client.clone(),
            url: format!("{}/realtime/v1/sse", self.base_url),
            anon_key: self.anon_key.clone(),
            token: Arc::clone(&self.token),
            reconnect: self.reconnect.clone(),
        };
        let registry = Arc::clone(&self.channels);
        tokio::spawn(async move {
            channel_loop(id, spec, feed, sink, shutdown_rx).await;
            lock_channels(&registry).remove(&id);
        });

        log::info!("realtime: opened channel {}", id);
        Ok(id)
    }

    async fn close_channel(&self, id: SubscriptionId) {
        let removed = self.channels().remove(&id);
        if let Some(channel) = removed {
            let _ = channel.shutdown_tx.try_send(());
            log::info!("realtime: closed channel {} ({})", id, channel.topic);
        }
    }
}

struct FeedTarget {
    client: reqwest::Client,
    url: String,
    anon_key: String,
    token: Arc<RwLock<Option<String>>>,
    reconnect: ReconnectSettings,
}

impl FeedTarget {
    fn request(&self, spec: &ChannelSpec) -> Option<reqwest::RequestBuilder> {
        let token = read_token(&self.token)?;
        let events = spec
            .kinds
            .iter()
            .map(ChangeKind::as_str)
            .collect::<Vec<_>>()
            .join(",");
        Some(
            self.client
                .get(&self.url)
                .query(&[
                    ("topic", spec.topic.as_str()),
                    ("table", spec.table.as_str()),
                    ("filter", spec.filter.to_expression().as_str()),
                    ("events", events.as_str()),
                ])
                .header("apikey", &self.anon_key)
                .bearer_auth(token),
        )
    }
}

/// Drives one channel until shutdown, a closed sink, or a failure the
/// reconnect policy does not cover.
async fn channel_loop(
    id: SubscriptionId,
    spec: ChannelSpec,
    feed: FeedTarget,
    sink: EventSender,
    mut shutdown_rx: mpsc::Receiver<()>,
) {
    let (initial, max) = backoff_bounds(&feed.reconnect);
    let mut backoff = initial;

    loop {
        let failure = match feed.request(&spec) {
            None => "no access token".to_string(),
            Some(request) => match EventSource::new(request) {
                Err(e) => e.to_string(),
                Ok(mut es) => {
                    es.set_retry_policy(Box::new(retry::Never));
                    let mut reason = None;
                    while reason.is_none() {
                        tokio::select! {
                            event = es.next() => {
                                match event {
                                    Some(Ok(Event::Open)) => {
                                        backoff = initial;
                                        if !emit(&sink, id, None, Some(ChannelStatus::Subscribed)) {
                                            es.close();
                                            return;
                                        }
                                    }
                                    Some(Ok(Event::Message(msg))) => {
                                        match decode_change(&msg.event, &msg.data) {
                                            Ok(Some(change)) if spec.kinds.contains(&change_kind(&change)) => {
                                                if !emit(&sink, id, Some(change), None) {
                                                    es.close();
                                                    return;
                                                }
                                            }
                                            Ok(_) => log::debug!("realtime: ignoring '{}' on {}", msg.event, id),
                                            Err(e) => log::warn!("realtime: undecodable '{}' on {}: {}", msg.event, id, e),
                                        }
                                    }
                                    Some(Err(e)) => reason = Some(e.to_string()),
                                    None => reason = Some("stream ended".to_string()),
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                es.close();
                                return;
                            }
                        }
                    }
                    es.close();
                    reason.unwrap_or_default()
                }
            },
        };

        log::warn!("realtime: channel {} failed: {}", id, failure);
        if !emit(&sink, id, None, Some(ChannelStatus::Errored(failure))) {
            return;
        }
        if !feed.reconnect.enabled {
            emit(&sink, id, None, Some(ChannelStatus::Closed));
            return;
        }

        tokio::select! {
            _ = tokio::time::sleep(backoff) => {}
            _ = shutdown_rx.recv() => return,
        }
        backoff = (backoff * 2).min(max);
    }
}

/// Reconnect delays as `(initial, max)`. A zero initial delay would never
/// grow, so it is raised to one millisecond.
fn backoff_bounds(reconnect: &ReconnectSettings) -> (Duration, Duration) {
    let initial = Duration::from_millis(reconnect.initial_backoff_ms.max(1));
    let max = Duration::from_millis(reconnect.max_backoff_ms).max(initial);
    (initial, max)
}

fn emit(sink: &EventSender, id: SubscriptionId, change: Option<ChangeEvent>, status: Option<ChannelStatus>) -> bool {
    let msg = match (change, status) {
        (Some(event), _) => ChannelMessage::Change { subscription: id, event },
        (None, Some(status)) => ChannelMessage::Status { subscription: id, status },
        (None, None) => return true,
    };
    sink.send(msg).is_ok()
}

fn change_kind(change: &ChangeEvent) -> ChangeKind {
    match change {
        ChangeEvent::Insert(_) => ChangeKind::Insert,
        ChangeEvent::Update(_) => ChangeKind::Update,
        ChangeEvent::Delete { .. } => ChangeKind::Delete,
    }
}

/// Decodes one change-feed message.
///
/// `event` is the change kind; `data` is `{"record": {...}, "old_record": {...}}`.
/// Returns `Ok(None)` for event names that are not row changes (heartbeats).
pub fn decode_change(event: &str, data: &str) -> Result<Option<ChangeEvent>, String> {
    let Some(kind) = ChangeKind::parse(event) else {
        return Ok(None);
    };
    let payload: Value = serde_json::from_str(data).map_err(|e| e.to_string())?;

    let record = |key: &str| -> Result<Bookmark, String> {
        let row = payload
            .get(key)
            .cloned()
            .ok_or_else(|| format!("missing {}", key))?;
        serde_json::from_value(row).map_err(|e| e.to_string())
    };

    match kind {
        ChangeKind::Insert => Ok(Some(ChangeEvent::Insert(record("record")?))),
        ChangeKind::Update => Ok(Some(ChangeEvent::Update(record("record")?))),
        ChangeKind::Delete => {
            let id = payload
                .get("old_record")
                .and_then(|old| old.get("id"))
                .and_then(|id| match id {
                    Value::String(s) => Some(s.clone()),
                    Value::Number(n) => Some(n.to_string()),
                    _ => None,
                })
                .ok_or_else(|| "delete without old_record.id".to_string())?;
            Ok(Some(ChangeEvent::Delete { id }))
        }
    }
}
