use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use uuid::Uuid;

use super::bookmark::Bookmark;
use super::query::Filter;

/// Sending half of the single-consumer queue that channel events are delivered on.
pub type EventSender = mpsc::UnboundedSender<ChannelMessage>;
/// Receiving half, drained in order by whoever owns the controller.
pub type EventReceiver = mpsc::UnboundedReceiver<ChannelMessage>;

/// Creates the event queue shared by a realtime transport and its consumer.
pub fn event_queue() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// Kind of row change reported by the change feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum ChangeKind {
    Insert,
    Update,
    Delete,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::Insert => "INSERT",
            ChangeKind::Update => "UPDATE",
            ChangeKind::Delete => "DELETE",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_uppercase().as_str() {
            "INSERT" => Some(ChangeKind::Insert),
            "UPDATE" => Some(ChangeKind::Update),
            "DELETE" => Some(ChangeKind::Delete),
            _ => None,
        }
    }
}

/// A decoded row change on the bookmark collection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChangeEvent {
    Insert(Bookmark),
    Update(Bookmark),
    /// Deletes only carry the primary key of the removed row.
    Delete { id: String },
}

/// Identifies one opened channel. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionId(Uuid);

impl SubscriptionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for SubscriptionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Transport-level status reported for an open channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelStatus {
    Subscribed,
    Errored(String),
    Closed,
}

/// One item on the event queue, tagged with the channel that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelMessage {
    Change {
        subscription: SubscriptionId,
        event: ChangeEvent,
    },
    Status {
        subscription: SubscriptionId,
        status: ChannelStatus,
    },
}

impl ChannelMessage {
    pub fn subscription(&self) -> SubscriptionId {
        match self {
            ChannelMessage::Change { subscription, .. } => *subscription,
            ChannelMessage::Status { subscription, .. } => *subscription,
        }
    }
}

/// Everything a transport needs to open a filtered change channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelSpec {
    pub topic: String,
    pub table: String,
    pub filter: Filter,
    pub kinds: Vec<ChangeKind>,
}

/// Lifecycle of the notification channel for one controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChannelState {
    Unauthenticated,
    TokenAcquired,
    Subscribed,
}

impl ChannelState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelState::Unauthenticated => "unauthenticated",
            ChannelState::TokenAcquired => "token_acquired",
            ChannelState::Subscribed => "subscribed",
        }
    }
}
