//! Fanout types: topics, events and subscription handles.

use crate::error::ChannelError;
use crate::types::{LogHandle, Payload, Record};
use std::fmt;
use std::sync::Weak;

use super::manager::Fanout;

/// What a subscription listens to.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
    /// Records published under a specific event name.
    Event(String),
    /// Payload of every record, named or not.
    Message,
    /// Every record in full.
    Document,
    /// The engine opened a stream and the log handle is usable.
    Ready,
    /// A stream ended on its idle window and is being reopened.
    Closed,
    /// Provisioning, stream or fire-and-forget publish failures.
    Error,
}

impl Topic {
    pub fn event(name: impl Into<String>) -> Self {
        Topic::Event(name.into())
    }
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Topic::Event(name) => write!(f, "event:{}", name),
            Topic::Message => write!(f, "message"),
            Topic::Document => write!(f, "document"),
            Topic::Ready => write!(f, "ready"),
            Topic::Closed => write!(f, "closed"),
            Topic::Error => write!(f, "error"),
        }
    }
}

/// Events emitted by a channel.
#[derive(Clone, Debug)]
pub enum ChannelEvent {
    // --- Data Events ---
    /// A record carrying an event name.
    Event { name: String, payload: Payload },

    /// Payload of any record.
    Message { payload: Payload },

    /// A full record.
    Document { record: Record },

    // --- Lifecycle Events ---
    /// A tail stream is live on this handle.
    Ready { handle: LogHandle },

    /// A tail stream ended on its idle window.
    Closed,

    /// Something failed.
    Error { error: ChannelError },

    /// A channel listener was removed.
    Dropped { reason: DropReason },
}

impl ChannelEvent {
    /// The payload carried by data events.
    pub fn payload(&self) -> Option<&Payload> {
        match self {
            ChannelEvent::Event { payload, .. } | ChannelEvent::Message { payload } => {
                Some(payload)
            }
            ChannelEvent::Document { record } => Some(&record.payload),
            _ => None,
        }
    }
}

/// Why a listener was dropped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// Send buffer overflowed (slow consumer).
    BufferOverflow,
    /// Receiver was dropped.
    Disconnected,
    /// Explicitly unsubscribed.
    Unsubscribed,
}

/// Configuration for a channel-based listener.
#[derive(Clone, Debug)]
pub struct SubscriptionConfig {
    /// Max buffered events before dropping the listener.
    /// Default: 1000
    pub buffer_size: usize,
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self { buffer_size: 1000 }
    }
}

/// Unique identifier for a subscription.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct SubscriptionId(pub u64);

/// A callback registration that can be removed on its own.
///
/// Dropping the value leaves the callback registered.
#[derive(Clone, Debug)]
pub struct Subscription {
    pub(super) id: SubscriptionId,
    pub(super) topic: Topic,
    pub(super) fanout: Weak<Fanout>,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn topic(&self) -> &Topic {
        &self.topic
    }

    /// Remove the callback. Returns false if it was already removed.
    pub fn unsubscribe(&self) -> bool {
        match self.fanout.upgrade() {
            Some(fanout) => fanout.unsubscribe(self.id),
            None => false,
        }
    }
}

/// Handle to a channel-based listener.
pub struct SubscriptionHandle {
    pub id: SubscriptionId,
    /// Channel to receive events.
    pub receiver: crossbeam_channel::Receiver<ChannelEvent>,
}

impl SubscriptionHandle {
    /// Receive the next event (blocking).
    pub fn recv(&self) -> Result<ChannelEvent, crossbeam_channel::RecvError> {
        self.receiver.recv()
    }

    /// Try to receive an event (non-blocking).
    pub fn try_recv(&self) -> Result<ChannelEvent, crossbeam_channel::TryRecvError> {
        self.receiver.try_recv()
    }

    /// Receive with timeout.
    pub fn recv_timeout(
        &self,
        timeout: std::time::Duration,
    ) -> Result<ChannelEvent, crossbeam_channel::RecvTimeoutError> {
        self.receiver.recv_timeout(timeout)
    }
}
