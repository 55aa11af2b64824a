//! Listener registry and broadcast.

use crate::types::Record;
use crossbeam_channel::{bounded, Sender};
use parking_lot::{ReentrantMutex, RwLock};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::warn;

use super::types::{
    ChannelEvent, DropReason, Subscription, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, Topic,
};

type Callback = Arc<dyn Fn(&ChannelEvent) + Send + Sync + 'static>;

/// Where a listener's events go.
#[derive(Clone)]
enum Sink {
    Callback(Callback),
    Channel(Sender<ChannelEvent>),
}

/// Internal listener state.
struct Listener {
    id: SubscriptionId,
    sink: Sink,
}

/// Registry of listeners keyed by topic.
pub struct Fanout {
    /// Listeners by topic, in registration order.
    listeners: RwLock<HashMap<Topic, Vec<Listener>>>,
    /// Counter for generating subscription IDs.
    next_id: AtomicU64,
    /// Serializes broadcasts so records never interleave. Reentrant because a
    /// callback may trigger another emit on the same thread.
    serial: ReentrantMutex<()>,
    /// Once set, nothing is delivered.
    closed: AtomicBool,
}

impl Fanout {
    pub fn new() -> Self {
        Self {
            listeners: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
            serial: ReentrantMutex::new(()),
            closed: AtomicBool::new(false),
        }
    }

    /// Register a callback for `topic`.
    pub fn on<F>(self: &Arc<Self>, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        let id = self.register(topic.clone(), Sink::Callback(Arc::new(callback)));
        Subscription {
            id,
            topic,
            fanout: Arc::downgrade(self),
        }
    }

    /// Register a bounded channel listener for `topic`.
    pub fn listen(&self, topic: Topic, config: SubscriptionConfig) -> SubscriptionHandle {
        let (sender, receiver) = bounded(config.buffer_size.max(1));
        let id = self.register(topic, Sink::Channel(sender));
        SubscriptionHandle { id, receiver }
    }

    fn register(&self, topic: Topic, sink: Sink) -> SubscriptionId {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::SeqCst));
        self.listeners
            .write()
            .entry(topic)
            .or_default()
            .push(Listener { id, sink });
        id
    }

    /// Remove a listener. Returns false if it was not registered.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let removed = {
            let mut listeners = self.listeners.write();
            let mut removed = None;
            for list in listeners.values_mut() {
                if let Some(index) = list.iter().position(|l| l.id == id) {
                    removed = Some(list.remove(index));
                    break;
                }
            }
            listeners.retain(|_, list| !list.is_empty());
            removed
        };

        match removed {
            Some(listener) => {
                if let Sink::Channel(sender) = listener.sink {
                    // Best effort
                    let _ = sender.try_send(ChannelEvent::Dropped {
                        reason: DropReason::Unsubscribed,
                    });
                }
                true
            }
            None => false,
        }
    }

    /// Total number of listeners across topics.
    pub fn subscription_count(&self) -> usize {
        self.listeners.read().values().map(Vec::len).sum()
    }

    /// Number of listeners on one topic.
    pub fn topic_count(&self, topic: &Topic) -> usize {
        self.listeners.read().get(topic).map_or(0, Vec::len)
    }

    /// Stop delivering events.
    ///
    /// Blocks until a broadcast running on another thread has finished. When
    /// called from inside a callback, the rest of that broadcast is skipped.
    pub fn close(&self) {
        let _serial = self.serial.lock();
        self.closed.store(true, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    // --- Broadcasting ---

    /// Broadcast a record to its named, message and document listeners.
    pub fn dispatch(&self, record: &Record) {
        let _serial = self.serial.lock();

        if let Some(name) = &record.event {
            self.emit(
                &Topic::Event(name.clone()),
                ChannelEvent::Event {
                    name: name.clone(),
                    payload: record.payload.clone(),
                },
            );
        }

        self.emit(
            &Topic::Message,
            ChannelEvent::Message {
                payload: record.payload.clone(),
            },
        );

        self.emit(
            &Topic::Document,
            ChannelEvent::Document {
                record: record.clone(),
            },
        );
    }

    /// Broadcast an event to every listener on `topic`.
    ///
    /// Callbacks run outside the registry lock, so they may subscribe or
    /// unsubscribe. Channel listeners that cannot take the event are dropped.
    /// Does nothing after [`Fanout::close`].
    pub fn emit(&self, topic: &Topic, event: ChannelEvent) {
        let _serial = self.serial.lock();

        let sinks: Vec<(SubscriptionId, Sink)> = match self.listeners.read().get(topic) {
            Some(list) => list.iter().map(|l| (l.id, l.sink.clone())).collect(),
            None => return,
        };

        let mut to_remove = Vec::new();
        for (id, sink) in sinks {
            if self.is_closed() {
                break;
            }
            match sink {
                Sink::Callback(callback) => callback(&event),
                Sink::Channel(sender) => match sender.try_send(event.clone()) {
                    Ok(()) => {}
                    Err(crossbeam_channel::TrySendError::Full(_)) => {
                        to_remove.push((id, DropReason::BufferOverflow))
                    }
                    Err(crossbeam_channel::TrySendError::Disconnected(_)) => {
                        to_remove.push((id, DropReason::Disconnected))
                    }
                },
            }
        }

        // Remove dropped listeners
        if !to_remove.is_empty() {
            let mut listeners = self.listeners.write();
            for (id, reason) in to_remove {
                warn!(subscription = id.0, %topic, ?reason, "dropping listener");
                if let Some(list) = listeners.get_mut(topic) {
                    if let Some(index) = list.iter().position(|l| l.id == id) {
                        let listener = list.remove(index);
                        if let Sink::Channel(sender) = listener.sink {
                            // Might fail, that's ok
                            let _ = sender.try_send(ChannelEvent::Dropped { reason });
                        }
                    }
                }
            }
            listeners.retain(|_, list| !list.is_empty());
        }
    }
}

impl Default for Fanout {
    fn default() -> Self {
        Self::new()
    }
}
