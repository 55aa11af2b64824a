//! Channel struct tying the engine, fanout and publish gate together.

use crate::engine::{self, EngineState, PublishJob, Shared};
use crate::error::{ChannelError, Result};
use crate::fanout::{
    ChannelEvent, Subscription, SubscriptionConfig, SubscriptionHandle, SubscriptionId, Topic,
};
use crate::store::LogStore;
use crate::types::{
    CappedOptions, LogHandle, Payload, Position, Record, RecordInput, TailOptions,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Channel configuration.
#[derive(Clone, Debug)]
pub struct ChannelConfig {
    /// Name of the backing log.
    pub name: String,

    /// Options used if the log has to be created.
    pub capped: CappedOptions,

    /// How often a blocked tail read re-checks for data.
    pub retry_interval: Duration,

    /// Idle window after which a tail stream ends and is reopened.
    pub max_wait: Duration,

    /// Re-provision the log and keep tailing after a stream read error.
    pub recreate: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            name: "events".to_string(),
            capped: CappedOptions::default(),
            retry_interval: Duration::from_millis(200),
            max_wait: Duration::from_secs(10),
            recreate: true,
        }
    }
}

impl ChannelConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }

    pub fn with_capped(mut self, capped: CappedOptions) -> Self {
        self.capped = capped;
        self
    }

    pub fn with_retry_interval(mut self, interval: Duration) -> Self {
        self.retry_interval = interval;
        self
    }

    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    pub fn with_recreate(mut self, recreate: bool) -> Self {
        self.recreate = recreate;
        self
    }

    /// Tail read options derived from this config. Channel streams always
    /// block for new data.
    pub fn tail_options(&self) -> TailOptions {
        TailOptions {
            await_data: true,
            retry_interval: self.retry_interval,
            max_wait: self.max_wait,
        }
    }
}

/// Continuation for a confirmed publish.
pub type PublishCallback = Box<dyn FnOnce(Result<Record>) + Send + 'static>;

/// Waiting for a channel's log handle.
pub trait Readiness {
    /// Run `callback` once the log handle is usable, or with the error that
    /// prevented it. Runs immediately if that is already known.
    fn when_ready<F>(&self, callback: F)
    where
        F: FnOnce(Result<LogHandle>) + Send + 'static;

    /// Block until ready, or `None` on timeout.
    fn wait_ready(&self, timeout: Duration) -> Option<Result<LogHandle>>;
}

/// Subscribing to a channel's events.
pub trait EventSource {
    /// Register a callback for every event on `topic`.
    fn on<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static;

    /// Register a bounded channel listener on `topic`.
    fn listen(&self, topic: Topic, config: SubscriptionConfig) -> SubscriptionHandle;

    /// Remove a callback or listener by ID.
    fn unsubscribe(&self, id: SubscriptionId) -> bool;

    /// Payloads of records published under `event`.
    fn subscribe<F>(&self, event: impl Into<String>, callback: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.on(Topic::Event(event.into()), move |event| {
            if let Some(payload) = event.payload() {
                callback(payload);
            }
        })
    }

    /// Payloads of every record.
    fn subscribe_messages<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Payload) + Send + Sync + 'static,
    {
        self.on(Topic::Message, move |event| {
            if let Some(payload) = event.payload() {
                callback(payload);
            }
        })
    }

    /// Every record in full.
    fn subscribe_documents<F>(&self, callback: F) -> Subscription
    where
        F: Fn(&Record) + Send + Sync + 'static,
    {
        self.on(Topic::Document, move |event| {
            if let ChannelEvent::Document { record } = event {
                callback(record);
            }
        })
    }
}

/// A publish/subscribe channel over a capped log.
///
/// Opening a channel starts its engine thread, which provisions the log,
/// seeds the position from the current tail and keeps a tail stream open.
/// Records appended after that point reach subscribers in log order.
///
/// Dropping the channel closes it.
pub struct Channel {
    shared: Arc<Shared>,
}

impl Channel {
    /// Open a channel and start tailing.
    pub fn open(store: Arc<dyn LogStore>, config: ChannelConfig) -> Result<Self> {
        let (shared, queue) = Shared::new(store, config);
        let shared = Arc::new(shared);

        let started = engine::spawn_publisher(&shared, queue).and_then(|()| engine::spawn(&shared));
        if let Err(error) = started {
            shared.close();
            return Err(error);
        }
        Ok(Self { shared })
    }

    /// Open a channel with default settings on the named log.
    pub fn with_name(store: Arc<dyn LogStore>, name: impl Into<String>) -> Result<Self> {
        Self::open(store, ChannelConfig::new(name))
    }

    pub fn name(&self) -> &str {
        &self.shared.config.name
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.shared.config
    }

    // --- Publishing ---

    /// Append a named event without waiting for confirmation.
    ///
    /// Failures surface through `Topic::Error`.
    pub fn publish(&self, event: impl Into<String>, payload: Payload) -> &Self {
        self.publish_record(
            RecordInput {
                event: Some(event.into()),
                payload,
            },
            None,
        )
    }

    /// Append a named event and report the stored record to `callback`.
    pub fn publish_with<F>(&self, event: impl Into<String>, payload: Payload, callback: F) -> &Self
    where
        F: FnOnce(Result<Record>) + Send + 'static,
    {
        self.publish_record(
            RecordInput {
                event: Some(event.into()),
                payload,
            },
            Some(Box::new(callback)),
        )
    }

    /// JSON-encode `value` and publish it without confirmation.
    pub fn publish_json(&self, event: impl Into<String>, value: &impl Serialize) -> Result<&Self> {
        Ok(self.publish(event, Payload::json(value)?))
    }

    /// Publish an input, queueing it until the log handle is ready.
    ///
    /// With a callback the append is acknowledged and the callback receives
    /// the stored record or the failure. Without one the append is fire and
    /// forget. Returns immediately either way: appends run on the channel's
    /// publish thread, in the order they were queued.
    pub fn publish_record(&self, input: RecordInput, callback: Option<PublishCallback>) -> &Self {
        if self.shared.is_closed() {
            if let Some(callback) = callback {
                callback(Err(ChannelError::Closed));
            }
            return self;
        }

        let shared = Arc::clone(&self.shared);
        self.shared.current_gate().on_ready(move |outcome| match outcome {
            Ok(handle) => shared.submit(PublishJob {
                handle,
                input,
                callback,
            }),
            Err(error) => match callback {
                Some(callback) => callback(Err(error)),
                None => debug!(%error, "dropping unconfirmed publish"),
            },
        });

        self
    }

    // --- Lifecycle ---

    /// Close the channel.
    ///
    /// In-flight reads are left to finish, but nothing is emitted afterwards
    /// and queued publishers receive [`ChannelError::Closed`].
    pub fn close(&self) -> &Self {
        if self.shared.close() {
            debug!(log = %self.name(), "channel closed");
        }
        self
    }

    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    /// Start a new engine after the previous one stopped.
    ///
    /// The new engine re-provisions the log and resumes after the tracked
    /// position. Returns `Ok(false)` if an engine is still running.
    pub fn relisten(&self) -> Result<bool> {
        engine::spawn(&self.shared)
    }

    // --- Introspection ---

    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Last position delivered to subscribers (or seeded from the tail).
    pub fn position(&self) -> Option<Position> {
        self.shared.position.current()
    }

    /// Handle of the most recently opened stream.
    pub fn handle(&self) -> Option<LogHandle> {
        self.shared.handle()
    }

    pub fn subscription_count(&self) -> usize {
        self.shared.fanout.subscription_count()
    }
}

impl Readiness for Channel {
    fn when_ready<F>(&self, callback: F)
    where
        F: FnOnce(Result<LogHandle>) + Send + 'static,
    {
        self.shared.current_gate().on_ready(callback);
    }

    fn wait_ready(&self, timeout: Duration) -> Option<Result<LogHandle>> {
        self.shared.current_gate().wait_timeout(timeout)
    }
}

impl EventSource for Channel {
    fn on<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: Fn(&ChannelEvent) + Send + Sync + 'static,
    {
        self.shared.fanout.on(topic, callback)
    }

    fn listen(&self, topic: Topic, config: SubscriptionConfig) -> SubscriptionHandle {
        self.shared.fanout.listen(topic, config)
    }

    fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.shared.fanout.unsubscribe(id)
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.close();
    }
}
