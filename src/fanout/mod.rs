//! In-process fanout of records and lifecycle events.
//!
//! Every record read from the log is broadcast on up to three topics:
//! - `Topic::Event(name)` with the payload, when the record has a name
//! - `Topic::Message` with the payload
//! - `Topic::Document` with the full record
//!
//! Lifecycle notifications go to `Topic::Ready`, `Topic::Closed` and
//! `Topic::Error`.
//!
//! Listeners are either callbacks or bounded `crossbeam-channel` receivers.
//! Channel listeners that fall behind are dropped.
//!
//! # Example
//!
//! ```ignore
//! let fanout = Arc::new(Fanout::new());
//!
//! let sub = fanout.on(Topic::event("foo"), |event| println!("{:?}", event));
//! let handle = fanout.listen(Topic::Message, SubscriptionConfig::default());
//!
//! fanout.dispatch(&record);
//! sub.unsubscribe();
//! ```

mod manager;
mod types;

pub use manager::Fanout;
pub use types::{
    ChannelEvent, DropReason, Subscription, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, Topic,
};
