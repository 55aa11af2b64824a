//! # tailcast
//!
//! Publish/subscribe channels over a capped, append-only record log.
//!
//! ## Core Concepts
//!
//! - **Log**: a capped, insertion-ordered store of records with blocking tail reads
//! - **Channel**: tails one log and fans every new record out to subscribers
//! - **Position**: identifier of the last record seen, used to resume after
//!   a stream ends
//! - **Readiness**: publishers are queued until the log handle is usable
//!
//! ## Example
//!
//! ```ignore
//! use tailcast::{Channel, ChannelConfig, EventSource, MemoryStore, Payload};
//!
//! let store = Arc::new(MemoryStore::new());
//! let channel = Channel::open(store, ChannelConfig::new("chat"))?;
//!
//! channel.subscribe("message", |payload| {
//!     println!("got {:?}", payload);
//! });
//!
//! channel.publish_with("message", Payload::json(&json!({"text": "hi"}))?, |result| {
//!     println!("stored at {:?}", result.map(|r| r.position));
//! });
//! ```

pub mod channel;
pub mod engine;
pub mod error;
pub mod fanout;
pub mod gate;
pub mod store;
pub mod types;

// Re-exports
pub use channel::{Channel, ChannelConfig, EventSource, PublishCallback, Readiness};
pub use engine::EngineState;
pub use error::{ChannelError, Result, StoreError};
pub use fanout::{
    ChannelEvent, DropReason, Fanout, Subscription, SubscriptionConfig, SubscriptionHandle,
    SubscriptionId, Topic,
};
pub use gate::ReadyGate;
pub use store::{Interruption, LogStore, MemoryStore, StreamEvent, TailStream, Termination};
pub use types::*;
