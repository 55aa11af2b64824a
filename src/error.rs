//! Error types for the channel and its backing store.

use thiserror::Error;

/// Errors reported by a [`LogStore`](crate::store::LogStore).
///
/// Cloneable so a single failure can be handed to every waiter on a gate.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    #[error("Store is not connected")]
    Disconnected,

    #[error("Log already exists: {0}")]
    LogExists(String),

    #[error("Log not found: {0}")]
    LogNotFound(String),

    #[error("Conflicting options for existing log {name}: {detail}")]
    OptionsConflict { name: String, detail: String },

    #[error("Stale handle for {name}: generation {held}, current {current}")]
    StaleHandle { name: String, held: u64, current: u64 },

    #[error("Record too large: {size} bytes (capacity {capacity})")]
    RecordTooLarge { size: u64, capacity: u64 },

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("Read error: {0}")]
    Read(String),
}

/// Main error type for channel operations.
#[derive(Clone, Debug, Error)]
pub enum ChannelError {
    #[error("Failed to provision log: {0}")]
    Provision(StoreError),

    #[error("Failed to open tail stream: {0}")]
    StreamOpen(StoreError),

    #[error("Tail stream failed: {0}")]
    StreamRead(StoreError),

    #[error("Publish failed: {0}")]
    Publish(StoreError),

    #[error("Channel is closed")]
    Closed,

    #[error("Failed to spawn engine thread: {0}")]
    Spawn(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),
}

impl ChannelError {
    /// The store error underneath, if any.
    pub fn store_error(&self) -> Option<&StoreError> {
        match self {
            ChannelError::Provision(e)
            | ChannelError::StreamOpen(e)
            | ChannelError::StreamRead(e)
            | ChannelError::Publish(e) => Some(e),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for ChannelError {
    fn from(e: serde_json::Error) -> Self {
        ChannelError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::encode::Error> for ChannelError {
    fn from(e: rmp_serde::encode::Error) -> Self {
        ChannelError::Serialization(e.to_string())
    }
}

impl From<rmp_serde::decode::Error> for ChannelError {
    fn from(e: rmp_serde::decode::Error) -> Self {
        ChannelError::Deserialization(e.to_string())
    }
}

/// Result type for channel operations.
pub type Result<T> = std::result::Result<T, ChannelError>;
