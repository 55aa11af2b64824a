//! Core types shared by the channel and its backing log.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use crate::error::{ChannelError, Result};

/// Identifier of a record in a log. Strictly increasing in insertion order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default)]
pub struct Position(pub u64);

impl fmt::Debug for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Pos({})", self.0)
    }
}

impl fmt::Display for Position {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Microseconds since Unix epoch.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Timestamp(pub i64);

impl Timestamp {
    /// Current time.
    pub fn now() -> Self {
        let micros = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as i64)
            .unwrap_or(0);
        Timestamp(micros)
    }
}

impl fmt::Debug for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Timestamp({})", self.0)
    }
}

/// Payload encoding format.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum PayloadEncoding {
    #[default]
    Json,
    MessagePack,
    /// Opaque bytes. [`Payload::decode`] refuses these.
    Raw,
}

/// Opaque message body carried by a record.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payload {
    pub bytes: Vec<u8>,
    pub encoding: PayloadEncoding,
}

impl Payload {
    /// JSON-encode a value.
    pub fn json(value: &impl Serialize) -> Result<Self> {
        Ok(Self {
            bytes: serde_json::to_vec(value)?,
            encoding: PayloadEncoding::Json,
        })
    }

    /// MessagePack-encode a value.
    pub fn msgpack(value: &impl Serialize) -> Result<Self> {
        Ok(Self {
            bytes: rmp_serde::to_vec_named(value)?,
            encoding: PayloadEncoding::MessagePack,
        })
    }

    /// Wrap raw bytes.
    pub fn raw(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            encoding: PayloadEncoding::Raw,
        }
    }

    /// Decode the payload according to its encoding.
    ///
    /// Raw payloads carry no declared format and are never decoded; read
    /// `bytes` directly.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        match self.encoding {
            PayloadEncoding::Json => serde_json::from_slice(&self.bytes)
                .map_err(|e| ChannelError::Deserialization(e.to_string())),
            PayloadEncoding::MessagePack => Ok(rmp_serde::from_slice(&self.bytes)?),
            PayloadEncoding::Raw => Err(ChannelError::Deserialization(format!(
                "raw payload of {} bytes has no encoding to decode",
                self.bytes.len()
            ))),
        }
    }

    /// Decode into a dynamic JSON value.
    pub fn to_json(&self) -> Result<serde_json::Value> {
        self.decode()
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

impl fmt::Debug for Payload {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.encoding {
            PayloadEncoding::Json => write!(f, "Payload({})", String::from_utf8_lossy(&self.bytes)),
            _ => write!(f, "Payload({:?}, {} bytes)", self.encoding, self.bytes.len()),
        }
    }
}

/// A single entry in a log.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Record {
    /// Position in the log (assigned by the store).
    pub position: Position,

    /// Logical event name, if the producer gave one.
    pub event: Option<String>,

    /// Message body.
    pub payload: Payload,

    /// When the store accepted the record.
    pub timestamp: Timestamp,
}

impl Record {
    /// Approximate stored size, used for capacity accounting.
    pub fn size_bytes(&self) -> usize {
        self.payload.len() + self.event.as_ref().map_or(0, |e| e.len()) + 16
    }
}

/// Input for appending a record (before position is assigned).
#[derive(Clone, Debug)]
pub struct RecordInput {
    pub event: Option<String>,
    pub payload: Payload,
}

impl RecordInput {
    /// Create an input with a JSON payload.
    pub fn json(event: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            event: Some(event.into()),
            payload: Payload::json(payload)?,
        })
    }

    /// Create an input with a MessagePack payload.
    pub fn msgpack(event: impl Into<String>, payload: &impl Serialize) -> Result<Self> {
        Ok(Self {
            event: Some(event.into()),
            payload: Payload::msgpack(payload)?,
        })
    }

    /// Create an input with raw bytes.
    pub fn raw(event: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            event: Some(event.into()),
            payload: Payload::raw(payload),
        }
    }

    /// Create an input that carries no event name.
    pub fn unnamed(payload: Payload) -> Self {
        Self {
            event: None,
            payload,
        }
    }
}

/// Opaque reference to a provisioned log resource.
///
/// Handles are replaced, never mutated: re-provisioning yields a new handle,
/// and a store that swaps the underlying resource bumps the generation.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct LogHandle {
    name: Arc<str>,
    generation: u64,
}

impl LogHandle {
    pub fn new(name: impl Into<Arc<str>>, generation: u64) -> Self {
        Self {
            name: name.into(),
            generation,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl fmt::Debug for LogHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LogHandle({}#{})", self.name, self.generation)
    }
}

/// Options used when creating a capped log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CappedOptions {
    /// Maximum total payload size before the oldest records are evicted.
    /// Default: 5MB
    pub capacity_bytes: u64,

    /// Maximum number of records kept (None = bounded by size only).
    pub max_records: Option<u64>,

    /// Fail instead of opening when the log already exists.
    pub strict: bool,
}

impl Default for CappedOptions {
    fn default() -> Self {
        Self {
            capacity_bytes: 5 * 1024 * 1024, // 5MB
            max_records: None,
            strict: false,
        }
    }
}

/// Options for a blocking tail read.
#[derive(Clone, Debug)]
pub struct TailOptions {
    /// Block waiting for new records instead of ending when caught up.
    pub await_data: bool,

    /// How often the store re-checks for new data while blocked.
    pub retry_interval: Duration,

    /// Idle window after which the stream ends with an idle timeout.
    pub max_wait: Duration,
}

impl Default for TailOptions {
    fn default() -> Self {
        Self {
            await_data: true,
            retry_interval: Duration::from_millis(200),
            max_wait: Duration::from_secs(10),
        }
    }
}

/// Whether an append waits for the store to confirm the write.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum WriteConcern {
    /// Fire and forget; the store may not return the written record.
    Unacknowledged,
    /// Wait for the store and return the written record.
    Acknowledged,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_position_ordering() {
        assert!(Position(1) < Position(2));
        assert_eq!(Some(Position(3)).max(None), Some(Position(3)));
    }

    #[test]
    fn test_payload_decode_json() {
        let payload = Payload::json(&json!({"n": 1})).unwrap();
        let value: serde_json::Value = payload.decode().unwrap();
        assert_eq!(value["n"], 1);
    }

    #[test]
    fn test_payload_decode_msgpack() {
        #[derive(Serialize, Deserialize, PartialEq, Debug)]
        struct Tick {
            n: u32,
        }

        let payload = Payload::msgpack(&Tick { n: 7 }).unwrap();
        assert_eq!(payload.encoding, PayloadEncoding::MessagePack);
        assert_eq!(payload.decode::<Tick>().unwrap(), Tick { n: 7 });
    }

    #[test]
    fn test_payload_decode_garbage() {
        let payload = Payload {
            bytes: b"not json".to_vec(),
            encoding: PayloadEncoding::Json,
        };
        let result = payload.decode::<serde_json::Value>();
        assert!(matches!(result, Err(ChannelError::Deserialization(_))));
    }

    #[test]
    fn test_raw_payload_is_not_decoded() {
        // Valid JSON bytes, but raw payloads never guess a format
        let payload = Payload::raw(b"{\"n\":1}".to_vec());
        assert!(matches!(
            payload.decode::<serde_json::Value>(),
            Err(ChannelError::Deserialization(_))
        ));
        assert!(payload.to_json().is_err());
        assert_eq!(payload.bytes, b"{\"n\":1}");
    }

    #[test]
    fn test_record_input_unnamed() {
        let input = RecordInput::unnamed(Payload::raw(b"{}".to_vec()));
        assert!(input.event.is_none());
    }

    #[test]
    fn test_handle_identity() {
        let a = LogHandle::new("events", 1);
        let b = LogHandle::new("events", 2);
        assert_ne!(a, b);
        assert_eq!(a.name(), "events");
        assert_eq!(b.generation(), 2);
    }
}
