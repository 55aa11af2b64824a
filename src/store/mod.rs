//! Backing log store interface.
//!
//! A channel talks to its log exclusively through [`LogStore`]. The store is
//! expected to provide:
//! - Idempotent create-or-open of a named capped log
//! - Appends with optional write confirmation
//! - A "last record" read used to seed the starting position
//! - Blocking tail reads that resume strictly after a position
//!
//! [`MemoryStore`] is the in-process implementation used by tests and by
//! embedders that do not need persistence.

mod memory;

pub use memory::{Interruption, MemoryStore};

use crate::error::StoreError;
use crate::types::{CappedOptions, LogHandle, Position, Record, RecordInput, TailOptions, WriteConcern};

/// Why a tail stream ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Termination {
    /// The server-side idle window elapsed with no new records.
    IdleTimeout,
    /// The stream failed while reading.
    ReadError(StoreError),
}

/// Item yielded by a [`TailStream`].
#[derive(Clone, Debug)]
pub enum StreamEvent {
    Record(Record),
    End(Termination),
}

/// A live, blocking read over a log.
///
/// After yielding [`StreamEvent::End`] the stream is exhausted; further calls
/// keep returning the same termination.
pub trait TailStream: Send {
    /// Block until the next record arrives or the stream ends.
    fn next_event(&mut self) -> StreamEvent;
}

/// Storage collaborator for a channel.
pub trait LogStore: Send + Sync + 'static {
    /// Block until the store connection is usable.
    fn await_connection(&self) -> Result<(), StoreError> {
        Ok(())
    }

    /// Create the log if missing, otherwise open it.
    fn create_or_open(&self, name: &str, options: &CappedOptions) -> Result<LogHandle, StoreError>;

    /// Append a record. Returns the stored record when `concern` is
    /// [`WriteConcern::Acknowledged`].
    fn append(
        &self,
        handle: &LogHandle,
        input: RecordInput,
        concern: WriteConcern,
    ) -> Result<Option<Record>, StoreError>;

    /// Read the most recent record in insertion order.
    fn read_last(&self, handle: &LogHandle) -> Result<Option<Record>, StoreError>;

    /// Open a tail stream yielding records strictly after `after`
    /// (from the oldest retained record when `None`).
    fn open_tail(
        &self,
        handle: &LogHandle,
        after: Option<Position>,
        options: &TailOptions,
    ) -> Result<Box<dyn TailStream>, StoreError>;
}
