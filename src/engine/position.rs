//! Tracks the last record observed by the engine.

use crate::error::StoreError;
use crate::store::LogStore;
use crate::types::{LogHandle, Position, Record};
use parking_lot::Mutex;

struct TrackerState {
    seeded: bool,
    position: Option<Position>,
}

/// Resume point for tail streams.
///
/// The first call to [`PositionTracker::resume_point`] seeds the position
/// from the current tail of the log, so a new channel only sees records
/// appended after it attached. Later calls return the tracked value.
pub(crate) struct PositionTracker {
    state: Mutex<TrackerState>,
}

impl PositionTracker {
    pub(crate) fn new() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                seeded: false,
                position: None,
            }),
        }
    }

    /// Position to resume after, seeding it on first use.
    pub(crate) fn resume_point(
        &self,
        store: &dyn LogStore,
        handle: &LogHandle,
    ) -> Result<Option<Position>, StoreError> {
        let mut state = self.state.lock();
        if !state.seeded {
            state.position = store.read_last(handle)?.map(|record| record.position);
            state.seeded = true;
        }
        Ok(state.position)
    }

    /// Record that `record` was received.
    pub(crate) fn advance(&self, record: &Record) {
        self.state.lock().position = Some(record.position);
    }

    pub(crate) fn current(&self) -> Option<Position> {
        self.state.lock().position
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use crate::types::{CappedOptions, RecordInput, WriteConcern};

    #[test]
    fn test_seed_empty_log() {
        let store = MemoryStore::new();
        let handle = store.create_or_open("events", &CappedOptions::default()).unwrap();

        let tracker = PositionTracker::new();
        assert_eq!(tracker.resume_point(&store, &handle).unwrap(), None);
    }

    #[test]
    fn test_seed_reads_tail_once() {
        let store = MemoryStore::new();
        let handle = store.create_or_open("events", &CappedOptions::default()).unwrap();
        let input = RecordInput::raw("test", b"{}".to_vec());
        let tail = store
            .append(&handle, input.clone(), WriteConcern::Acknowledged)
            .unwrap()
            .unwrap();

        let tracker = PositionTracker::new();
        assert_eq!(tracker.resume_point(&store, &handle).unwrap(), Some(tail.position));

        // Later appends do not move an already seeded position
        store.append(&handle, input, WriteConcern::Acknowledged).unwrap();
        assert_eq!(tracker.resume_point(&store, &handle).unwrap(), Some(tail.position));
    }

    #[test]
    fn test_advance() {
        let store = MemoryStore::new();
        let handle = store.create_or_open("events", &CappedOptions::default()).unwrap();
        let tracker = PositionTracker::new();
        tracker.resume_point(&store, &handle).unwrap();

        let record = store
            .append(&handle, RecordInput::raw("test", b"{}".to_vec()), WriteConcern::Acknowledged)
            .unwrap()
            .unwrap();
        tracker.advance(&record);

        assert_eq!(tracker.current(), Some(record.position));
        assert_eq!(tracker.resume_point(&store, &handle).unwrap(), Some(record.position));
    }
}
