//! In-memory capped log store.
//!
//! Each named log keeps its records in insertion order and evicts the oldest
//! ones once `max_records` or `capacity_bytes` is exceeded. Positions are
//! allocated from a store-wide counter so they stay monotonic even when a log
//! is dropped and recreated.

use crate::error::StoreError;
use crate::types::{
    CappedOptions, LogHandle, Position, Record, RecordInput, TailOptions, Timestamp, WriteConcern,
};
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tracing::debug;

use super::{LogStore, StreamEvent, TailStream, Termination};

/// A fault injected into the live tail streams of a log.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Interruption {
    /// End streams as if the idle window elapsed.
    Idle,
    /// Fail streams with a read error.
    Error(String),
}

/// One-shot failures for the next matching call.
#[derive(Default)]
struct Faults {
    create: Option<String>,
    open: Option<String>,
    append: Option<String>,
}

struct LogState {
    records: VecDeque<Record>,
    bytes: u64,
    /// Bumped on every injected interruption.
    interrupts: u64,
    last_interrupt: Option<Interruption>,
    /// Set when the log is replaced by `recreate`.
    retired: bool,
}

/// A single capped log.
struct MemoryLog {
    generation: u64,
    options: CappedOptions,
    state: Mutex<LogState>,
    /// Signalled on append, interruption and retirement.
    changed: Condvar,
}

impl MemoryLog {
    fn new(generation: u64, options: CappedOptions) -> Self {
        Self {
            generation,
            options,
            state: Mutex::new(LogState {
                records: VecDeque::new(),
                bytes: 0,
                interrupts: 0,
                last_interrupt: None,
                retired: false,
            }),
            changed: Condvar::new(),
        }
    }

    /// Evict oldest records until the log fits its caps.
    fn enforce_caps(&self, state: &mut LogState) {
        let max_records = self.options.max_records.unwrap_or(u64::MAX);
        while state.records.len() as u64 > max_records || state.bytes > self.options.capacity_bytes {
            match state.records.pop_front() {
                Some(evicted) => state.bytes -= evicted.size_bytes() as u64,
                None => break,
            }
        }
    }
}

/// In-process [`LogStore`] with capped logs and blocking tail reads.
pub struct MemoryStore {
    connected: Mutex<bool>,
    connection: Condvar,
    logs: RwLock<HashMap<String, Arc<MemoryLog>>>,
    next_generation: AtomicU64,
    next_position: AtomicU64,
    faults: Mutex<Faults>,
}

impl MemoryStore {
    /// Create a connected store.
    pub fn new() -> Self {
        Self::with_connection(true)
    }

    /// Create a store whose connection is not yet established.
    ///
    /// Provisioning blocks until [`MemoryStore::connect`] is called.
    pub fn disconnected() -> Self {
        Self::with_connection(false)
    }

    fn with_connection(connected: bool) -> Self {
        Self {
            connected: Mutex::new(connected),
            connection: Condvar::new(),
            logs: RwLock::new(HashMap::new()),
            next_generation: AtomicU64::new(1),
            next_position: AtomicU64::new(1),
            faults: Mutex::new(Faults::default()),
        }
    }

    /// Establish the connection and wake anyone waiting on it.
    pub fn connect(&self) {
        *self.connected.lock() = true;
        self.connection.notify_all();
    }

    /// Drop the connection. Calls fail with `Disconnected` and provisioning
    /// blocks until the next [`MemoryStore::connect`].
    pub fn disconnect(&self) {
        *self.connected.lock() = false;
    }

    pub fn is_connected(&self) -> bool {
        *self.connected.lock()
    }

    // --- Fault Injection ---

    /// Reject the next `create_or_open` with a transport error.
    pub fn fail_create(&self, message: impl Into<String>) {
        self.faults.lock().create = Some(message.into());
    }

    /// Reject the next `open_tail` with a transport error.
    pub fn fail_open(&self, message: impl Into<String>) {
        self.faults.lock().open = Some(message.into());
    }

    /// Reject the next `append` with a transport error.
    pub fn fail_append(&self, message: impl Into<String>) {
        self.faults.lock().append = Some(message.into());
    }

    /// Terminate every tail stream currently open on `name`.
    ///
    /// Streams opened afterwards are unaffected. Returns false if the log
    /// does not exist.
    pub fn interrupt(&self, name: &str, interruption: Interruption) -> bool {
        let Some(log) = self.logs.read().get(name).cloned() else {
            return false;
        };

        {
            let mut state = log.state.lock();
            state.interrupts += 1;
            state.last_interrupt = Some(interruption);
        }
        log.changed.notify_all();
        true
    }

    /// Replace `name` with a fresh, empty log under a new generation.
    ///
    /// Live streams on the old log fail with a read error and handles to it
    /// become stale.
    pub fn recreate(&self, name: &str) -> bool {
        let mut logs = self.logs.write();
        let Some(old) = logs.get(name).cloned() else {
            return false;
        };

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        logs.insert(
            name.to_string(),
            Arc::new(MemoryLog::new(generation, old.options.clone())),
        );
        drop(logs);

        old.state.lock().retired = true;
        old.changed.notify_all();
        debug!(log = name, generation, "log recreated");
        true
    }

    // --- Inspection ---

    /// Records currently retained by `name`, oldest first.
    pub fn records(&self, name: &str) -> Vec<Record> {
        self.logs
            .read()
            .get(name)
            .map(|log| log.state.lock().records.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Number of records retained by `name`.
    pub fn len(&self, name: &str) -> usize {
        self.logs
            .read()
            .get(name)
            .map_or(0, |log| log.state.lock().records.len())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.logs.read().contains_key(name)
    }

    /// Resolve a handle to its log, rejecting stale generations.
    fn resolve(&self, handle: &LogHandle) -> Result<Arc<MemoryLog>, StoreError> {
        let logs = self.logs.read();
        let log = logs
            .get(handle.name())
            .ok_or_else(|| StoreError::LogNotFound(handle.name().to_string()))?;

        if log.generation != handle.generation() {
            return Err(StoreError::StaleHandle {
                name: handle.name().to_string(),
                held: handle.generation(),
                current: log.generation,
            });
        }
        Ok(Arc::clone(log))
    }

    fn ensure_connected(&self) -> Result<(), StoreError> {
        if self.is_connected() {
            Ok(())
        } else {
            Err(StoreError::Disconnected)
        }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl LogStore for MemoryStore {
    fn await_connection(&self) -> Result<(), StoreError> {
        let mut connected = self.connected.lock();
        while !*connected {
            self.connection.wait(&mut connected);
        }
        Ok(())
    }

    fn create_or_open(&self, name: &str, options: &CappedOptions) -> Result<LogHandle, StoreError> {
        self.ensure_connected()?;
        if let Some(message) = self.faults.lock().create.take() {
            return Err(StoreError::Transport(message));
        }

        let mut logs = self.logs.write();
        if let Some(existing) = logs.get(name) {
            if options.strict {
                return Err(StoreError::LogExists(name.to_string()));
            }
            if existing.options.capacity_bytes != options.capacity_bytes
                || existing.options.max_records != options.max_records
            {
                return Err(StoreError::OptionsConflict {
                    name: name.to_string(),
                    detail: format!(
                        "existing {:?}/{:?}, requested {:?}/{:?}",
                        existing.options.capacity_bytes,
                        existing.options.max_records,
                        options.capacity_bytes,
                        options.max_records
                    ),
                });
            }
            return Ok(LogHandle::new(name, existing.generation));
        }

        let generation = self.next_generation.fetch_add(1, Ordering::SeqCst);
        logs.insert(
            name.to_string(),
            Arc::new(MemoryLog::new(generation, options.clone())),
        );
        debug!(log = name, generation, "log created");
        Ok(LogHandle::new(name, generation))
    }

    fn append(
        &self,
        handle: &LogHandle,
        input: RecordInput,
        concern: WriteConcern,
    ) -> Result<Option<Record>, StoreError> {
        self.ensure_connected()?;
        if let Some(message) = self.faults.lock().append.take() {
            return Err(StoreError::Transport(message));
        }

        let log = self.resolve(handle)?;
        let mut state = log.state.lock();
        if state.retired {
            return Err(StoreError::LogNotFound(handle.name().to_string()));
        }

        // Allocate under the log lock so positions follow insertion order.
        let record = Record {
            position: Position(self.next_position.fetch_add(1, Ordering::SeqCst)),
            event: input.event,
            payload: input.payload,
            timestamp: Timestamp::now(),
        };

        let size = record.size_bytes() as u64;
        if size > log.options.capacity_bytes {
            return Err(StoreError::RecordTooLarge {
                size,
                capacity: log.options.capacity_bytes,
            });
        }

        state.bytes += size;
        state.records.push_back(record.clone());
        log.enforce_caps(&mut state);
        drop(state);
        log.changed.notify_all();

        Ok(match concern {
            WriteConcern::Acknowledged => Some(record),
            WriteConcern::Unacknowledged => None,
        })
    }

    fn read_last(&self, handle: &LogHandle) -> Result<Option<Record>, StoreError> {
        self.ensure_connected()?;
        let log = self.resolve(handle)?;
        let state = log.state.lock();
        Ok(state.records.back().cloned())
    }

    fn open_tail(
        &self,
        handle: &LogHandle,
        after: Option<Position>,
        options: &TailOptions,
    ) -> Result<Box<dyn TailStream>, StoreError> {
        self.ensure_connected()?;
        if let Some(message) = self.faults.lock().open.take() {
            return Err(StoreError::Transport(message));
        }

        let log = self.resolve(handle)?;
        let seen_interrupts = log.state.lock().interrupts;

        Ok(Box::new(MemoryTail {
            log,
            after,
            options: options.clone(),
            seen_interrupts,
            ended: None,
        }))
    }
}

/// Blocking tail read over a [`MemoryLog`].
struct MemoryTail {
    log: Arc<MemoryLog>,
    after: Option<Position>,
    options: TailOptions,
    seen_interrupts: u64,
    ended: Option<Termination>,
}

impl MemoryTail {
    fn end(&mut self, termination: Termination) -> StreamEvent {
        self.ended = Some(termination.clone());
        StreamEvent::End(termination)
    }
}

impl TailStream for MemoryTail {
    fn next_event(&mut self) -> StreamEvent {
        if let Some(termination) = &self.ended {
            return StreamEvent::End(termination.clone());
        }

        let log = Arc::clone(&self.log);
        let mut state = log.state.lock();
        let idle_deadline = Instant::now() + self.options.max_wait;

        loop {
            if state.interrupts > self.seen_interrupts {
                self.seen_interrupts = state.interrupts;
                let termination = match &state.last_interrupt {
                    Some(Interruption::Error(message)) => {
                        Termination::ReadError(StoreError::Read(message.clone()))
                    }
                    _ => Termination::IdleTimeout,
                };
                return self.end(termination);
            }

            if state.retired {
                return self.end(Termination::ReadError(StoreError::Read(
                    "log was dropped".to_string(),
                )));
            }

            let after = self.after;
            let next = state.records.partition_point(|r| Some(r.position) <= after);
            if let Some(record) = state.records.get(next) {
                self.after = Some(record.position);
                return StreamEvent::Record(record.clone());
            }

            if !self.options.await_data {
                return self.end(Termination::IdleTimeout);
            }

            let now = Instant::now();
            if now >= idle_deadline {
                return self.end(Termination::IdleTimeout);
            }
            let wake = (now + self.options.retry_interval).min(idle_deadline);
            log.changed.wait_until(&mut state, wake);
        }
    }
}
