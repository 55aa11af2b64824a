//! Tailing engine.
//!
//! One engine thread per channel drives the log:
//!
//! ```text
//!   Idle ──► Opening ──► Streaming ──┬──► Closing  ──► Opening (same handle)
//!              ▲                     └──► Erroring ──► Opening (re-provisioned)
//!              │                                  └──► Stopped
//!              └── provision + seed position
//! ```
//!
//! The engine is the only writer of the tracked position and of the current
//! handle. Every step checks the channel's closed flag first; once it is set
//! the thread stops emitting and exits when its in-flight read returns.
//!
//! Appends for publishers run on a second thread owned by the `publisher`
//! module.

mod position;
mod provision;
mod publisher;

pub(crate) use position::PositionTracker;
pub(crate) use publisher::{spawn as spawn_publisher, PublishJob};

use crate::channel::ChannelConfig;
use crate::error::{ChannelError, Result};
use crate::fanout::{ChannelEvent, Fanout, Topic};
use crate::gate::ReadyGate;
use crate::store::{LogStore, StreamEvent, TailStream, Termination};
use crate::types::{LogHandle, Record};
use crossbeam_channel::{unbounded, Receiver, Sender};
use parking_lot::{Mutex, RwLock};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Instant;
use tracing::{debug, info, trace, warn};

pub(crate) type Gate = ReadyGate<LogHandle, ChannelError>;

/// Engine lifecycle state.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EngineState {
    /// Constructed, thread not yet running.
    Idle,
    /// Provisioning, seeding or opening a stream.
    Opening,
    /// Reading records.
    Streaming,
    /// Stream ended on its idle window; about to reopen.
    Closing,
    /// Stream failed; about to re-provision or stop.
    Erroring,
    /// Engine thread has exited.
    Stopped,
}

/// What to do after a stream ends.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Next {
    /// Reopen on the same handle.
    Reopen,
    /// Provision a fresh handle, then reopen.
    Reprovision,
    Stop,
}

/// State shared between a channel and its engine thread.
pub(crate) struct Shared {
    pub(crate) config: ChannelConfig,
    pub(crate) store: Arc<dyn LogStore>,
    pub(crate) fanout: Arc<Fanout>,
    pub(crate) position: PositionTracker,
    closed: AtomicBool,
    /// Taken on close so the publish worker drains and exits.
    publisher: Mutex<Option<Sender<PublishJob>>>,
    handle: RwLock<Option<LogHandle>>,
    gate: RwLock<Arc<Gate>>,
    state: RwLock<EngineState>,
}

impl Shared {
    /// Shared state plus the queue its publish worker drains.
    pub(crate) fn new(
        store: Arc<dyn LogStore>,
        config: ChannelConfig,
    ) -> (Self, Receiver<PublishJob>) {
        let (jobs, queue) = unbounded();
        let shared = Self {
            config,
            store,
            fanout: Arc::new(Fanout::new()),
            position: PositionTracker::new(),
            closed: AtomicBool::new(false),
            publisher: Mutex::new(Some(jobs)),
            handle: RwLock::new(None),
            gate: RwLock::new(Arc::new(Gate::new())),
            state: RwLock::new(EngineState::Idle),
        };
        (shared, queue)
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Set the closed flag. Returns false if it was already set.
    ///
    /// Waits for a broadcast in progress on another thread, so no event is
    /// delivered once this returns.
    pub(crate) fn close(&self) -> bool {
        if self.closed.swap(true, Ordering::SeqCst) {
            return false;
        }
        self.fanout.close();
        self.publisher.lock().take();
        // Release publishers still queued on readiness.
        self.current_gate().resolve(Err(ChannelError::Closed));
        true
    }

    /// Hand an append to the publish worker.
    pub(crate) fn submit(&self, job: PublishJob) {
        let rejected = match &*self.publisher.lock() {
            Some(jobs) => jobs.send(job).err().map(|e| e.into_inner()),
            None => Some(job),
        };
        if let Some(job) = rejected {
            job.reject(ChannelError::Closed);
        }
    }

    pub(crate) fn current_gate(&self) -> Arc<Gate> {
        Arc::clone(&*self.gate.read())
    }

    /// The current gate if still pending, otherwise a freshly installed one.
    fn pending_gate(&self) -> Arc<Gate> {
        let mut gate = self.gate.write();
        if gate.is_resolved() {
            *gate = Arc::new(Gate::new());
        }
        Arc::clone(&*gate)
    }

    pub(crate) fn handle(&self) -> Option<LogHandle> {
        self.handle.read().clone()
    }

    pub(crate) fn state(&self) -> EngineState {
        *self.state.read()
    }

    fn set_state(&self, state: EngineState) {
        *self.state.write() = state;
    }

    /// Move a stopped (or never started) engine to `Idle` so a new thread may
    /// take over. Returns false if an engine thread is still running.
    fn claim(&self) -> bool {
        let mut state = self.state.write();
        match *state {
            EngineState::Stopped | EngineState::Idle => {
                *state = EngineState::Idle;
                true
            }
            _ => false,
        }
    }

    /// Emit a lifecycle event unless the channel is closed.
    pub(crate) fn emit(&self, topic: Topic, event: ChannelEvent) {
        if !self.is_closed() {
            self.fanout.emit(&topic, event);
        }
    }

    pub(crate) fn emit_error(&self, error: ChannelError) {
        self.emit(Topic::Error, ChannelEvent::Error { error });
    }
}

/// Start an engine thread unless one is already running.
///
/// Returns false when an engine is still running.
pub(crate) fn spawn(shared: &Arc<Shared>) -> Result<bool> {
    if shared.is_closed() {
        return Err(ChannelError::Closed);
    }
    if !shared.claim() {
        return Ok(false);
    }
    // Readiness waiters from here on wait for this engine.
    shared.pending_gate();

    let engine = Engine {
        shared: Arc::clone(shared),
    };
    let spawned = thread::Builder::new()
        .name(format!("tailcast-{}", shared.config.name))
        .spawn(move || engine.run());

    match spawned {
        Ok(_) => Ok(true),
        Err(e) => {
            shared.set_state(EngineState::Stopped);
            Err(ChannelError::Spawn(e.to_string()))
        }
    }
}

struct Engine {
    shared: Arc<Shared>,
}

impl Engine {
    fn run(self) {
        let log = self.shared.config.name.clone();
        debug!(%log, "engine started");
        self.drive();
        if self.shared.is_closed() {
            self.shared.current_gate().resolve(Err(ChannelError::Closed));
        }
        self.shared.set_state(EngineState::Stopped);
        debug!(%log, "engine stopped");
    }

    fn drive(&self) {
        let shared = &self.shared;
        let mut next = Next::Reprovision;
        let mut handle: Option<LogHandle> = None;

        loop {
            if shared.is_closed() {
                return;
            }
            shared.set_state(EngineState::Opening);

            if next == Next::Reprovision {
                let gate = shared.pending_gate();
                match provision::ensure(shared.store.as_ref(), &shared.config, &gate) {
                    Ok(fresh) => handle = Some(fresh),
                    Err(error) => {
                        shared.emit_error(error);
                        return;
                    }
                }
            }

            let Some(current) = handle.clone() else {
                return;
            };

            let stream = match self.open(&current) {
                Ok(stream) => stream,
                Err(error) => {
                    warn!(log = %shared.config.name, %error, "failed to open tail stream");
                    shared.current_gate().resolve(Err(error.clone()));
                    shared.emit_error(error);
                    return;
                }
            };

            if shared.is_closed() {
                return;
            }

            *shared.handle.write() = Some(current.clone());
            shared.set_state(EngineState::Streaming);
            // Listeners hear `ready` before queued publishers are released.
            shared.emit(Topic::Ready, ChannelEvent::Ready { handle: current.clone() });
            if shared.current_gate().resolve(Ok(current.clone())) {
                info!(log = %shared.config.name, handle = ?current, "channel ready");
            }

            let opened = Instant::now();
            next = self.consume(stream);
            if next == Next::Stop {
                return;
            }
            self.pace(opened);
        }
    }

    /// Keep at least `retry_interval` between opens, for streams that end
    /// as soon as they start.
    fn pace(&self, opened: Instant) {
        let remaining = self
            .shared
            .config
            .retry_interval
            .saturating_sub(opened.elapsed());
        if !remaining.is_zero() {
            trace!(log = %self.shared.config.name, ?remaining, "delaying reopen");
            thread::sleep(remaining);
        }
    }

    /// Seed or reuse the resume point and open a stream after it.
    fn open(&self, handle: &LogHandle) -> Result<Box<dyn TailStream>> {
        let shared = &self.shared;
        let after = shared
            .position
            .resume_point(shared.store.as_ref(), handle)
            .map_err(ChannelError::StreamOpen)?;

        debug!(log = %shared.config.name, ?after, "opening tail stream");
        shared
            .store
            .open_tail(handle, after, &shared.config.tail_options())
            .map_err(ChannelError::StreamOpen)
    }

    /// Read until the stream ends and decide what comes next.
    fn consume(&self, mut stream: Box<dyn TailStream>) -> Next {
        loop {
            let event = stream.next_event();
            if self.shared.is_closed() {
                return Next::Stop;
            }

            match event {
                StreamEvent::Record(record) => self.deliver(&record),
                StreamEvent::End(termination) => return self.terminate(termination),
            }
        }
    }

    fn deliver(&self, record: &Record) {
        trace!(position = %record.position, event = ?record.event, "record received");
        self.shared.position.advance(record);
        self.shared.fanout.dispatch(record);
    }

    fn terminate(&self, termination: Termination) -> Next {
        let shared = &self.shared;
        match termination {
            Termination::IdleTimeout => {
                shared.set_state(EngineState::Closing);
                debug!(
                    log = %shared.config.name,
                    position = ?shared.position.current(),
                    "tail stream idle, reopening"
                );
                shared.emit(Topic::Closed, ChannelEvent::Closed);
                Next::Reopen
            }
            Termination::ReadError(error) => {
                shared.set_state(EngineState::Erroring);
                warn!(log = %shared.config.name, %error, "tail stream failed");
                shared.emit_error(ChannelError::StreamRead(error));

                if shared.config.recreate {
                    info!(log = %shared.config.name, "re-provisioning log after stream error");
                    Next::Reprovision
                } else {
                    Next::Stop
                }
            }
        }
    }
}
