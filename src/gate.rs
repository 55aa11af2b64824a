//! Single-assignment, multi-waiter readiness gate.
//!
//! A [`ReadyGate`] is resolved at most once, with either a value or an error.
//! Continuations registered through [`ReadyGate::on_ready`] run exactly once
//! with that outcome: immediately when the gate is already resolved,
//! otherwise when the resolver drains the queue.
//!
//! Continuations run in registration order. While the resolver is draining,
//! newly registered continuations join the tail of the queue instead of
//! running on the registering thread, so a caller that registers `a` then `b`
//! never observes `b` before `a`.

use parking_lot::{Condvar, Mutex};
use std::collections::VecDeque;
use std::time::{Duration, Instant};

type Waiter<T, E> = Box<dyn FnOnce(Result<T, E>) + Send + 'static>;

enum GateState<T, E> {
    Pending,
    Draining(Result<T, E>),
    Resolved(Result<T, E>),
}

struct Inner<T, E> {
    state: GateState<T, E>,
    waiters: VecDeque<Waiter<T, E>>,
}

/// Resolve-once gate with a FIFO of continuations.
pub struct ReadyGate<T, E> {
    inner: Mutex<Inner<T, E>>,
    resolved: Condvar,
}

impl<T, E> ReadyGate<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner {
                state: GateState::Pending,
                waiters: VecDeque::new(),
            }),
            resolved: Condvar::new(),
        }
    }

    /// Resolve the gate. Returns false if it was already resolved.
    ///
    /// Queued continuations run on the calling thread, outside the lock.
    pub fn resolve(&self, outcome: Result<T, E>) -> bool {
        {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, GateState::Pending) {
                return false;
            }
            inner.state = GateState::Draining(outcome.clone());
        }

        loop {
            let batch: Vec<Waiter<T, E>> = {
                let mut inner = self.inner.lock();
                if inner.waiters.is_empty() {
                    inner.state = GateState::Resolved(outcome);
                    break;
                }
                inner.waiters.drain(..).collect()
            };

            for waiter in batch {
                waiter(outcome.clone());
            }
        }

        self.resolved.notify_all();
        true
    }

    /// Register a continuation for the outcome.
    pub fn on_ready<F>(&self, callback: F)
    where
        F: FnOnce(Result<T, E>) + Send + 'static,
    {
        let mut inner = self.inner.lock();
        match &inner.state {
            GateState::Resolved(outcome) => {
                let outcome = outcome.clone();
                drop(inner);
                callback(outcome);
            }
            GateState::Pending | GateState::Draining(_) => {
                inner.waiters.push_back(Box::new(callback));
            }
        }
    }

    /// The outcome, if the gate is fully resolved.
    pub fn peek(&self) -> Option<Result<T, E>> {
        match &self.inner.lock().state {
            GateState::Resolved(outcome) => Some(outcome.clone()),
            _ => None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        !matches!(self.inner.lock().state, GateState::Pending)
    }

    /// Number of continuations still queued.
    pub fn pending_waiters(&self) -> usize {
        self.inner.lock().waiters.len()
    }

    /// Block until the gate is resolved and drained, or the timeout elapses.
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<T, E>> {
        let deadline = Instant::now() + timeout;
        let mut inner = self.inner.lock();
        loop {
            if let GateState::Resolved(outcome) = &inner.state {
                return Some(outcome.clone());
            }
            if self.resolved.wait_until(&mut inner, deadline).timed_out() {
                return match &inner.state {
                    GateState::Resolved(outcome) => Some(outcome.clone()),
                    _ => None,
                };
            }
        }
    }
}

impl<T, E> Default for ReadyGate<T, E>
where
    T: Clone + Send + 'static,
    E: Clone + Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::thread;

    type Gate = ReadyGate<u32, String>;

    #[test]
    fn test_waiters_before_resolution() {
        let gate = Gate::new();
        let seen = Arc::new(Mutex::new(Vec::new()));

        for i in 0..3 {
            let seen = Arc::clone(&seen);
            gate.on_ready(move |outcome| seen.lock().push((i, outcome)));
        }
        assert_eq!(gate.pending_waiters(), 3);

        assert!(gate.resolve(Ok(7)));
        assert_eq!(
            *seen.lock(),
            vec![(0, Ok(7)), (1, Ok(7)), (2, Ok(7))]
        );
    }

    #[test]
    fn test_waiter_after_resolution_runs_immediately() {
        let gate = Gate::new();
        gate.resolve(Err("boom".into()));

        let (tx, rx) = crossbeam_channel::bounded(1);
        gate.on_ready(move |outcome| {
            tx.send(outcome).unwrap();
        });

        // No resolver call needed: the callback already ran on this thread.
        assert_eq!(rx.try_recv().unwrap(), Err("boom".to_string()));
    }

    #[test]
    fn test_resolve_only_once() {
        let gate = Gate::new();
        assert!(gate.resolve(Ok(1)));
        assert!(!gate.resolve(Ok(2)));
        assert!(!gate.resolve(Err("late".into())));
        assert_eq!(gate.peek(), Some(Ok(1)));
    }

    #[test]
    fn test_registration_during_drain_keeps_order() {
        let gate = Arc::new(Gate::new());
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let gate_inner = Arc::clone(&gate);
            let seen = Arc::clone(&seen);
            gate.on_ready(move |_| {
                seen.lock().push("first");
                // Registered while draining: must run after this one returns.
                let seen = Arc::clone(&seen);
                gate_inner.on_ready(move |_| seen.lock().push("third"));
            });
        }
        {
            let seen = Arc::clone(&seen);
            gate.on_ready(move |_| seen.lock().push("second"));
        }

        gate.resolve(Ok(0));
        assert_eq!(*seen.lock(), vec!["first", "second", "third"]);
    }

    #[test]
    fn test_concurrent_registration_each_runs_once() {
        let gate = Arc::new(Gate::new());
        let hits = Arc::new(AtomicUsize::new(0));

        let workers: Vec<_> = (0..8)
            .map(|_| {
                let gate = Arc::clone(&gate);
                let hits = Arc::clone(&hits);
                thread::spawn(move || {
                    for _ in 0..100 {
                        let hits = Arc::clone(&hits);
                        gate.on_ready(move |_| {
                            hits.fetch_add(1, Ordering::SeqCst);
                        });
                    }
                })
            })
            .collect();

        gate.resolve(Ok(1));
        for worker in workers {
            worker.join().unwrap();
        }

        assert_eq!(hits.load(Ordering::SeqCst), 800);
    }

    #[test]
    fn test_wait_timeout() {
        let gate = Arc::new(Gate::new());
        assert_eq!(gate.wait_timeout(Duration::from_millis(20)), None);

        let resolver = {
            let gate = Arc::clone(&gate);
            thread::spawn(move || {
                thread::sleep(Duration::from_millis(20));
                gate.resolve(Ok(42));
            })
        };

        assert_eq!(gate.wait_timeout(Duration::from_secs(5)), Some(Ok(42)));
        resolver.join().unwrap();
    }
}
