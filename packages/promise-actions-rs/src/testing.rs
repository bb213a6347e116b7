//! Testing utilities for stores, watchers, and workers.
//!
//! Enable with the `testing` feature in dev-dependencies:
//!
//! ```toml
//! [dev-dependencies]
//! promise-actions = { path = "../promise-actions-rs", features = ["testing"] }
//! ```
//!
//! # Holding Workers With a `Gate`
//!
//! Admission policies are only observable while a worker is still running.
//! A [`Gate`] parks workers until the test opens it:
//!
//! ```ignore
//! let gate = Gate::new();
//! let worker_gate = gate.clone();
//! scheduler.watch_leading(&load, move |request, _ctx| {
//!     let gate = worker_gate.clone();
//!     async move {
//!         gate.pass().await;
//!         Ok(*request.payload())
//!     }
//! });
//!
//! let first = store.dispatch_request(load.request(1))?;
//! gate.wait_entered(1).await;   // worker is parked
//! let second = store.dispatch_request(load.request(2))?;   // dropped
//! gate.open();
//! ```
//!
//! # Waiting for Actions With an `ActionLatch`
//!
//! Tests should wait for meaning, not time:
//!
//! ```ignore
//! let latch = ActionLatch::observe(&store, "SIGN_IN_SUCCESS", 1);
//! store.dispatch_request(sign_in.request(credentials))?;
//! latch.wait().await;
//! ```

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use tokio::sync::broadcast::error::RecvError;
use tokio::sync::Notify;

use crate::middleware::PromiseMiddleware;
use crate::saga::KindPattern;
use crate::store::{Store, StoreBuilder};

/// A barrier that parks tasks until it is opened.
///
/// Clones share the same gate. Once opened it stays open.
#[derive(Debug, Clone, Default)]
pub struct Gate {
    inner: Arc<GateInner>,
}

#[derive(Debug, Default)]
struct GateInner {
    open: AtomicBool,
    entered: AtomicUsize,
    opened: Notify,
    arrived: Notify,
}

impl Gate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait here until the gate is opened.
    pub async fn pass(&self) {
        self.inner.entered.fetch_add(1, Ordering::AcqRel);
        self.inner.arrived.notify_waiters();

        loop {
            // Register for notification BEFORE checking the flag
            let notified = self.inner.opened.notified();

            if self.inner.open.load(Ordering::Acquire) {
                return;
            }

            notified.await;
        }
    }

    /// Release every parked task and let later ones straight through.
    pub fn open(&self) {
        self.inner.open.store(true, Ordering::Release);
        self.inner.opened.notify_waiters();
    }

    pub fn is_open(&self) -> bool {
        self.inner.open.load(Ordering::Acquire)
    }

    /// How many tasks have reached [`pass`](Self::pass).
    pub fn entered(&self) -> usize {
        self.inner.entered.load(Ordering::Acquire)
    }

    /// Wait until at least `count` tasks have reached the gate.
    pub async fn wait_entered(&self, count: usize) {
        loop {
            let notified = self.inner.arrived.notified();

            if self.entered() >= count {
                return;
            }

            notified.await;
        }
    }
}

/// Countdown latch, optionally fed by a store subscription.
#[derive(Debug, Clone)]
pub struct ActionLatch {
    inner: Arc<LatchInner>,
}

#[derive(Debug)]
struct LatchInner {
    remaining: AtomicUsize,
    notify: Notify,
}

impl ActionLatch {
    /// Create a latch expecting `expected` count-downs.
    pub fn new(expected: usize) -> Self {
        Self {
            inner: Arc::new(LatchInner {
                remaining: AtomicUsize::new(expected),
                notify: Notify::new(),
            }),
        }
    }

    /// Count down once for every delivered action matching `pattern`.
    ///
    /// Subscribes before returning, so actions dispatched afterwards are
    /// always counted. Must be called inside a tokio runtime.
    pub fn observe<S>(store: &Store<S>, pattern: impl Into<KindPattern>, expected: usize) -> Self
    where
        S: Send + Sync + 'static,
    {
        let latch = Self::new(expected);
        let pattern = pattern.into();
        let mut receiver = store.subscribe();
        let counter = latch.clone();

        tokio::spawn(async move {
            while counter.remaining() > 0 {
                match receiver.recv().await {
                    Ok(action) if pattern.matches(&action) => counter.count_down(),
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });

        latch
    }

    /// Decrement the remaining count. Extra count-downs are ignored.
    pub fn count_down(&self) {
        let previous = self
            .inner
            .remaining
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| n.checked_sub(1));
        if previous == Ok(1) {
            self.inner.notify.notify_waiters();
        }
    }

    pub fn remaining(&self) -> usize {
        self.inner.remaining.load(Ordering::Acquire)
    }

    /// Wait for the count to reach zero.
    pub async fn wait(&self) {
        loop {
            // Register for notification BEFORE checking count
            let notified = self.inner.notify.notified();

            if self.remaining() == 0 {
                return;
            }

            notified.await;
        }
    }
}

/// A unit-state store with the promise bridge and history enabled.
pub fn mock_store() -> Store<()> {
    bridged_store(())
}

/// A store around `initial` with the promise bridge and history enabled.
pub fn bridged_store<S: Send + Sync + 'static>(initial: S) -> Store<S> {
    StoreBuilder::new(initial)
        .with_middleware(PromiseMiddleware::new())
        .with_history()
        .build()
}
