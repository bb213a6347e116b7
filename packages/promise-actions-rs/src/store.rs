//! In-process store: middleware chain, reducers, and a broadcast bus.
//!
//! # Dispatch pipeline
//!
//! ```text
//! store.dispatch(action)
//!     │
//!     ▼
//! Middleware 1 ──► Middleware 2 ──► ... ──► deliver
//!                                             │
//!                     ┌───────────────────────┼──────────────────────┐
//!                     ▼                       ▼                      ▼
//!               reducers (sync)        history (optional)     broadcast::send
//!                                                                    │
//!                                                                    ▼
//!                                                        subscribers / watchers
//! ```
//!
//! Middleware is installed explicitly with [`StoreBuilder::with_middleware`].
//! A middleware may short-circuit, forward, or replace the return value of
//! `dispatch`; the promise bridge uses this to return a promise for bridged
//! requests.
//!
//! # Guarantees
//!
//! - Reducers run synchronously, in registration order, before subscribers
//!   see the action.
//! - **At-most-once delivery**: slow subscribers may lag and miss actions.
//! - Reducers must not dispatch; they run under the state write lock.

use std::fmt;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

use tokio::sync::broadcast;
use tracing::{trace, warn};

use crate::action::Action;
use crate::config::StoreConfig;
use crate::error::BridgeError;
use crate::history::ActionLog;
use crate::slot::{ArmedPromise, Promise};
use crate::triple::PendingAction;

/// What `dispatch` handed back to its caller.
#[derive(Debug)]
pub enum Dispatched {
    /// The action was forwarded; there is nothing to await.
    Forwarded,
    /// A middleware armed the action's resolution slot.
    Pending(ArmedPromise),
}

impl Dispatched {
    pub fn is_pending(&self) -> bool {
        matches!(self, Dispatched::Pending(_))
    }

    /// Recover the typed promise, if any.
    pub fn into_promise<Y, Z>(self) -> Option<Result<Promise<Y, Z>, BridgeError>>
    where
        Y: Send + 'static,
        Z: Send + 'static,
    {
        match self {
            Dispatched::Forwarded => None,
            Dispatched::Pending(armed) => Some(armed.downcast()),
        }
    }
}

/// An interceptor in the dispatch pipeline.
///
/// # Example
///
/// ```ignore
/// struct LogKinds;
///
/// impl Middleware for LogKinds {
///     fn intercept(&self, action: Action, next: Next<'_>) -> Dispatched {
///         tracing::info!(kind = %action.kind(), "dispatch");
///         next.run(action)
///     }
/// }
/// ```
pub trait Middleware: Send + Sync + 'static {
    /// Handle `action`, usually by calling `next.run(action)`.
    fn intercept(&self, action: Action, next: Next<'_>) -> Dispatched;
}

/// The rest of the pipeline after the current middleware.
pub struct Next<'a> {
    chain: &'a [Arc<dyn Middleware>],
    deliver: &'a (dyn Fn(Action) + 'a),
}

impl<'a> Next<'a> {
    /// Pass `action` to the next middleware, or deliver it if none remain.
    pub fn run(self, action: Action) -> Dispatched {
        match self.chain.split_first() {
            Some((middleware, rest)) => middleware.intercept(
                action,
                Next {
                    chain: rest,
                    deliver: self.deliver,
                },
            ),
            None => {
                (self.deliver)(action);
                Dispatched::Forwarded
            }
        }
    }
}

/// Folds actions into store state.
///
/// Implemented for any `Fn(&mut S, &Action)`.
pub trait Reducer<S>: Send + Sync + 'static {
    fn reduce(&self, state: &mut S, action: &Action);
}

impl<S, F> Reducer<S> for F
where
    F: Fn(&mut S, &Action) + Send + Sync + 'static,
{
    fn reduce(&self, state: &mut S, action: &Action) {
        self(state, action)
    }
}

struct StoreInner<S> {
    state: RwLock<S>,
    reducers: Vec<Box<dyn Reducer<S>>>,
    middleware: Vec<Arc<dyn Middleware>>,
    sender: broadcast::Sender<Action>,
    history: Option<ActionLog>,
}

impl<S: Send + Sync + 'static> StoreInner<S> {
    fn write_state(&self) -> RwLockWriteGuard<'_, S> {
        self.state.write().unwrap_or_else(|poisoned| {
            warn!("store state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn read_state(&self) -> RwLockReadGuard<'_, S> {
        self.state.read().unwrap_or_else(|poisoned| {
            warn!("store state lock was poisoned, recovering");
            poisoned.into_inner()
        })
    }

    fn deliver(&self, action: Action) {
        if !self.reducers.is_empty() {
            let mut state = self.write_state();
            for reducer in &self.reducers {
                reducer.reduce(&mut state, &action);
            }
        }

        if let Some(history) = &self.history {
            history.record(&action);
        }

        let kind = action.kind().clone();
        let receivers = self.sender.send(action).unwrap_or(0);
        trace!(%kind, receivers, "action delivered");
    }
}

/// Message bus with reducer state.
///
/// Cheap to clone; clones share the pipeline, state, and channel.
///
/// # Example
///
/// ```ignore
/// let store = StoreBuilder::new(AuthState::default())
///     .with_middleware(PromiseMiddleware::new())
///     .with_reducer(auth_reducer)
///     .build();
///
/// let promise = store.dispatch_request(sign_in.request(credentials))?;
/// let tokens = promise.await?;
/// ```
pub struct Store<S> {
    inner: Arc<StoreInner<S>>,
}

impl<S: Send + Sync + 'static> Store<S> {
    /// Start building a store around `initial` state.
    pub fn builder(initial: S) -> StoreBuilder<S> {
        StoreBuilder::new(initial)
    }

    /// Send an action through the middleware chain.
    pub fn dispatch(&self, action: impl Into<Action>) -> Dispatched {
        let action = action.into();
        trace!(
            kind = %action.kind(),
            action_id = %action.id(),
            bridged = action.is_bridged(),
            "dispatching action"
        );

        let inner = &*self.inner;
        let deliver = |action: Action| inner.deliver(action);
        Next {
            chain: &inner.middleware,
            deliver: &deliver,
        }
        .run(action)
    }

    /// Dispatch a bridged request and return its promise.
    ///
    /// If no middleware armed the request, the action is still delivered and
    /// `BridgeError::MiddlewareMissing` is returned in place of a promise.
    pub fn dispatch_request<X, Y, Z>(
        &self,
        pending: PendingAction<X, Y, Z>,
    ) -> Result<Promise<Y, Z>, BridgeError>
    where
        X: Send + Sync + 'static,
        Y: Send + Sync + 'static,
        Z: Send + Sync + 'static,
    {
        let kind = pending.kind().clone();
        match self.dispatch(pending) {
            Dispatched::Pending(armed) => armed.downcast(),
            Dispatched::Forwarded => {
                warn!(%kind, "bridged request dispatched without promise middleware");
                Err(BridgeError::MiddlewareMissing { kind })
            }
        }
    }

    /// Subscribe to delivered actions.
    ///
    /// Actions delivered before subscription are not received.
    pub fn subscribe(&self) -> broadcast::Receiver<Action> {
        self.inner.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.sender.receiver_count()
    }

    /// Read the current state through `selector`.
    pub fn select<T>(&self, selector: impl FnOnce(&S) -> T) -> T {
        selector(&self.inner.read_state())
    }

    /// The recorded history, if enabled.
    pub fn history(&self) -> Option<&ActionLog> {
        self.inner.history.as_ref()
    }

    pub fn middleware_count(&self) -> usize {
        self.inner.middleware.len()
    }
}

impl<S: Clone + Send + Sync + 'static> Store<S> {
    /// Clone of the current state.
    pub fn state(&self) -> S {
        self.select(S::clone)
    }
}

impl<S> Clone for Store<S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<S> fmt::Debug for Store<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Store")
            .field("middleware_count", &self.inner.middleware.len())
            .field("reducer_count", &self.inner.reducers.len())
            .field("subscriber_count", &self.inner.sender.receiver_count())
            .field("history", &self.inner.history.is_some())
            .finish_non_exhaustive()
    }
}

/// Builder for [`Store`].
///
/// Middleware runs in the order it is added; the first added sees each
/// action first.
pub struct StoreBuilder<S> {
    initial: S,
    config: StoreConfig,
    reducers: Vec<Box<dyn Reducer<S>>>,
    middleware: Vec<Arc<dyn Middleware>>,
}

impl<S: Send + Sync + 'static> StoreBuilder<S> {
    pub fn new(initial: S) -> Self {
        Self {
            initial,
            config: StoreConfig::default(),
            reducers: Vec::new(),
            middleware: Vec::new(),
        }
    }

    /// Replace the whole configuration.
    pub fn with_config(mut self, config: StoreConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the broadcast capacity.
    pub fn with_capacity(mut self, capacity: usize) -> Self {
        self.config.capacity = capacity;
        self
    }

    /// Record delivered actions in an [`ActionLog`].
    pub fn with_history(mut self) -> Self {
        self.config.record_history = true;
        self
    }

    pub fn with_middleware<M: Middleware>(mut self, middleware: M) -> Self {
        self.middleware.push(Arc::new(middleware));
        self
    }

    pub fn with_reducer<R: Reducer<S>>(mut self, reducer: R) -> Self {
        self.reducers.push(Box::new(reducer));
        self
    }

    pub fn build(self) -> Store<S> {
        let (sender, _) = broadcast::channel(self.config.capacity.max(1));
        let history = self
            .config
            .record_history
            .then(|| ActionLog::new(self.config.history_limit));

        Store {
            inner: Arc::new(StoreInner {
                state: RwLock::new(self.initial),
                reducers: self.reducers,
                middleware: self.middleware,
                sender,
                history,
            }),
        }
    }
}

impl<S: Default + Send + Sync + 'static> Default for StoreBuilder<S> {
    fn default() -> Self {
        Self::new(S::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Clone, Default, PartialEq)]
    struct Counter {
        total: u32,
    }

    fn add_reducer(state: &mut Counter, action: &Action) {
        if let Some(n) = action.payload_ref::<u32>() {
            if action.is("ADD") {
                state.total += n;
            }
        }
    }

    struct CountingMiddleware {
        seen: Arc<AtomicUsize>,
    }

    impl Middleware for CountingMiddleware {
        fn intercept(&self, action: Action, next: Next<'_>) -> Dispatched {
            self.seen.fetch_add(1, Ordering::SeqCst);
            next.run(action)
        }
    }

    struct SwallowMiddleware;

    impl Middleware for SwallowMiddleware {
        fn intercept(&self, action: Action, next: Next<'_>) -> Dispatched {
            if action.is("SWALLOWED") {
                return Dispatched::Forwarded;
            }
            next.run(action)
        }
    }

    #[tokio::test]
    async fn test_dispatch_reaches_subscriber() {
        let store = StoreBuilder::new(()).build();
        let mut receiver = store.subscribe();

        let dispatched = store.dispatch(Action::new("PING", 1u8));
        assert!(!dispatched.is_pending());

        let action = receiver.recv().await.unwrap();
        assert!(action.is("PING"));
        assert_eq!(action.payload_ref::<u8>(), Some(&1));
    }

    #[test]
    fn test_reducers_run_before_dispatch_returns() {
        let store = StoreBuilder::new(Counter::default())
            .with_reducer(add_reducer)
            .build();

        store.dispatch(Action::new("ADD", 2u32));
        store.dispatch(Action::new("ADD", 5u32));
        store.dispatch(Action::new("IGNORED", 100u32));

        assert_eq!(store.select(|s| s.total), 7);
        assert_eq!(store.state(), Counter { total: 7 });
    }

    #[test]
    fn test_struct_reducers_fold_in_registration_order() {
        struct Append(&'static str);

        impl Reducer<Vec<String>> for Append {
            fn reduce(&self, state: &mut Vec<String>, action: &Action) {
                state.push(format!("{}:{}", self.0, action.kind()));
            }
        }

        let store = StoreBuilder::new(Vec::<String>::new())
            .with_reducer(Append("first"))
            .with_reducer(Append("second"))
            .build();

        store.dispatch(Action::unit("LOAD"));

        assert_eq!(store.state(), vec!["first:LOAD", "second:LOAD"]);
    }

    #[test]
    fn test_middleware_runs_in_order_and_can_short_circuit() {
        let seen = Arc::new(AtomicUsize::new(0));
        let store = StoreBuilder::new(())
            .with_history()
            .with_middleware(SwallowMiddleware)
            .with_middleware(CountingMiddleware { seen: seen.clone() })
            .build();

        store.dispatch(Action::unit("KEPT"));
        store.dispatch(Action::unit("SWALLOWED"));

        assert_eq!(seen.load(Ordering::SeqCst), 1);
        let history = store.history().unwrap();
        assert!(history.contains_kind("KEPT"));
        assert!(!history.contains_kind("SWALLOWED"));
        assert_eq!(store.middleware_count(), 2);
    }

    #[test]
    fn test_history_disabled_by_default() {
        let store = StoreBuilder::new(()).build();
        store.dispatch(Action::unit("A"));
        assert!(store.history().is_none());
    }

    #[test]
    fn test_dispatch_request_without_bridge_still_delivers() {
        use crate::triple::ActionTriple;

        let store = StoreBuilder::new(()).with_history().build();
        let triple: ActionTriple<(), (), ()> = ActionTriple::new("NO_BRIDGE");

        let err = store.dispatch_request(triple.request_empty()).unwrap_err();
        assert!(matches!(err, BridgeError::MiddlewareMissing { .. }));
        assert!(store.history().unwrap().contains_kind("NO_BRIDGE_REQUEST"));
    }

    #[tokio::test]
    async fn test_clones_share_channel_and_state() {
        let store = StoreBuilder::new(Counter::default())
            .with_reducer(add_reducer)
            .build();
        let other = store.clone();
        let mut receiver = store.subscribe();

        other.dispatch(Action::new("ADD", 3u32));

        assert!(receiver.recv().await.unwrap().is("ADD"));
        assert_eq!(store.select(|s| s.total), 3);
        assert_eq!(store.subscriber_count(), 1);
    }

    #[test]
    fn test_config_capacity_and_history_limit() {
        let store = StoreBuilder::new(())
            .with_config(StoreConfig {
                capacity: 4,
                record_history: true,
                history_limit: 2,
            })
            .build();

        for _ in 0..3 {
            store.dispatch(Action::unit("TICK"));
        }
        assert_eq!(store.history().unwrap().len(), 2);
    }

    #[test]
    fn test_debug_impl() {
        let store = StoreBuilder::new(()).with_history().build();
        let debug = format!("{:?}", store);
        assert!(debug.contains("Store"));
        assert!(debug.contains("middleware_count"));
    }
}
