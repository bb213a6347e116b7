//! Task scheduler: watchers, admission policies, and the worker context.
//!
//! A watcher subscribes to the store and runs a task for every action that
//! matches its [`KindPattern`], subject to an [`AdmissionPolicy`]:
//!
//! | Policy | New matching action while a task runs |
//! |--------|---------------------------------------|
//! | `Every` | spawns another task |
//! | `Leading` | is dropped |
//! | `Latest` | cancels the running task, waits for it to stop, then spawns |
//!
//! # Cancellation
//!
//! Each task runs under its own `CancellationToken`, a child of the
//! watcher's token. Cancellation is cooperative: a cancelled task's future is
//! dropped at its next `.await`, so side effects already performed stay
//! applied. Workers that loop without awaiting can poll
//! [`WorkerContext::is_cancelled`].
//!
//! # Example
//!
//! ```ignore
//! let scheduler = Scheduler::new(store.clone());
//!
//! // Raw watcher: handler sees the type-erased action.
//! scheduler.take_leading("SIGN_OUT_REQUEST", |action, ctx| async move {
//!     ctx.put(Action::unit("SESSION_CLEARED"));
//! });
//! ```
//!
//! Watchers must be started from inside a tokio runtime.

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use futures::FutureExt;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, info_span, warn, Instrument};

use crate::action::{Action, ActionId};
use crate::config::AdmissionPolicy;
use crate::error::Cancelled;
use crate::kind::ActionKind;
use crate::slot::Rejection;
use crate::store::Store;
use crate::triple::PendingAction;

// =============================================================================
// Kind Patterns
// =============================================================================

/// Which actions a watcher admits.
#[derive(Clone)]
pub enum KindPattern {
    /// Every action.
    Any,
    /// Actions of exactly this kind.
    Exact(ActionKind),
    /// Actions of any of these kinds.
    AnyOf(Vec<ActionKind>),
    /// Actions accepted by the predicate.
    Predicate(Arc<dyn Fn(&Action) -> bool + Send + Sync>),
}

impl KindPattern {
    pub fn predicate(predicate: impl Fn(&Action) -> bool + Send + Sync + 'static) -> Self {
        KindPattern::Predicate(Arc::new(predicate))
    }

    pub fn matches(&self, action: &Action) -> bool {
        match self {
            KindPattern::Any => true,
            KindPattern::Exact(kind) => action.kind() == kind,
            KindPattern::AnyOf(kinds) => kinds.contains(action.kind()),
            KindPattern::Predicate(predicate) => predicate(action),
        }
    }
}

impl fmt::Debug for KindPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KindPattern::Any => f.write_str("Any"),
            KindPattern::Exact(kind) => f.debug_tuple("Exact").field(kind).finish(),
            KindPattern::AnyOf(kinds) => f.debug_tuple("AnyOf").field(kinds).finish(),
            KindPattern::Predicate(_) => f.write_str("Predicate(..)"),
        }
    }
}

impl From<ActionKind> for KindPattern {
    fn from(kind: ActionKind) -> Self {
        KindPattern::Exact(kind)
    }
}

impl From<&ActionKind> for KindPattern {
    fn from(kind: &ActionKind) -> Self {
        KindPattern::Exact(kind.clone())
    }
}

impl From<&str> for KindPattern {
    fn from(kind: &str) -> Self {
        KindPattern::Exact(ActionKind::new(kind))
    }
}

impl From<Vec<ActionKind>> for KindPattern {
    fn from(kinds: Vec<ActionKind>) -> Self {
        KindPattern::AnyOf(kinds)
    }
}

// =============================================================================
// Worker Context
// =============================================================================

/// Context handed to every task a watcher runs.
///
/// Cheap to clone; clones share the task's cancellation token.
pub struct WorkerContext<S> {
    store: Store<S>,
    cancel: CancellationToken,
    action_id: ActionId,
    active: Arc<AtomicBool>,
}

impl<S: Send + Sync + 'static> WorkerContext<S> {
    /// Dispatch an action without waiting for anything.
    pub fn put(&self, action: impl Into<Action>) {
        self.store.dispatch(action);
    }

    /// Dispatch a bridged request and wait for its outcome.
    ///
    /// Resolves to `Err(Rejection::Abandoned)` if the store has no promise
    /// middleware, since nothing could ever settle the request for us.
    pub async fn put_resolve<X, Y, Z>(
        &self,
        pending: PendingAction<X, Y, Z>,
    ) -> Result<Y, Rejection<Z>>
    where
        X: Send + Sync + 'static,
        Y: Send + Sync + 'static,
        Z: Send + Sync + 'static,
    {
        match self.store.dispatch_request(pending) {
            Ok(promise) => promise.await,
            Err(err) => {
                warn!(
                    action_id = %self.action_id,
                    error = %err,
                    "put_resolve could not bridge request"
                );
                Err(Rejection::Abandoned)
            }
        }
    }

    /// Read the current store state.
    pub fn select<T>(&self, selector: impl FnOnce(&S) -> T) -> T {
        self.store.select(selector)
    }

    /// Await `future` unless this task is cancelled first.
    pub async fn call<F: Future>(&self, future: F) -> Result<F::Output, Cancelled> {
        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Err(Cancelled),
            output = future => Ok(output),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Completes when this task is cancelled.
    pub async fn cancelled(&self) {
        self.cancel.cancelled().await
    }

    /// ID of the action that started this task.
    pub fn action_id(&self) -> ActionId {
        self.action_id
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    /// Mark the task as no longer occupying its watcher.
    ///
    /// Called before a result is published so that a request dispatched in
    /// reaction to that result is admitted.
    pub(crate) fn mark_finished(&self) {
        self.active.store(false, Ordering::Release);
    }
}

impl<S> Clone for WorkerContext<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
            cancel: self.cancel.clone(),
            action_id: self.action_id,
            active: self.active.clone(),
        }
    }
}

impl<S> fmt::Debug for WorkerContext<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkerContext")
            .field("action_id", &self.action_id)
            .field("cancelled", &self.cancel.is_cancelled())
            .finish_non_exhaustive()
    }
}

// =============================================================================
// Admitted Tasks (Type-Erased)
// =============================================================================

/// What a watcher runs for each admitted action.
pub(crate) trait AdmittedTask<S>: Send + Sync + 'static {
    fn run(&self, action: Action, ctx: WorkerContext<S>) -> BoxFuture<'static, ()>;

    /// Called for an action dropped by `Leading` or cancelled by `Latest`.
    fn superseded(&self, _action: &Action) {}

    /// Called after the task for `action` panicked.
    fn panicked(&self, _action: &Action) {}
}

struct HandlerTask<H>(H);

impl<S, H, Fut> AdmittedTask<S> for HandlerTask<H>
where
    S: Send + Sync + 'static,
    H: Fn(Action, WorkerContext<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    fn run(&self, action: Action, ctx: WorkerContext<S>) -> BoxFuture<'static, ()> {
        (self.0)(action, ctx).boxed()
    }
}

// =============================================================================
// Scheduler
// =============================================================================

/// Spawns watchers over a store.
pub struct Scheduler<S> {
    store: Store<S>,
}

impl<S: Send + Sync + 'static> Scheduler<S> {
    pub fn new(store: Store<S>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Store<S> {
        &self.store
    }

    /// Run `handler` for every matching action.
    pub fn take_every<H, Fut>(&self, pattern: impl Into<KindPattern>, handler: H) -> WatchHandle
    where
        H: Fn(Action, WorkerContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.take(pattern, AdmissionPolicy::Every, handler)
    }

    /// Run `handler` for a matching action unless one is already running.
    pub fn take_leading<H, Fut>(&self, pattern: impl Into<KindPattern>, handler: H) -> WatchHandle
    where
        H: Fn(Action, WorkerContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.take(pattern, AdmissionPolicy::Leading, handler)
    }

    /// Run `handler` for a matching action, cancelling any running one.
    pub fn take_latest<H, Fut>(&self, pattern: impl Into<KindPattern>, handler: H) -> WatchHandle
    where
        H: Fn(Action, WorkerContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.take(pattern, AdmissionPolicy::Latest, handler)
    }

    /// Run `handler` for matching actions under an explicit policy.
    pub fn take<H, Fut>(
        &self,
        pattern: impl Into<KindPattern>,
        policy: AdmissionPolicy,
        handler: H,
    ) -> WatchHandle
    where
        H: Fn(Action, WorkerContext<S>) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = ()> + Send + 'static,
    {
        self.spawn_watch(pattern.into(), policy, Arc::new(HandlerTask(handler)))
    }

    pub(crate) fn spawn_watch(
        &self,
        pattern: KindPattern,
        policy: AdmissionPolicy,
        task: Arc<dyn AdmittedTask<S>>,
    ) -> WatchHandle {
        // Subscribe before spawning so nothing dispatched after this call is missed.
        let receiver = self.store.subscribe();
        let shutdown = CancellationToken::new();

        let watcher = Watcher {
            store: self.store.clone(),
            pattern,
            policy,
            task,
            shutdown: shutdown.clone(),
        };
        let handle = tokio::spawn(watcher.run(receiver));

        WatchHandle { shutdown, handle }
    }
}

impl<S> Clone for Scheduler<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S> fmt::Debug for Scheduler<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Scheduler")
            .field("store", &self.store)
            .finish()
    }
}

/// Handle to a running watcher.
///
/// Dropping the handle leaves the watcher running.
#[derive(Debug)]
pub struct WatchHandle {
    shutdown: CancellationToken,
    handle: JoinHandle<()>,
}

impl WatchHandle {
    /// Stop the watcher and cancel every task it is running.
    pub fn stop(&self) {
        self.shutdown.cancel();
    }

    pub fn is_running(&self) -> bool {
        !self.handle.is_finished()
    }

    /// Wait for the watcher loop to exit.
    pub async fn join(self) {
        if let Err(err) = self.handle.await {
            warn!(error = %err, "watcher ended abnormally");
        }
    }

    /// Stop the watcher and wait for it to exit.
    pub async fn shutdown(self) {
        self.stop();
        self.join().await
    }
}

// =============================================================================
// Watcher Loop
// =============================================================================

struct Running {
    action: Action,
    cancel: CancellationToken,
    active: Arc<AtomicBool>,
    handle: JoinHandle<()>,
}

impl Running {
    fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire) && !self.handle.is_finished()
    }
}

struct Watcher<S> {
    store: Store<S>,
    pattern: KindPattern,
    policy: AdmissionPolicy,
    task: Arc<dyn AdmittedTask<S>>,
    shutdown: CancellationToken,
}

impl<S: Send + Sync + 'static> Watcher<S> {
    async fn run(self, mut receiver: broadcast::Receiver<Action>) {
        info!(pattern = ?self.pattern, policy = ?self.policy, "watcher started");

        let mut running: Option<Running> = None;

        loop {
            let action = tokio::select! {
                biased;
                _ = self.shutdown.cancelled() => break,
                received = receiver.recv() => match received {
                    Ok(action) => action,
                    Err(RecvError::Lagged(n)) => {
                        warn!(
                            missed = n,
                            pattern = ?self.pattern,
                            "watcher lagged, missed actions"
                        );
                        continue;
                    }
                    Err(RecvError::Closed) => {
                        info!("store closed, watcher shutting down");
                        break;
                    }
                },
            };

            if !self.pattern.matches(&action) {
                continue;
            }

            match self.policy {
                AdmissionPolicy::Every => {
                    self.spawn(action);
                }
                AdmissionPolicy::Leading => {
                    if running.as_ref().is_some_and(Running::is_active) {
                        debug!(
                            kind = %action.kind(),
                            action_id = %action.id(),
                            "task already running, dropping action"
                        );
                        self.task.superseded(&action);
                        continue;
                    }
                    running = Some(self.spawn(action));
                }
                AdmissionPolicy::Latest => {
                    if let Some(previous) = running.take() {
                        self.cancel_running(previous).await;
                    }
                    running = Some(self.spawn(action));
                }
            }
        }

        info!(pattern = ?self.pattern, "watcher stopped");
    }

    fn spawn(&self, action: Action) -> Running {
        let cancel = self.shutdown.child_token();
        let active = Arc::new(AtomicBool::new(true));
        let ctx = WorkerContext {
            store: self.store.clone(),
            cancel: cancel.clone(),
            action_id: action.id(),
            active: active.clone(),
        };

        let span = info_span!("task", kind = %action.kind(), action_id = %action.id());
        let work = self.task.run(action.clone(), ctx);
        let task = self.task.clone();
        let admitted = action.clone();
        let token = cancel.clone();
        let done = active.clone();

        let handle = tokio::spawn(
            async move {
                tokio::select! {
                    biased;
                    _ = token.cancelled() => debug!("task cancelled"),
                    outcome = AssertUnwindSafe(work).catch_unwind() => {
                        if let Err(panic) = outcome {
                            error!(panic = %panic_message(panic.as_ref()), "task panicked");
                            task.panicked(&admitted);
                        }
                    }
                }
                done.store(false, Ordering::Release);
            }
            .instrument(span),
        );

        Running {
            action,
            cancel,
            active,
            handle,
        }
    }

    async fn cancel_running(&self, previous: Running) {
        if !previous.is_active() {
            return;
        }

        debug!(
            kind = %previous.action.kind(),
            action_id = %previous.action.id(),
            "cancelling running task for a newer action"
        );
        previous.cancel.cancel();
        if let Err(err) = previous.handle.await {
            warn!(error = %err, "cancelled task ended abnormally");
        }
        self.task.superseded(&previous.action);
    }
}

/// Extract a readable message from a panic payload.
fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
