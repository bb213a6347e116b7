//! Resolving watchers: run a worker per request and settle its promise.
//!
//! A resolving watcher listens for the request kind of one [`ActionTriple`].
//! For each admitted request it:
//!
//! 1. runs the [`Worker`] with a typed [`RequestAction`]
//! 2. dispatches `success(y)` or `failure(z)` through the store
//! 3. resolves or rejects the caller's promise with the same value
//!
//! The outcome action is dispatched before the promise settles, so by the
//! time an awaiting caller wakes up, reducers have already folded the
//! outcome into state.
//!
//! Requests without a bridge (plain actions with the request kind) still run
//! the worker and produce outcome actions; there is simply no promise to
//! settle.
//!
//! # Example
//!
//! ```ignore
//! let sign_in: ActionTriple<Credentials, TokenPair, AuthError> = ActionTriple::new("SIGN_IN");
//! let scheduler = Scheduler::new(store.clone());
//!
//! scheduler.watch_leading(&sign_in, |request, _ctx| async move {
//!     auth_api::sign_in(request.payload()).await
//! });
//!
//! let tokens = store.dispatch_request(sign_in.request(credentials))?.await?;
//! ```

use std::any::type_name;
use std::future::Future;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, warn};

use crate::action::Action;
use crate::config::{SupersedePolicy, WatchOptions};
use crate::saga::{AdmittedTask, KindPattern, Scheduler, WatchHandle, WorkerContext};
use crate::triple::{ActionTriple, RequestAction};

/// Executes one request of an [`ActionTriple`].
///
/// Implemented for any async closure or fn taking a `RequestAction<X, Y, Z>`
/// and a `WorkerContext<S>` and returning `Result<Y, Z>`.
/// Implement it on a struct when the worker carries dependencies.
#[async_trait]
pub trait Worker<X, Y, Z, S>: Send + Sync + 'static {
    async fn run(&self, request: RequestAction<X, Y, Z>, ctx: WorkerContext<S>) -> Result<Y, Z>;
}

#[async_trait]
impl<X, Y, Z, S, F, Fut> Worker<X, Y, Z, S> for F
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
    S: Send + Sync + 'static,
    F: Fn(RequestAction<X, Y, Z>, WorkerContext<S>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Y, Z>> + Send + 'static,
{
    async fn run(&self, request: RequestAction<X, Y, Z>, ctx: WorkerContext<S>) -> Result<Y, Z> {
        (self)(request, ctx).await
    }
}

impl<S: Send + Sync + 'static> Scheduler<S> {
    /// Run `worker` for every request of `triple`, concurrently.
    pub fn watch_every<X, Y, Z, W>(&self, triple: &ActionTriple<X, Y, Z>, worker: W) -> WatchHandle
    where
        X: Send + Sync + 'static,
        Y: Clone + Send + Sync + 'static,
        Z: Clone + Send + Sync + 'static,
        W: Worker<X, Y, Z, S>,
    {
        self.watch(triple, worker, WatchOptions::every())
    }

    /// Run `worker` for a request of `triple` unless one is already running.
    pub fn watch_leading<X, Y, Z, W>(
        &self,
        triple: &ActionTriple<X, Y, Z>,
        worker: W,
    ) -> WatchHandle
    where
        X: Send + Sync + 'static,
        Y: Clone + Send + Sync + 'static,
        Z: Clone + Send + Sync + 'static,
        W: Worker<X, Y, Z, S>,
    {
        self.watch(triple, worker, WatchOptions::leading())
    }

    /// Run `worker` for the newest request of `triple`, cancelling older ones.
    pub fn watch_latest<X, Y, Z, W>(&self, triple: &ActionTriple<X, Y, Z>, worker: W) -> WatchHandle
    where
        X: Send + Sync + 'static,
        Y: Clone + Send + Sync + 'static,
        Z: Clone + Send + Sync + 'static,
        W: Worker<X, Y, Z, S>,
    {
        self.watch(triple, worker, WatchOptions::latest())
    }

    /// Start a resolving watcher with explicit options.
    pub fn watch<X, Y, Z, W>(
        &self,
        triple: &ActionTriple<X, Y, Z>,
        worker: W,
        options: WatchOptions,
    ) -> WatchHandle
    where
        X: Send + Sync + 'static,
        Y: Clone + Send + Sync + 'static,
        Z: Clone + Send + Sync + 'static,
        W: Worker<X, Y, Z, S>,
    {
        debug!(
            request = %triple.request_kind(),
            worker = type_name::<W>(),
            policy = ?options.policy,
            supersede = ?options.supersede,
            "starting resolving watcher"
        );

        let task = ResolvingTask {
            triple: triple.clone(),
            worker: Arc::new(worker),
            supersede: options.supersede,
        };
        self.spawn_watch(
            KindPattern::Exact(triple.request_kind().clone()),
            options.policy,
            Arc::new(task),
        )
    }
}

struct ResolvingTask<X, Y, Z, W> {
    triple: ActionTriple<X, Y, Z>,
    worker: Arc<W>,
    supersede: SupersedePolicy,
}

impl<X, Y, Z, S, W> AdmittedTask<S> for ResolvingTask<X, Y, Z, W>
where
    X: Send + Sync + 'static,
    Y: Clone + Send + Sync + 'static,
    Z: Clone + Send + Sync + 'static,
    S: Send + Sync + 'static,
    W: Worker<X, Y, Z, S>,
{
    fn run(&self, action: Action, ctx: WorkerContext<S>) -> BoxFuture<'static, ()> {
        let Some(request) = self.triple.match_request(&action) else {
            warn!(
                kind = %action.kind(),
                action_id = %action.id(),
                expected = type_name::<X>(),
                "request payload has an unexpected type, skipping"
            );
            return futures::future::ready(()).boxed();
        };

        let triple = self.triple.clone();
        let worker = self.worker.clone();
        settle_request(triple, worker, request, ctx).boxed()
    }

    fn superseded(&self, action: &Action) {
        if self.supersede != SupersedePolicy::Reject {
            return;
        }
        if let Some(request) = self.triple.match_request(action) {
            if request.supersede() {
                debug!(
                    kind = %request.kind(),
                    action_id = %request.id(),
                    "rejected superseded request"
                );
            }
        }
    }

    fn panicked(&self, action: &Action) {
        if let Some(request) = self.triple.match_request(action) {
            if request.abandon() {
                warn!(
                    kind = %request.kind(),
                    action_id = %request.id(),
                    "worker panicked, request abandoned"
                );
            }
        }
    }
}

async fn settle_request<X, Y, Z, S, W>(
    triple: ActionTriple<X, Y, Z>,
    worker: Arc<W>,
    request: RequestAction<X, Y, Z>,
    ctx: WorkerContext<S>,
) where
    X: Send + Sync + 'static,
    Y: Clone + Send + Sync + 'static,
    Z: Clone + Send + Sync + 'static,
    S: Send + Sync + 'static,
    W: Worker<X, Y, Z, S>,
{
    let outcome = worker.run(request.clone(), ctx.clone()).await;
    ctx.mark_finished();

    match outcome {
        Ok(value) => {
            debug!(kind = %triple.success_kind(), "worker succeeded");
            ctx.put(triple.success(value.clone()));
            request.resolve(value);
        }
        Err(reason) => {
            debug!(kind = %triple.failure_kind(), "worker failed");
            ctx.put(triple.failure(reason.clone()));
            request.reject(reason);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::BridgeError;
    use crate::slot::Rejection;
    use crate::store::{Store, StoreBuilder};
    use crate::testing::{mock_store, ActionLatch, Gate};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::time::timeout;

    #[derive(Debug, Clone, PartialEq)]
    struct Credentials {
        user: &'static str,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct Tokens {
        access: String,
    }

    #[derive(Debug, Clone, PartialEq)]
    struct AuthError {
        code: u16,
    }

    fn sign_in() -> ActionTriple<Credentials, Tokens, AuthError> {
        ActionTriple::new("SIGN_IN")
    }

    async fn fake_sign_in(
        request: RequestAction<Credentials, Tokens, AuthError>,
        _ctx: WorkerContext<()>,
    ) -> Result<Tokens, AuthError> {
        match request.payload().user {
            "ok" => Ok(Tokens {
                access: "token".into(),
            }),
            _ => Err(AuthError { code: 401 }),
        }
    }

    #[tokio::test]
    async fn test_success_dispatches_then_resolves() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple = sign_in();
        let _watch = scheduler.watch_every(&triple, fake_sign_in);

        let promise = store
            .dispatch_request(triple.request(Credentials { user: "ok" }))
            .unwrap();
        let tokens = timeout(Duration::from_secs(1), promise).await.unwrap().unwrap();

        let expected = Tokens {
            access: "token".into(),
        };
        assert_eq!(tokens, expected);

        // The success action was delivered before the promise settled.
        let history = store.history().unwrap();
        assert!(history.contains("SIGN_IN_SUCCESS", &expected));
        assert!(!history.contains_kind("SIGN_IN_FAILURE"));
    }

    #[tokio::test]
    async fn test_failure_dispatches_then_rejects() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple = sign_in();
        let _watch = scheduler.watch_every(&triple, fake_sign_in);

        let promise = store
            .dispatch_request(triple.request(Credentials { user: "bad" }))
            .unwrap();
        let outcome = timeout(Duration::from_secs(1), promise).await.unwrap();

        assert_eq!(outcome, Err(Rejection::Failed(AuthError { code: 401 })));
        let history = store.history().unwrap();
        assert!(history.contains("SIGN_IN_FAILURE", &AuthError { code: 401 }));
        assert!(!history.contains_kind("SIGN_IN_SUCCESS"));
    }

    #[tokio::test]
    async fn test_unit_failure_reaches_promise_and_store() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<(), u8, ()> = ActionTriple::new("PING");
        let _watch = scheduler.watch_every(
            &triple,
            |_request: RequestAction<(), u8, ()>, _ctx: WorkerContext<()>| async move {
                Err::<u8, ()>(())
            },
        );

        let promise = store.dispatch_request(triple.request_empty()).unwrap();
        let outcome = timeout(Duration::from_secs(1), promise).await.unwrap();

        assert_eq!(outcome, Err(Rejection::Failed(())));
        let history = store.history().unwrap();
        assert!(history.contains("PING_FAILURE", &()));
        assert!(!history.contains_kind("PING_SUCCESS"));
    }

    #[tokio::test]
    async fn test_every_runs_requests_concurrently() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u32, u32, ()> = ActionTriple::new("ECHO");
        let gate = Gate::new();

        let worker_gate = gate.clone();
        let _watch = scheduler.watch_every(
            &triple,
            move |request: RequestAction<u32, u32, ()>, _ctx: WorkerContext<()>| {
                let gate = worker_gate.clone();
                async move {
                    gate.pass().await;
                    Ok::<_, ()>(*request.payload())
                }
            },
        );

        let first = store.dispatch_request(triple.request(1)).unwrap();
        let second = store.dispatch_request(triple.request(2)).unwrap();

        // Both workers are parked at the same time.
        timeout(Duration::from_secs(1), gate.wait_entered(2))
            .await
            .expect("both workers should start");
        gate.open();

        assert_eq!(first.await, Ok(1));
        assert_eq!(second.await, Ok(2));
    }

    #[tokio::test]
    async fn test_leading_drops_request_while_busy() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u32, u32, ()> = ActionTriple::new("LOAD");
        let gate = Gate::new();
        let runs = Arc::new(AtomicUsize::new(0));

        let (worker_gate, worker_runs) = (gate.clone(), runs.clone());
        let _watch = scheduler.watch_leading(
            &triple,
            move |request: RequestAction<u32, u32, ()>, _ctx: WorkerContext<()>| {
                let (gate, runs) = (worker_gate.clone(), worker_runs.clone());
                async move {
                    runs.fetch_add(1, Ordering::SeqCst);
                    gate.pass().await;
                    Ok::<_, ()>(*request.payload())
                }
            },
        );

        let first = store.dispatch_request(triple.request(1)).unwrap();
        gate.wait_entered(1).await;
        let mut second = store.dispatch_request(triple.request(2)).unwrap();

        let latch = ActionLatch::observe(&store, "LOAD_SUCCESS", 1);
        gate.open();
        assert_eq!(first.await, Ok(1));
        latch.wait().await;

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.history().unwrap().count_kind("LOAD_SUCCESS"), 1);
        // Dropped without rejection: never settles with a value.
        assert!(!matches!(second.try_settled(), Some(Ok(_)) | Some(Err(Rejection::Failed(_)))));
    }

    #[tokio::test]
    async fn test_leading_admits_again_once_idle() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u32, u32, ()> = ActionTriple::new("AGAIN");
        let _watch = scheduler.watch_leading(
            &triple,
            |request: RequestAction<u32, u32, ()>, _ctx: WorkerContext<()>| async move {
                Ok::<_, ()>(request.payload() + 1)
            },
        );

        for n in 0..3 {
            let promise = store.dispatch_request(triple.request(n)).unwrap();
            assert_eq!(promise.await, Ok(n + 1));
        }
    }

    #[tokio::test]
    async fn test_leading_rejects_superseded_when_asked() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u32, u32, ()> = ActionTriple::new("STRICT");
        let gate = Gate::new();

        let worker_gate = gate.clone();
        let _watch = scheduler.watch(
            &triple,
            move |request: RequestAction<u32, u32, ()>, _ctx: WorkerContext<()>| {
                let gate = worker_gate.clone();
                async move {
                    gate.pass().await;
                    Ok::<_, ()>(*request.payload())
                }
            },
            WatchOptions::leading().reject_superseded(),
        );

        let first = store.dispatch_request(triple.request(1)).unwrap();
        gate.wait_entered(1).await;
        let second = store.dispatch_request(triple.request(2)).unwrap();

        let dropped = timeout(Duration::from_secs(1), second).await.unwrap();
        assert_eq!(dropped, Err(Rejection::Superseded));

        gate.open();
        assert_eq!(first.await, Ok(1));
    }

    #[tokio::test]
    async fn test_latest_only_newest_outcome_is_dispatched() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u64, u64, ()> = ActionTriple::new("SEARCH");
        let completions = Arc::new(AtomicUsize::new(0));

        let done = completions.clone();
        let _watch = scheduler.watch(
            &triple,
            move |request: RequestAction<u64, u64, ()>, _ctx: WorkerContext<()>| {
                let done = done.clone();
                async move {
                    tokio::time::sleep(Duration::from_millis(*request.payload())).await;
                    done.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, ()>(*request.payload())
                }
            },
            WatchOptions::latest().reject_superseded(),
        );

        let slow = store.dispatch_request(triple.request(5_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = store.dispatch_request(triple.request(10)).unwrap();

        assert_eq!(timeout(Duration::from_secs(1), fast).await.unwrap(), Ok(10));
        assert_eq!(
            timeout(Duration::from_secs(1), slow).await.unwrap(),
            Err(Rejection::Superseded)
        );

        assert_eq!(completions.load(Ordering::SeqCst), 1);
        let history = store.history().unwrap();
        assert_eq!(history.count_kind("SEARCH_SUCCESS"), 1);
        assert!(history.contains("SEARCH_SUCCESS", &10u64));
    }

    #[tokio::test]
    async fn test_latest_preserve_leaves_cancelled_promise_unresolved() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u64, u64, ()> = ActionTriple::new("QUERY");

        let _watch = scheduler.watch_latest(
            &triple,
            |request: RequestAction<u64, u64, ()>, _ctx: WorkerContext<()>| async move {
                tokio::time::sleep(Duration::from_millis(*request.payload())).await;
                Ok::<_, ()>(*request.payload())
            },
        );

        let slow = store.dispatch_request(triple.request(5_000)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        let fast = store.dispatch_request(triple.request(10)).unwrap();
        assert_eq!(fast.await, Ok(10));

        // Never resolved or rejected with a value; at most abandoned.
        match slow.timeout(Duration::from_millis(50)).await {
            Err(BridgeError::Timeout { .. }) | Ok(Err(Rejection::Abandoned)) => {}
            other => panic!("unexpected outcome for cancelled request: {other:?}"),
        }
        assert!(!store.history().unwrap().contains("QUERY_SUCCESS", &5_000u64));
    }

    #[tokio::test]
    async fn test_missing_bridge_still_dispatches_outcome() {
        let store: Store<()> = StoreBuilder::new(()).with_history().build();
        let scheduler = Scheduler::new(store.clone());
        let triple = sign_in();
        let _watch = scheduler.watch_every(&triple, fake_sign_in);
        let latch = ActionLatch::observe(&store, triple.success_kind(), 1);

        let err = store
            .dispatch_request(triple.request(Credentials { user: "ok" }))
            .unwrap_err();
        assert!(matches!(err, BridgeError::MiddlewareMissing { .. }));

        timeout(Duration::from_secs(1), latch.wait())
            .await
            .expect("success should still be dispatched");
    }

    #[tokio::test]
    async fn test_plain_request_runs_worker_without_promise() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple = sign_in();
        let _watch = scheduler.watch_every(&triple, fake_sign_in);
        let latch = ActionLatch::observe(&store, "SIGN_IN_FAILURE", 1);

        let dispatched =
            store.dispatch(Action::new("SIGN_IN_REQUEST", Credentials { user: "bad" }));
        assert!(!dispatched.is_pending());

        timeout(Duration::from_secs(1), latch.wait()).await.unwrap();
    }

    #[tokio::test]
    async fn test_mismatched_payload_is_skipped() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple = sign_in();
        let runs = Arc::new(AtomicUsize::new(0));

        let counter = runs.clone();
        let _watch = scheduler.watch_every(
            &triple,
            move |request: RequestAction<Credentials, Tokens, AuthError>, ctx: WorkerContext<()>| {
                counter.fetch_add(1, Ordering::SeqCst);
                fake_sign_in(request, ctx)
            },
        );

        store.dispatch(Action::new("SIGN_IN_REQUEST", "not credentials"));
        let promise = store
            .dispatch_request(triple.request(Credentials { user: "ok" }))
            .unwrap();
        assert!(promise.await.is_ok());

        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert_eq!(store.history().unwrap().count_kind("SIGN_IN_SUCCESS"), 1);
    }

    #[tokio::test]
    async fn test_struct_worker_with_dependencies() {
        struct Multiplier {
            factor: u32,
        }

        #[async_trait]
        impl Worker<u32, u32, String, ()> for Multiplier {
            async fn run(
                &self,
                request: RequestAction<u32, u32, String>,
                _ctx: WorkerContext<()>,
            ) -> Result<u32, String> {
                request
                    .payload()
                    .checked_mul(self.factor)
                    .ok_or_else(|| "overflow".to_string())
            }
        }

        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<u32, u32, String> = ActionTriple::new("MUL");
        let _watch = scheduler.watch_every(&triple, Multiplier { factor: 3 });

        assert_eq!(store.dispatch_request(triple.request(7)).unwrap().await, Ok(21));
        assert_eq!(
            store.dispatch_request(triple.request(u32::MAX)).unwrap().await,
            Err(Rejection::Failed("overflow".to_string()))
        );
    }

    #[tokio::test]
    async fn test_panicking_worker_abandons_promise() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<bool, (), ()> = ActionTriple::new("FRAGILE");
        let _watch = scheduler.watch_leading(
            &triple,
            |request: RequestAction<bool, (), ()>, _ctx: WorkerContext<()>| async move {
                if *request.payload() {
                    panic!("worker blew up");
                }
                Ok::<_, ()>(())
            },
        );

        let broken = store.dispatch_request(triple.request(true)).unwrap();
        let outcome = timeout(Duration::from_secs(1), broken).await.unwrap();
        assert_eq!(outcome, Err(Rejection::Abandoned));

        // The watcher keeps admitting requests.
        let healthy = store.dispatch_request(triple.request(false)).unwrap();
        assert_eq!(timeout(Duration::from_secs(1), healthy).await.unwrap(), Ok(()));
        assert!(!store.history().unwrap().contains_kind("FRAGILE_FAILURE"));
    }

    #[tokio::test]
    async fn test_worker_can_settle_early_without_double_settlement() {
        let store = mock_store();
        let scheduler = Scheduler::new(store.clone());
        let triple: ActionTriple<(), &'static str, ()> = ActionTriple::new("EARLY");
        let _watch = scheduler.watch_every(
            &triple,
            |request: RequestAction<(), &'static str, ()>, _ctx: WorkerContext<()>| async move {
                request.resolve("early");
                Ok::<_, ()>("late")
            },
        );

        let promise = store.dispatch_request(triple.request_empty()).unwrap();
        assert_eq!(promise.await, Ok("early"));
    }
}
