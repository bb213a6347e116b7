//! # Promise Actions
//!
//! Promise-backed asynchronous actions for an in-process action store.
//!
//! ## Core Concepts
//!
//! An asynchronous operation is described by an [`ActionTriple`]: a request
//! kind, a success kind, and a failure kind. Dispatching a request through a
//! store with the [`PromiseMiddleware`] hands the caller a [`Promise`] that
//! settles with whatever the operation's worker produces:
//!
//! - [`Action`] = a kind, an opaque payload, and optional resolution metadata
//! - [`ResolutionSlot`] = the write-once cell a request carries to its worker
//! - [`Promise`] = the caller's end of that cell
//!
//! The key principle: **the outcome action is dispatched first, then the
//! promise settles**. A caller that awaits a promise always observes state
//! that already includes the outcome.
//!
//! ## Architecture
//!
//! ```text
//! caller
//!     │ store.dispatch_request(triple.request(x))
//!     ▼
//! PromiseMiddleware ── arms slot, returns Promise ──► caller awaits
//!     │
//!     ▼ deliver
//! reducers ─► history ─► broadcast ─────────────┐
//!                                               │
//!                                               ▼
//!                                 Scheduler watcher (every/leading/latest)
//!                                               │
//!                                               ▼
//!                                       Worker.run(request)
//!                                               │
//!                         ┌─────────────────────┴──────────────────┐
//!                         ▼                                        ▼
//!               put(success(y))                          put(failure(z))
//!               request.resolve(y)                       request.reject(z)
//! ```
//!
//! ## Key Invariants
//!
//! 1. **Only requests are bridged** - success and failure actions are plain
//! 2. **A slot settles at most once** - the first resolve or reject wins
//! 3. **A slot is armed at most once** - re-dispatch never creates a second promise
//! 4. **Payloads are untouched** - the bridge travels beside the payload
//! 5. **Outcome before settlement** - reducers see the outcome before the caller wakes
//!
//! ## Guarantees
//!
//! - **At-most-once delivery**: slow subscribers may lag and miss actions
//! - **In-memory only**: actions are not persisted
//! - **No default timeout**: use [`Promise::timeout`] where one is needed
//!
//! ## Example
//!
//! ```ignore
//! use promise_actions::{ActionTriple, PromiseMiddleware, Scheduler, StoreBuilder};
//!
//! let sign_in: ActionTriple<Credentials, TokenPair, AuthError> = ActionTriple::new("SIGN_IN");
//!
//! let store = StoreBuilder::new(AuthState::default())
//!     .with_middleware(PromiseMiddleware::new())
//!     .with_reducer(auth_reducer)
//!     .build();
//!
//! let scheduler = Scheduler::new(store.clone());
//! scheduler.watch_leading(&sign_in, |request, _ctx| async move {
//!     auth_api::sign_in(request.payload()).await
//! });
//!
//! match store.dispatch_request(sign_in.request(credentials))?.await {
//!     Ok(tokens) => println!("signed in: {}", tokens.access),
//!     Err(Rejection::Failed(err)) => println!("rejected: {err}"),
//!     Err(other) => println!("never settled: {other}"),
//! }
//! ```

// Core modules
mod action;
mod config;
mod effects;
mod error;
mod history;
mod kind;
mod middleware;
mod saga;
mod slot;
mod store;
mod triple;

// Testing utilities (feature-gated)
#[cfg(any(test, feature = "testing"))]
pub mod testing;


// Re-export action types
pub use crate::action::{Action, ActionId, ActionMeta};
pub use crate::kind::{ActionKind, FAILURE_SUFFIX, REQUEST_SUFFIX, SUCCESS_SUFFIX};
pub use crate::triple::{ActionTriple, PendingAction, RequestAction};

// Re-export promise plumbing
pub use crate::middleware::PromiseMiddleware;
pub use crate::slot::{
    ArmedPromise, ErasedSlot, Outcome, Promise, Rejection, ResolutionSlot, SlotPhase,
};

// Re-export store
pub use crate::history::{ActionLog, ActionRecord};
pub use crate::store::{Dispatched, Middleware, Next, Reducer, Store, StoreBuilder};

// Re-export scheduling
pub use crate::effects::Worker;
pub use crate::saga::{KindPattern, Scheduler, WatchHandle, WorkerContext};

// Re-export configuration
pub use crate::config::{
    AdmissionPolicy, StoreConfig, SupersedePolicy, WatchOptions, DEFAULT_CAPACITY,
    DEFAULT_HISTORY_LIMIT,
};

// Re-export error types
pub use crate::error::{BridgeError, Cancelled, TripleError};

// Re-export async_trait for Worker implementations
pub use async_trait::async_trait;
