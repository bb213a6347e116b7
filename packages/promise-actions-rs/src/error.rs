//! Structured error types for the promise bridge.
//!
//! `BridgeError` covers misuse of the bridge and promise plumbing.
//! `TripleError` covers programmer errors when declaring a triple.
//! `Cancelled` is returned by [`WorkerContext::call`](crate::WorkerContext::call)
//! when the running task has been superseded.
//!
//! Worker failures are not represented here. They are the caller's own `Z`
//! type and travel verbatim inside [`Rejection::Failed`](crate::Rejection).
//!
//! # Example
//!
//! ```ignore
//! use promise_actions::BridgeError;
//!
//! match store.dispatch_request(fetch.request(id)) {
//!     Ok(promise) => promise.await,
//!     Err(BridgeError::MiddlewareMissing { kind }) => {
//!         // The action was still delivered, but nobody can await it.
//!         tracing::warn!(%kind, "store was built without PromiseMiddleware");
//!         return;
//!     }
//!     Err(other) => return Err(other.into()),
//! }
//! ```

use std::time::Duration;

use thiserror::Error;

use crate::kind::ActionKind;

/// Errors raised by the promise bridge.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BridgeError {
    /// A bridged request reached the end of the middleware chain without
    /// being armed. The action was delivered but no promise exists.
    #[error("no promise middleware armed request `{kind}`")]
    MiddlewareMissing { kind: ActionKind },

    /// The resolution slot was already armed by an earlier dispatch.
    #[error("resolution slot is already armed")]
    AlreadyArmed,

    /// The promise did not settle within the caller's deadline.
    #[error("promise did not settle within {after:?}")]
    Timeout { after: Duration },

    /// The armed promise does not carry the requested success/failure types.
    #[error("armed promise does not match the requested result types")]
    PromiseTypeMismatch,
}

/// Errors raised when declaring an action triple.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TripleError {
    /// Two of the three kinds in one triple are equal.
    #[error("action kind `{kind}` is used more than once in the same triple")]
    KindCollision { kind: ActionKind },
}

/// The running task was cancelled before the awaited work completed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Error)]
#[error("task was cancelled")]
pub struct Cancelled;
