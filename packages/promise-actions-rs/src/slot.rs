//! Write-once resolution slots and the promises they settle.
//!
//! A [`ResolutionSlot`] travels with a bridged request action. It moves
//! through three phases and never back:
//!
//! ```text
//! Empty ──arm()──► Armed ──settle()──► Settled
//! ```
//!
//! - `arm()` is called once by the promise middleware and hands back the
//!   [`Promise`] the dispatcher returns to its caller.
//! - `resolve()` / `reject()` settle the promise. The first call wins; every
//!   later call is a no-op that returns `false`.
//! - Settling a slot that was never armed is also a no-op, so a request that
//!   bypassed the middleware degrades to dispatch-only.
//!
//! The slot is shared by every clone of the action. When the last clone is
//! dropped without settling, the promise completes with
//! [`Rejection::Abandoned`].

use std::any::Any;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::task::{Context, Poll};
use std::time::Duration;

use tokio::sync::oneshot;
use tracing::warn;

use crate::error::BridgeError;

/// Why a promise settled without a success value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rejection<Z> {
    /// The worker failed with this exact value.
    Failed(Z),
    /// A newer request took this one's place and the watcher was configured
    /// to reject superseded requests.
    Superseded,
    /// Every handle to the slot was dropped before it settled.
    Abandoned,
}

impl<Z> Rejection<Z> {
    pub fn is_failed(&self) -> bool {
        matches!(self, Rejection::Failed(_))
    }

    pub fn is_superseded(&self) -> bool {
        matches!(self, Rejection::Superseded)
    }

    pub fn is_abandoned(&self) -> bool {
        matches!(self, Rejection::Abandoned)
    }

    /// The worker's failure value, if this rejection carries one.
    pub fn into_failure(self) -> Option<Z> {
        match self {
            Rejection::Failed(reason) => Some(reason),
            _ => None,
        }
    }
}

impl<Z: fmt::Debug> fmt::Display for Rejection<Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Rejection::Failed(reason) => write!(f, "request failed: {reason:?}"),
            Rejection::Superseded => f.write_str("request was superseded"),
            Rejection::Abandoned => f.write_str("request was abandoned before it settled"),
        }
    }
}

impl<Z: fmt::Debug> std::error::Error for Rejection<Z> {}

/// What a promise settles to.
pub type Outcome<Y, Z> = Result<Y, Rejection<Z>>;

/// Observable phase of a resolution slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SlotPhase {
    Empty,
    Armed,
    Settled,
}

enum SlotState<Y, Z> {
    Empty,
    Armed(oneshot::Sender<Outcome<Y, Z>>),
    Settled,
}

/// Single-assignment pair of resolve/reject callbacks for one request.
pub struct ResolutionSlot<Y, Z> {
    state: Mutex<SlotState<Y, Z>>,
}

impl<Y, Z> ResolutionSlot<Y, Z>
where
    Y: Send + 'static,
    Z: Send + 'static,
{
    /// Create an empty slot.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(SlotState::Empty),
        }
    }

    /// Acquire the state lock, recovering from poison if necessary.
    fn lock_state(&self) -> MutexGuard<'_, SlotState<Y, Z>> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => {
                warn!("resolution slot mutex was poisoned, recovering");
                poisoned.into_inner()
            }
        }
    }

    pub fn phase(&self) -> SlotPhase {
        match *self.lock_state() {
            SlotState::Empty => SlotPhase::Empty,
            SlotState::Armed(_) => SlotPhase::Armed,
            SlotState::Settled => SlotPhase::Settled,
        }
    }

    /// Arm the slot, returning the promise it will settle.
    ///
    /// Only succeeds while the slot is empty.
    pub fn arm(&self) -> Result<Promise<Y, Z>, BridgeError> {
        let mut state = self.lock_state();
        if !matches!(*state, SlotState::Empty) {
            return Err(BridgeError::AlreadyArmed);
        }
        let (tx, rx) = oneshot::channel();
        *state = SlotState::Armed(tx);
        Ok(Promise { rx })
    }

    /// Resolve the promise with `value`. Returns true if this call settled it.
    pub fn resolve(&self, value: Y) -> bool {
        self.settle(Ok(value))
    }

    /// Reject the promise with `reason`. Returns true if this call settled it.
    pub fn reject(&self, reason: Z) -> bool {
        self.settle(Err(Rejection::Failed(reason)))
    }

    pub(crate) fn supersede(&self) -> bool {
        self.settle(Err(Rejection::Superseded))
    }

    pub(crate) fn abandon(&self) -> bool {
        self.settle(Err(Rejection::Abandoned))
    }

    fn settle(&self, outcome: Outcome<Y, Z>) -> bool {
        let mut state = self.lock_state();
        match std::mem::replace(&mut *state, SlotState::Settled) {
            SlotState::Armed(tx) => {
                // The caller may have dropped its promise; the slot is settled either way.
                let _ = tx.send(outcome);
                true
            }
            SlotState::Empty => {
                *state = SlotState::Empty;
                false
            }
            SlotState::Settled => false,
        }
    }
}

impl<Y, Z> Default for ResolutionSlot<Y, Z>
where
    Y: Send + 'static,
    Z: Send + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<Y, Z> fmt::Debug for ResolutionSlot<Y, Z>
where
    Y: Send + 'static,
    Z: Send + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResolutionSlot")
            .field("phase", &self.phase())
            .finish()
    }
}

/// Type-erased slot operations needed by code that only sees [`crate::Action`].
pub(crate) trait BridgeSlot: Send + Sync + 'static {
    fn arm_erased(&self) -> Result<ArmedPromise, BridgeError>;
    fn phase(&self) -> SlotPhase;
    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync>;
}

impl<Y, Z> BridgeSlot for ResolutionSlot<Y, Z>
where
    Y: Send + 'static,
    Z: Send + 'static,
{
    fn arm_erased(&self) -> Result<ArmedPromise, BridgeError> {
        self.arm().map(|promise| ArmedPromise(Box::new(promise)))
    }

    fn phase(&self) -> SlotPhase {
        ResolutionSlot::phase(self)
    }

    fn into_any(self: Arc<Self>) -> Arc<dyn Any + Send + Sync> {
        self
    }
}

/// A resolution slot whose result types are hidden.
#[derive(Clone)]
pub struct ErasedSlot(Arc<dyn BridgeSlot>);

impl ErasedSlot {
    pub(crate) fn new<Y, Z>(slot: Arc<ResolutionSlot<Y, Z>>) -> Self
    where
        Y: Send + 'static,
        Z: Send + 'static,
    {
        Self(slot)
    }

    pub fn phase(&self) -> SlotPhase {
        self.0.phase()
    }

    /// Arm the slot without knowing its result types.
    pub fn arm(&self) -> Result<ArmedPromise, BridgeError> {
        self.0.arm_erased()
    }

    pub(crate) fn downcast<Y, Z>(&self) -> Option<Arc<ResolutionSlot<Y, Z>>>
    where
        Y: Send + 'static,
        Z: Send + 'static,
    {
        self.0.clone().into_any().downcast::<ResolutionSlot<Y, Z>>().ok()
    }
}

impl fmt::Debug for ErasedSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ErasedSlot").field(&self.phase()).finish()
    }
}

/// A promise produced by arming a slot, with its result types hidden.
///
/// Recover the typed [`Promise`] with [`ArmedPromise::downcast`].
pub struct ArmedPromise(Box<dyn Any + Send>);

impl ArmedPromise {
    pub fn downcast<Y, Z>(self) -> Result<Promise<Y, Z>, BridgeError>
    where
        Y: Send + 'static,
        Z: Send + 'static,
    {
        self.0
            .downcast::<Promise<Y, Z>>()
            .map(|promise| *promise)
            .map_err(|_| BridgeError::PromiseTypeMismatch)
    }
}

impl fmt::Debug for ArmedPromise {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ArmedPromise").finish_non_exhaustive()
    }
}

/// Awaitable result of a bridged dispatch.
///
/// Resolves to `Ok(Y)` when the worker succeeds and to `Err(Rejection<Z>)`
/// otherwise. Dropping the promise does not cancel the worker.
#[must_use = "a promise does nothing unless awaited"]
pub struct Promise<Y, Z> {
    rx: oneshot::Receiver<Outcome<Y, Z>>,
}

impl<Y, Z> Promise<Y, Z> {
    /// Take the outcome if the promise has already settled.
    ///
    /// Returns `None` while the request is still pending.
    pub fn try_settled(&mut self) -> Option<Outcome<Y, Z>> {
        match self.rx.try_recv() {
            Ok(outcome) => Some(outcome),
            Err(oneshot::error::TryRecvError::Empty) => None,
            Err(oneshot::error::TryRecvError::Closed) => Some(Err(Rejection::Abandoned)),
        }
    }

    /// Await the promise, giving up after `after`.
    ///
    /// There is no timeout by default; this is the race against a timer
    /// callers would otherwise write themselves.
    pub async fn timeout(self, after: Duration) -> Result<Outcome<Y, Z>, BridgeError> {
        tokio::time::timeout(after, self)
            .await
            .map_err(|_| BridgeError::Timeout { after })
    }
}

impl<Y, Z> Future for Promise<Y, Z> {
    type Output = Outcome<Y, Z>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.get_mut().rx).poll(cx) {
            Poll::Ready(Ok(outcome)) => Poll::Ready(outcome),
            Poll::Ready(Err(_)) => Poll::Ready(Err(Rejection::Abandoned)),
            Poll::Pending => Poll::Pending,
        }
    }
}

impl<Y, Z> fmt::Debug for Promise<Y, Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise").finish_non_exhaustive()
    }
}
