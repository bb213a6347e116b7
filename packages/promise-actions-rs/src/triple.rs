//! Action-triple factory.
//!
//! An [`ActionTriple`] groups the request, success, and failure kinds of one
//! logical asynchronous operation, together with builders for each:
//!
//! | Builder | Produces | Bridged? |
//! |---------|----------|----------|
//! | `request(x)` | [`PendingAction`] | yes |
//! | `success(y)` | [`Action`] | no |
//! | `failure(z)` | [`Action`] | no |
//!
//! Triples are declared once and reused for every dispatch. They hold no
//! per-call state.
//!
//! # Example
//!
//! ```ignore
//! use promise_actions::ActionTriple;
//!
//! // SIGN_IN_REQUEST / SIGN_IN_SUCCESS / SIGN_IN_FAILURE
//! let sign_in: ActionTriple<Credentials, TokenPair, AuthError> = ActionTriple::new("SIGN_IN");
//!
//! // Interop with an existing vocabulary
//! let legacy: ActionTriple<(), (), ()> =
//!     ActionTriple::with_kinds("auth/logout", "auth/logout_ok", "auth/logout_err")?;
//! ```

use std::any::Any;
use std::fmt;
use std::marker::PhantomData;
use std::sync::Arc;

use tracing::trace;

use crate::action::{Action, ActionId, ActionMeta};
use crate::error::TripleError;
use crate::kind::{ActionKind, FAILURE_SUFFIX, REQUEST_SUFFIX, SUCCESS_SUFFIX};
use crate::slot::{ErasedSlot, ResolutionSlot, SlotPhase};

/// Request/success/failure builders for one asynchronous operation.
///
/// - `X` is the request payload
/// - `Y` is the success payload (what the promise resolves to)
/// - `Z` is the failure payload (what the promise rejects with)
pub struct ActionTriple<X, Y, Z> {
    request: ActionKind,
    success: ActionKind,
    failure: ActionKind,
    _types: PhantomData<fn(X) -> (Y, Z)>,
}

impl<X, Y, Z> ActionTriple<X, Y, Z>
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    /// Derive `BASE_REQUEST`, `BASE_SUCCESS`, and `BASE_FAILURE` from `base`.
    pub fn new(base: impl AsRef<str>) -> Self {
        let base = base.as_ref();
        Self::from_kinds(
            ActionKind::derived(base, REQUEST_SUFFIX),
            ActionKind::derived(base, SUCCESS_SUFFIX),
            ActionKind::derived(base, FAILURE_SUFFIX),
        )
    }

    /// Use the three kinds verbatim.
    ///
    /// Fails if any two of them are equal.
    pub fn with_kinds(
        request: impl Into<ActionKind>,
        success: impl Into<ActionKind>,
        failure: impl Into<ActionKind>,
    ) -> Result<Self, TripleError> {
        let (request, success, failure) = (request.into(), success.into(), failure.into());

        if request == success || request == failure {
            return Err(TripleError::KindCollision { kind: request });
        }
        if success == failure {
            return Err(TripleError::KindCollision { kind: success });
        }

        Ok(Self::from_kinds(request, success, failure))
    }

    fn from_kinds(request: ActionKind, success: ActionKind, failure: ActionKind) -> Self {
        Self {
            request,
            success,
            failure,
            _types: PhantomData,
        }
    }

    pub fn request_kind(&self) -> &ActionKind {
        &self.request
    }

    pub fn success_kind(&self) -> &ActionKind {
        &self.success
    }

    pub fn failure_kind(&self) -> &ActionKind {
        &self.failure
    }

    /// The request, success, and failure kinds, in that order.
    pub fn kinds(&self) -> [&ActionKind; 3] {
        [&self.request, &self.success, &self.failure]
    }

    /// Build a bridged request action carrying `payload`.
    pub fn request(&self, payload: X) -> PendingAction<X, Y, Z> {
        let pending = PendingAction {
            id: ActionId::new(),
            kind: self.request.clone(),
            payload: Arc::new(payload),
            slot: Arc::new(ResolutionSlot::new()),
        };
        trace!(kind = %pending.kind, action_id = %pending.id, "built request action");
        pending
    }

    /// Build a plain success action.
    pub fn success(&self, payload: Y) -> Action {
        Action::from_parts(self.success.clone(), Arc::new(payload), ActionMeta::Plain)
    }

    /// Build a plain failure action.
    pub fn failure(&self, payload: Z) -> Action {
        Action::from_parts(self.failure.clone(), Arc::new(payload), ActionMeta::Plain)
    }

    /// Returns true if `action` has this triple's request kind.
    pub fn matches_request(&self, action: &Action) -> bool {
        action.kind() == &self.request
    }

    /// Typed view of `action` if it is a request of this triple.
    ///
    /// Returns `None` when the kind differs or the payload is not an `X`.
    /// A request that carries no bridge (a plain action with the request
    /// kind) is still matched; settling it is a no-op.
    pub fn match_request(&self, action: &Action) -> Option<RequestAction<X, Y, Z>> {
        if !self.matches_request(action) {
            return None;
        }

        let payload = action.payload().clone().downcast::<X>().ok()?;
        let slot = match action.meta() {
            ActionMeta::Plain => None,
            ActionMeta::Bridged(slot) => slot.downcast::<Y, Z>(),
        };

        Some(RequestAction {
            id: action.id(),
            kind: action.kind().clone(),
            payload,
            slot,
        })
    }
}

impl<Y, Z> ActionTriple<(), Y, Z>
where
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    /// Build a request action for a triple whose request carries no payload.
    pub fn request_empty(&self) -> PendingAction<(), Y, Z> {
        self.request(())
    }
}

impl<X, Y, Z> Clone for ActionTriple<X, Y, Z> {
    fn clone(&self) -> Self {
        Self {
            request: self.request.clone(),
            success: self.success.clone(),
            failure: self.failure.clone(),
            _types: PhantomData,
        }
    }
}

impl<X, Y, Z> fmt::Debug for ActionTriple<X, Y, Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionTriple")
            .field("request", &self.request)
            .field("success", &self.success)
            .field("failure", &self.failure)
            .finish()
    }
}

/// A request action that has not been dispatched yet.
///
/// Dispatch it with [`Store::dispatch_request`](crate::Store::dispatch_request)
/// to get its promise, or convert it into an [`Action`] to send it as-is.
pub struct PendingAction<X, Y, Z> {
    id: ActionId,
    kind: ActionKind,
    payload: Arc<X>,
    slot: Arc<ResolutionSlot<Y, Z>>,
}

impl<X, Y, Z> PendingAction<X, Y, Z>
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn payload(&self) -> &X {
        &self.payload
    }

    pub fn phase(&self) -> SlotPhase {
        self.slot.phase()
    }

    /// Erase the payload types, keeping the resolution slot attached.
    pub fn into_action(self) -> Action {
        let payload: Arc<dyn Any + Send + Sync> = self.payload;
        Action::with_id(
            self.id,
            self.kind,
            payload,
            ActionMeta::Bridged(ErasedSlot::new(self.slot)),
        )
    }
}

impl<X, Y, Z> From<PendingAction<X, Y, Z>> for Action
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    fn from(pending: PendingAction<X, Y, Z>) -> Self {
        pending.into_action()
    }
}

impl<X, Y, Z> fmt::Debug for PendingAction<X, Y, Z>
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PendingAction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("phase", &self.slot.phase())
            .finish_non_exhaustive()
    }
}

/// Typed view of an admitted request, as handed to workers.
///
/// `resolve` and `reject` settle the caller's promise directly. They are
/// first-call-wins and do nothing when the request was never bridged.
pub struct RequestAction<X, Y, Z> {
    id: ActionId,
    kind: ActionKind,
    payload: Arc<X>,
    slot: Option<Arc<ResolutionSlot<Y, Z>>>,
}

impl<X, Y, Z> RequestAction<X, Y, Z>
where
    X: Send + Sync + 'static,
    Y: Send + Sync + 'static,
    Z: Send + Sync + 'static,
{
    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    pub fn payload(&self) -> &X {
        &self.payload
    }

    /// Returns true if a promise is waiting on this request.
    pub fn is_bridged(&self) -> bool {
        self.phase() == SlotPhase::Armed
    }

    pub fn phase(&self) -> SlotPhase {
        self.slot
            .as_ref()
            .map_or(SlotPhase::Empty, |slot| slot.phase())
    }

    /// Resolve the caller's promise with `value`.
    pub fn resolve(&self, value: Y) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.resolve(value))
    }

    /// Reject the caller's promise with `reason`.
    pub fn reject(&self, reason: Z) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.reject(reason))
    }

    pub(crate) fn supersede(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.supersede())
    }

    pub(crate) fn abandon(&self) -> bool {
        self.slot.as_ref().is_some_and(|slot| slot.abandon())
    }
}

impl<X, Y, Z> Clone for RequestAction<X, Y, Z> {
    fn clone(&self) -> Self {
        Self {
            id: self.id,
            kind: self.kind.clone(),
            payload: self.payload.clone(),
            slot: self.slot.clone(),
        }
    }
}

impl<X: fmt::Debug, Y, Z> fmt::Debug for RequestAction<X, Y, Z> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RequestAction")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("payload", &self.payload)
            .finish_non_exhaustive()
    }
}
