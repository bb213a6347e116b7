//! The action envelope carried by the store.
//!
//! # Overview
//!
//! Every message on the bus is an [`Action`]: a kind, a type-erased payload,
//! and an [`ActionMeta`] tag saying whether the action is promise-bridged.
//! Payloads are shared behind an `Arc`, so cloning an action (for each
//! subscriber, for the history) never copies or mutates business data.
//!
//! Typed views over an action come from the
//! [`ActionTriple`](crate::ActionTriple) that built it.

use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::kind::ActionKind;
use crate::slot::ErasedSlot;

/// Unique identifier assigned to every action when it is built.
///
/// Used only for tracing; it does not take part in routing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ActionId(Uuid);

impl ActionId {
    /// Create a new random action ID.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Get the inner UUID value.
    pub fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for ActionId {
    fn from(uuid: Uuid) -> Self {
        Self(uuid)
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Metadata tag distinguishing ordinary actions from promise-bridged ones.
///
/// The promise middleware matches on this exhaustively: `Plain` actions pass
/// through untouched, `Bridged` actions have their slot armed.
#[derive(Clone)]
pub enum ActionMeta {
    /// An ordinary action. Dispatching it returns no promise.
    Plain,
    /// A request action carrying a resolution slot.
    Bridged(ErasedSlot),
}

impl ActionMeta {
    /// Returns true for bridged actions.
    pub fn is_bridged(&self) -> bool {
        matches!(self, ActionMeta::Bridged(_))
    }
}

impl fmt::Debug for ActionMeta {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ActionMeta::Plain => f.write_str("Plain"),
            ActionMeta::Bridged(slot) => f.debug_tuple("Bridged").field(&slot.phase()).finish(),
        }
    }
}

/// An immutable message sent through the store.
#[derive(Clone)]
pub struct Action {
    id: ActionId,
    kind: ActionKind,
    payload: Arc<dyn Any + Send + Sync>,
    meta: ActionMeta,
}

impl Action {
    /// Build a plain action with the given payload.
    ///
    /// # Example
    ///
    /// ```ignore
    /// store.dispatch(Action::new("SESSION_CLEARED", ()));
    /// ```
    pub fn new<P: Any + Send + Sync>(kind: impl Into<ActionKind>, payload: P) -> Self {
        Self::from_parts(kind.into(), Arc::new(payload), ActionMeta::Plain)
    }

    /// Build a plain action with a unit payload.
    pub fn unit(kind: impl Into<ActionKind>) -> Self {
        Self::new(kind, ())
    }

    pub(crate) fn from_parts(
        kind: ActionKind,
        payload: Arc<dyn Any + Send + Sync>,
        meta: ActionMeta,
    ) -> Self {
        Self::with_id(ActionId::new(), kind, payload, meta)
    }

    pub(crate) fn with_id(
        id: ActionId,
        kind: ActionKind,
        payload: Arc<dyn Any + Send + Sync>,
        meta: ActionMeta,
    ) -> Self {
        Self {
            id,
            kind,
            payload,
            meta,
        }
    }

    pub fn id(&self) -> ActionId {
        self.id
    }

    pub fn kind(&self) -> &ActionKind {
        &self.kind
    }

    /// Returns true if this action's kind equals `kind`.
    pub fn is(&self, kind: &str) -> bool {
        self.kind == kind
    }

    pub fn meta(&self) -> &ActionMeta {
        &self.meta
    }

    /// Returns true if this action carries a resolution slot.
    pub fn is_bridged(&self) -> bool {
        self.meta.is_bridged()
    }

    /// Downcast the payload to a concrete type.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }

    /// The shared, type-erased payload.
    pub fn payload(&self) -> &Arc<dyn Any + Send + Sync> {
        &self.payload
    }

    /// Type ID of the payload value.
    pub fn payload_type_id(&self) -> TypeId {
        (*self.payload).type_id()
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Action")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("meta", &self.meta)
            .finish_non_exhaustive()
    }
}
