//! Promise bridge middleware.
//!
//! Turns the dispatch of a bridged request into an awaitable promise:
//!
//! 1. `ActionMeta::Plain` actions pass straight through.
//! 2. `ActionMeta::Bridged` actions have their resolution slot armed, are
//!    forwarded down the chain, and `dispatch` returns
//!    [`Dispatched::Pending`] carrying the promise.
//!
//! Install it once per store, upstream of anything that needs to see armed
//! requests:
//!
//! ```ignore
//! let store = StoreBuilder::new(state)
//!     .with_middleware(PromiseMiddleware::new())
//!     .build();
//! ```
//!
//! Re-dispatching an action whose slot is already armed forwards it without
//! creating a second promise.

use tracing::{debug, warn};

use crate::action::{Action, ActionMeta};
use crate::store::{Dispatched, Middleware, Next};

/// Middleware that arms bridged requests and returns their promise.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromiseMiddleware;

impl PromiseMiddleware {
    pub fn new() -> Self {
        Self
    }
}

impl Middleware for PromiseMiddleware {
    fn intercept(&self, action: Action, next: Next<'_>) -> Dispatched {
        let slot = match action.meta() {
            ActionMeta::Plain => return next.run(action),
            ActionMeta::Bridged(slot) => slot.clone(),
        };

        match slot.arm() {
            Ok(armed) => {
                debug!(
                    kind = %action.kind(),
                    action_id = %action.id(),
                    "armed promise for request"
                );
                next.run(action);
                Dispatched::Pending(armed)
            }
            Err(err) => {
                warn!(
                    kind = %action.kind(),
                    action_id = %action.id(),
                    error = %err,
                    "request already bridged, forwarding without a new promise"
                );
                next.run(action)
            }
        }
    }
}
