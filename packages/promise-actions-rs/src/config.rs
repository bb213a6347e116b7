//! Configuration for stores and watchers.
//!
//! Both structs deserialize with serde defaults, so hosts can embed them in
//! their own configuration files. Builders remain the primary way to set them.

use serde::{Deserialize, Serialize};

/// Default broadcast capacity of a store.
pub const DEFAULT_CAPACITY: usize = 10_000;

/// Default number of actions retained by the history.
pub const DEFAULT_HISTORY_LIMIT: usize = 1_000;

/// Store construction settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Broadcast channel capacity. Subscribers that fall further behind lag
    /// and miss actions.
    pub capacity: usize,
    /// Record every delivered action in an [`ActionLog`](crate::ActionLog).
    pub record_history: bool,
    /// Maximum number of records the history keeps.
    pub history_limit: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_CAPACITY,
            record_history: false,
            history_limit: DEFAULT_HISTORY_LIMIT,
        }
    }
}

/// How a watcher treats a request that arrives while a task is running.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdmissionPolicy {
    /// Spawn a task for every request.
    #[default]
    Every,
    /// Drop requests while a task is running.
    Leading,
    /// Cancel the running task and start the new request.
    Latest,
}

/// What happens to a request dropped by `Leading` or cancelled by `Latest`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SupersedePolicy {
    /// Leave its promise unsettled. It completes with
    /// [`Rejection::Abandoned`](crate::Rejection::Abandoned) only once every
    /// copy of the action has been dropped.
    #[default]
    Preserve,
    /// Reject its promise with [`Rejection::Superseded`](crate::Rejection::Superseded).
    Reject,
}

/// Settings for one resolving watcher.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WatchOptions {
    pub policy: AdmissionPolicy,
    pub supersede: SupersedePolicy,
}

impl WatchOptions {
    pub fn every() -> Self {
        Self::with_policy(AdmissionPolicy::Every)
    }

    pub fn leading() -> Self {
        Self::with_policy(AdmissionPolicy::Leading)
    }

    pub fn latest() -> Self {
        Self::with_policy(AdmissionPolicy::Latest)
    }

    pub fn with_policy(policy: AdmissionPolicy) -> Self {
        Self {
            policy,
            supersede: SupersedePolicy::default(),
        }
    }

    /// Reject dropped or cancelled requests instead of leaving them pending.
    pub fn reject_superseded(mut self) -> Self {
        self.supersede = SupersedePolicy::Reject;
        self
    }
}
