//! Recorded history of delivered actions.
//!
//! Enabled with [`StoreConfig::record_history`](crate::StoreConfig) or
//! [`StoreBuilder::with_history`](crate::StoreBuilder::with_history). Intended
//! for tests and debugging: the log answers "which actions did the store
//! see, in which order" without subscribing to the bus.
//!
//! Records keep the payload but drop the resolution slot, so recording a
//! bridged request never keeps its promise alive.
//!
//! # Usage
//!
//! ```ignore
//! let history = store.history().expect("history enabled");
//! assert!(history.contains("SIGN_IN_SUCCESS", &TokenPair { .. }));
//! assert!(!history.contains_kind("SIGN_IN_FAILURE"));
//! ```

use std::any::Any;
use std::collections::VecDeque;
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::action::{Action, ActionId};
use crate::kind::ActionKind;

/// One delivered action.
#[derive(Clone, Serialize)]
pub struct ActionRecord {
    pub id: ActionId,
    pub kind: ActionKind,
    /// Whether the action carried a resolution slot.
    pub bridged: bool,
    pub recorded_at: DateTime<Utc>,
    #[serde(skip)]
    payload: Arc<dyn Any + Send + Sync>,
}

impl ActionRecord {
    fn from_action(action: &Action) -> Self {
        Self {
            id: action.id(),
            kind: action.kind().clone(),
            bridged: action.is_bridged(),
            recorded_at: Utc::now(),
            payload: action.payload().clone(),
        }
    }

    /// Downcast the recorded payload.
    pub fn payload_ref<T: Any>(&self) -> Option<&T> {
        self.payload.downcast_ref()
    }
}

impl fmt::Debug for ActionRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionRecord")
            .field("id", &self.id)
            .field("kind", &self.kind)
            .field("bridged", &self.bridged)
            .field("recorded_at", &self.recorded_at)
            .finish_non_exhaustive()
    }
}

/// Bounded, thread-safe log of delivered actions.
///
/// Only the most recent `limit` records are retained.
#[derive(Debug)]
pub struct ActionLog {
    records: Mutex<VecDeque<ActionRecord>>,
    limit: usize,
}

impl ActionLog {
    pub fn new(limit: usize) -> Self {
        Self {
            records: Mutex::new(VecDeque::with_capacity(limit.min(1024))),
            limit,
        }
    }

    /// Acquire the records lock, recovering from poison if necessary.
    fn lock_records(&self) -> MutexGuard<'_, VecDeque<ActionRecord>> {
        self.records
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn record(&self, action: &Action) {
        if self.limit == 0 {
            return;
        }
        let mut records = self.lock_records();
        if records.len() >= self.limit {
            records.pop_front();
        }
        records.push_back(ActionRecord::from_action(action));
    }

    /// All retained records, oldest first.
    pub fn records(&self) -> Vec<ActionRecord> {
        self.lock_records().iter().cloned().collect()
    }

    /// Kinds of all retained records, oldest first.
    pub fn kinds(&self) -> Vec<ActionKind> {
        self.lock_records()
            .iter()
            .map(|record| record.kind.clone())
            .collect()
    }

    /// Records with the given kind, oldest first.
    pub fn of_kind(&self, kind: &str) -> Vec<ActionRecord> {
        self.lock_records()
            .iter()
            .filter(|record| record.kind == kind)
            .cloned()
            .collect()
    }

    pub fn contains_kind(&self, kind: &str) -> bool {
        self.lock_records().iter().any(|record| record.kind == kind)
    }

    /// Returns true if an action of `kind` with a payload equal to `payload` was recorded.
    pub fn contains<T: Any + PartialEq>(&self, kind: &str, payload: &T) -> bool {
        self.lock_records()
            .iter()
            .any(|record| record.kind == kind && record.payload_ref::<T>() == Some(payload))
    }

    pub fn count_kind(&self, kind: &str) -> usize {
        self.lock_records()
            .iter()
            .filter(|record| record.kind == kind)
            .count()
    }

    /// Serialize the retained records (without payloads) as JSON.
    pub fn to_json(&self) -> serde_json::Result<serde_json::Value> {
        serde_json::to_value(&*self.lock_records())
    }

    pub fn clear(&self) {
        self.lock_records().clear();
    }

    pub fn len(&self) -> usize {
        self.lock_records().len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock_records().is_empty()
    }
}
