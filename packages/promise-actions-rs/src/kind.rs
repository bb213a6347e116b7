//! Action kind identifiers.
//!
//! An [`ActionKind`] is the string tag every action carries on the bus.
//! Kinds are compared by value and are cheap to clone, so triples, watchers,
//! and history records all hold their own copy.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Deserializer, Serialize, Serializer};

/// Suffix appended to a base name for the request kind.
pub const REQUEST_SUFFIX: &str = "REQUEST";
/// Suffix appended to a base name for the success kind.
pub const SUCCESS_SUFFIX: &str = "SUCCESS";
/// Suffix appended to a base name for the failure kind.
pub const FAILURE_SUFFIX: &str = "FAILURE";

/// Opaque, comparable identifier for one kind of action.
///
/// # Example
///
/// ```ignore
/// let kind = ActionKind::new("SIGN_IN_REQUEST");
/// assert_eq!(kind, "SIGN_IN_REQUEST");
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionKind(Arc<str>);

impl ActionKind {
    /// Create a kind from any string-like value.
    pub fn new(kind: impl Into<Arc<str>>) -> Self {
        Self(kind.into())
    }

    /// Derive `BASE_SUFFIX` from a base name.
    pub(crate) fn derived(base: &str, suffix: &str) -> Self {
        Self(format!("{base}_{suffix}").into())
    }

    /// Borrow the kind as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionKind {
    fn from(kind: &str) -> Self {
        Self::new(kind)
    }
}

impl From<String> for ActionKind {
    fn from(kind: String) -> Self {
        Self::new(kind)
    }
}

impl From<&ActionKind> for ActionKind {
    fn from(kind: &ActionKind) -> Self {
        kind.clone()
    }
}

impl AsRef<str> for ActionKind {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for ActionKind {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl PartialEq<str> for ActionKind {
    fn eq(&self, other: &str) -> bool {
        &*self.0 == other
    }
}

impl PartialEq<&str> for ActionKind {
    fn eq(&self, other: &&str) -> bool {
        &*self.0 == *other
    }
}

impl Serialize for ActionKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.0)
    }
}

impl<'de> Deserialize<'de> for ActionKind {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        String::deserialize(deserializer).map(Self::from)
    }
}
