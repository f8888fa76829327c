//! Scope-based access control types.
//!
//! An identity carries a set of literal scope strings fixed at provisioning
//! time. Scopes are never widened after provisioning and are matched by exact
//! string comparison only: `"*"` is just another scope string.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use crate::tool::ToolPermission;

/// A single capability string granted to an identity.
///
/// Scopes are conventionally written `action:resource`, e.g. `"read:public"`
/// or `"execute:math_engine"`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Scope(pub String);

impl Scope {
    /// Construct a scope from any string-like value.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Expand this scope into the `(action, resource)` pair used by the tool
    /// guard.
    ///
    /// The text before the first `:` is the action and the remainder is the
    /// resource. A scope without a colon expands to `(scope, "*")`.
    pub fn to_permission(&self) -> ToolPermission {
        match self.0.split_once(':') {
            Some((action, resource)) => ToolPermission::new(action, resource),
            None => ToolPermission::new(self.0.as_str(), "*"),
        }
    }
}

/// The full set of scopes granted to one identity.
///
/// Ordered so that serialized identities and audit contexts are stable.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ScopeSet {
    inner: BTreeSet<Scope>,
}

impl ScopeSet {
    /// Grant a scope to this set.
    pub fn grant(&mut self, scope: Scope) {
        self.inner.insert(scope);
    }

    /// Return true if the set contains exactly this scope string.
    pub fn has(&self, scope: &str) -> bool {
        self.inner.iter().any(|s| s.0 == scope)
    }

    /// Return an iterator over all granted scopes.
    pub fn all(&self) -> impl Iterator<Item = &Scope> {
        self.inner.iter()
    }

    /// Number of distinct scopes granted.
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    /// True when no scope has been granted.
    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }

    /// Expand every scope into its `(action, resource)` permission pair.
    pub fn permissions(&self) -> Vec<ToolPermission> {
        self.inner.iter().map(Scope::to_permission).collect()
    }
}

impl<S: Into<String>> FromIterator<S> for ScopeSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            inner: iter.into_iter().map(|s| Scope(s.into())).collect(),
        }
    }
}
