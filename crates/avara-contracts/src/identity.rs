//! Agent identity types.
//!
//! Agents never act anonymously: every guarded request names an `AgentId`
//! that must resolve to a live, unexpired `AgentIdentity` in the registry.

use std::fmt;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::scope::ScopeSet;

/// Opaque identifier for one ephemeral agent identity.
///
/// Generated ids have the form `agt_<32 hex chars>` (a full v4 UUID), which
/// keeps them collision-resistant across the lifetime of a process.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub String);

impl AgentId {
    /// Generate a fresh identifier.
    pub fn generate() -> Self {
        Self(format!("agt_{}", uuid::Uuid::new_v4().simple()))
    }

    /// Borrow the identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for AgentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for AgentId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// The role an agent operates under.
///
/// The role name doubles as the principal for document ACLs in the
/// retrieval firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentRole {
    pub name: String,
    pub description: String,
}

impl AgentRole {
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
        }
    }
}

/// Longest lifetime an identity may be provisioned with: ten years.
pub const MAX_TTL_SECONDS: i64 = 10 * 365 * 24 * 60 * 60;

/// A provisioned, time-limited agent identity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AgentIdentity {
    pub agent_id: AgentId,
    pub role: AgentRole,
    pub scopes: ScopeSet,
    /// Wall-clock time the identity was provisioned (UTC).
    pub created_at: DateTime<Utc>,
    /// Lifetime of the identity in whole seconds.
    pub ttl_seconds: i64,
}

impl AgentIdentity {
    /// The identity's time-to-live as a duration.
    ///
    /// A TTL too large for `Duration` saturates instead of panicking.
    pub fn ttl(&self) -> Duration {
        Duration::try_seconds(self.ttl_seconds).unwrap_or(Duration::MAX)
    }

    /// The instant from which the identity no longer validates.
    pub fn expires_at(&self) -> DateTime<Utc> {
        self.created_at
            .checked_add_signed(self.ttl())
            .unwrap_or(DateTime::<Utc>::MAX_UTC)
    }

    /// True once `now - created_at >= ttl`.
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now.signed_duration_since(self.created_at) >= self.ttl()
    }

    /// Exact-match scope check. No wildcard or hierarchical interpretation.
    pub fn has_scope(&self, scope: &str) -> bool {
        self.scopes.has(scope)
    }
}
