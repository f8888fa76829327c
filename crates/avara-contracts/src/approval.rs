//! Pending-approval records for actions halted by the circuit breaker.
//!
//! ```text
//!             approve
//!  PENDING ───────────▶ APPROVED
//!     │
//!     │       deny
//!     └───────────────▶ DENIED
//! ```
//!
//! Both terminal states are final. A record is never removed once created;
//! resolution only changes its status.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::identity::AgentId;

/// Unique identifier for one halted action instance.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(pub String);

impl ActionId {
    /// Generate a fresh identifier of the form `act_<32 hex chars>`.
    pub fn generate() -> Self {
        Self(format!("act_{}", uuid::Uuid::new_v4().simple()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Lifecycle status of a pending approval.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Denied,
}

impl ApprovalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "PENDING",
            Self::Approved => "APPROVED",
            Self::Denied => "DENIED",
        };
        f.write_str(s)
    }
}

/// An operator's (or approver's) decision on a halted action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalDecision {
    Approve,
    Deny,
}

impl ApprovalDecision {
    /// The terminal status this decision moves a pending approval into.
    pub fn resulting_status(&self) -> ApprovalStatus {
        match self {
            Self::Approve => ApprovalStatus::Approved,
            Self::Deny => ApprovalStatus::Denied,
        }
    }

    pub fn is_approved(&self) -> bool {
        matches!(self, Self::Approve)
    }
}

/// The record the circuit breaker keeps for each halted action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PendingApproval {
    pub action_id: ActionId,
    pub agent_id: AgentId,
    pub action_type: String,
    pub target_resource: String,
    /// Wall-clock time the action was halted (UTC).
    pub raised_at: DateTime<Utc>,
    pub status: ApprovalStatus,
}
