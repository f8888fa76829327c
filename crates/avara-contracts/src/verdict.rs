//! Guard and breaker verdict types.
//!
//! Each guard in the chain emits a `GuardVerdict`. The chain stops at the
//! first verdict that is not `Allow`; only the circuit breaker can suspend an
//! action into the approval workflow.

use std::fmt;

use serde::{Deserialize, Serialize};

/// The decision a single guard returns for a proposed action.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", tag = "verdict")]
pub enum GuardVerdict {
    /// The guard has no objection.
    Allow,

    /// The guard considers the action questionable.
    ///
    /// This does not halt the action on its own; see the intent guard for
    /// how the control plane treats it.
    RequireApproval {
        /// Human-readable explanation, written to the audit log.
        reason: String,
    },

    /// The action must not proceed.
    Block {
        /// Human-readable explanation, written to the audit log.
        reason: String,
    },
}

impl GuardVerdict {
    pub fn is_allow(&self) -> bool {
        matches!(self, Self::Allow)
    }

    pub fn block(reason: impl Into<String>) -> Self {
        Self::Block { reason: reason.into() }
    }
}

/// Outcome of the circuit breaker's synchronous risk classification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BreakerStatus {
    Allow,
    HaltRequireApproval,
}

/// Which guard produced a blocking verdict.
///
/// Carried by `AvaraError::Forbidden` so callers can tell rejection causes
/// apart without parsing reason strings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockingGuard {
    Anomaly,
    IntentDrift,
    ToolPermission,
    CircuitBreaker,
    Retrieval,
    Messaging,
}

impl fmt::Display for BlockingGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Anomaly => "anomaly detector",
            Self::IntentDrift => "intent validator",
            Self::ToolPermission => "tool guard",
            Self::CircuitBreaker => "circuit breaker",
            Self::Retrieval => "retrieval firewall",
            Self::Messaging => "message monitor",
        };
        f.write_str(s)
    }
}
