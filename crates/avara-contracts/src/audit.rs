//! Audit record and entry types.
//!
//! An `AuditRecord` is what a component hands to the ledger. The ledger
//! stamps it with a sequence number and timestamp, producing an immutable
//! `AuditEntry`. Entries are never modified or removed once written.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// What kind of decision or transition an entry records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditEventType {
    IamProvision,
    IamRevoke,
    /// An identity was revoked because its TTL had elapsed.
    IamExpired,
    /// An identity was revoked because its behavior was anomalous.
    AnomalyRevoke,
    /// A request named an unknown, expired, or revoked identity.
    Unauthorized,
    IntentBlock,
    ToolBlock,
    ToolRegister,
    ToolCall,
    ApprovalRequest,
    ApprovalResolved,
    /// A resolution attempt named an unknown or already-resolved action.
    ApprovalRejected,
    ActionAllow,
    ContextSaturationBlock,
    RetrievalBlock,
    MessageBlock,
    MessageRelay,
    SystemStart,
}

impl fmt::Display for AuditEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // The serde spelling is the canonical one used in log files.
        let s = serde_json::to_value(self)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        f.write_str(&s)
    }
}

/// The decision recorded alongside an event, when there is one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditDecision {
    Allow,
    Block,
    Pending,
    Approved,
    Denied,
    Revoked,
    Rejected,
}

/// A decision a component wants recorded, before the ledger stamps it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub event_type: AuditEventType,
    pub agent_id: String,
    pub decision: Option<AuditDecision>,
    pub context: Value,
}

impl AuditRecord {
    pub fn new(event_type: AuditEventType, agent_id: impl Into<String>) -> Self {
        Self {
            event_type,
            agent_id: agent_id.into(),
            decision: None,
            context: Value::Null,
        }
    }

    pub fn with_decision(mut self, decision: AuditDecision) -> Self {
        self.decision = Some(decision);
        self
    }

    pub fn with_context(mut self, context: Value) -> Self {
        self.context = context;
        self
    }
}

/// One immutable, ordered entry in the audit ledger.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    /// Position in append order, starting at 0.
    pub sequence: u64,
    /// Time the ledger accepted the entry. Non-decreasing in `sequence` order.
    pub timestamp: DateTime<Utc>,
    pub event_type: AuditEventType,
    pub agent_id: String,
    pub decision: Option<AuditDecision>,
    pub context: Value,
}

impl AuditEntry {
    /// Stamp `record` with its ledger position and acceptance time.
    pub fn stamp(record: AuditRecord, sequence: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            sequence,
            timestamp,
            event_type: record.event_type,
            agent_id: record.agent_id,
            decision: record.decision,
            context: record.context,
        }
    }
}
