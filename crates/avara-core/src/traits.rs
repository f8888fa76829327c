//! Trait seams of the AVARA control plane.
//!
//! The control plane owns the trusted state (identities, approvals, action
//! history) and the order in which guards run. Everything that is policy
//! rather than mechanism sits behind one of these traits:
//!
//! - `AuditLedger`: trusted sink, every decision is appended here first
//! - `AnomalyPolicy`: judges one agent's action history
//! - `DriftScorer`: scores task intent against a proposed action
//! - `ArgumentVerifier`: structural check of tool-call arguments
//! - `TokenEstimator`: sizes an assembled prompt context
//! - `InstructionScanner`: looks for injected instructions in retrieved text
//! - `Approver`: synchronous decision source for `execute_with_breaker`
//!
//! Reference implementations of the heuristics live in `avara-policy`; the
//! ledgers live in `avara-audit`.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use avara_contracts::{
    action::ProposedAction,
    approval::ApprovalDecision,
    audit::{AuditEntry, AuditRecord},
    error::AvaraResult,
    tool::{ArgumentReport, ToolRegistration},
};

use crate::anomaly::{AnomalyAssessment, ExecutionRecord};

/// The append-only audit ledger.
///
/// Implementations assign sequence numbers and timestamps under their own
/// serialization so that entries are totally ordered and timestamps never
/// decrease along that order.
pub trait AuditLedger: Send + Sync {
    /// Append one record and return the stamped entry.
    ///
    /// A failure here is fatal for the caller: the decision being recorded
    /// must not be acted on.
    fn append(&self, record: AuditRecord) -> AvaraResult<AuditEntry>;

    /// Every entry in original append order.
    ///
    /// Must not mutate the log and may be called any number of times.
    fn replay(&self) -> AvaraResult<Vec<AuditEntry>>;

    /// The most recent `count` entries, oldest first.
    fn tail(&self, count: usize) -> AvaraResult<Vec<AuditEntry>> {
        let mut entries = self.replay()?;
        let skip = entries.len().saturating_sub(count);
        Ok(entries.split_off(skip))
    }
}

/// Judges whether an agent's recent behavior looks compromised.
///
/// Receives the full ordered history for one agent and the current time.
/// Implementations must be pure: the detector owns the bookkeeping.
pub trait AnomalyPolicy: Send + Sync {
    fn assess(&self, history: &[ExecutionRecord], now: DateTime<Utc>) -> AnomalyAssessment;
}

/// Scores how far a proposed action drifts from the declared task.
///
/// Returns a value in `[0.0, 1.0]`: 0 is fully aligned, 1 is hijacked.
pub trait DriftScorer: Send + Sync {
    fn score(&self, intent: &str, action: &str) -> f64;
}

/// Structural verification of tool-call arguments against a registration.
///
/// Runs after the declared-name check; it never sees an undeclared argument.
pub trait ArgumentVerifier: Send + Sync {
    fn verify(
        &self,
        tool: &ToolRegistration,
        arguments: &Map<String, Value>,
    ) -> AvaraResult<ArgumentReport>;
}

/// Estimates the token count of a piece of text.
pub trait TokenEstimator: Send + Sync {
    fn estimate(&self, text: &str) -> usize;
}

/// Scans untrusted retrieved text for latent instructions.
pub trait InstructionScanner: Send + Sync {
    /// Return true when `text` is safe to inject into a context.
    fn scan(&self, text: &str) -> bool;
}

/// A synchronous source of approval decisions.
///
/// Only used by the `execute_with_breaker` convenience path. The request
/// pipeline never waits on an approver.
pub trait Approver: Send + Sync {
    fn decide(&self, action: &ProposedAction) -> ApprovalDecision;
}
