//! The chained form of a ledger entry.
//!
//! `AuditEvent` wraps an `AuditEntry` with the SHA-256 hashes that make
//! tampering detectable. It is what the ledgers store; callers only ever
//! see the plain `AuditEntry`.

use serde::{Deserialize, Serialize};

use avara_contracts::audit::AuditEntry;

/// A single entry in the SHA-256 hash chain.
///
/// Each event commits to the previous event via `prev_hash`, forming an
/// append-only chain. Modifying any field of the embedded entry invalidates
/// `this_hash` and every subsequent `prev_hash`, which `verify_chain`
/// detects.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEvent {
    /// The stamped entry. Flattened so each JSON line reads as the entry
    /// itself plus two hash fields.
    #[serde(flatten)]
    pub entry: AuditEntry,

    /// SHA-256 hash (hex) of the previous event, or `GENESIS_HASH` for the
    /// first event.
    pub prev_hash: String,

    /// SHA-256 hash (hex) over (sequence, prev_hash, canonical JSON of entry).
    pub this_hash: String,
}

impl AuditEvent {
    /// The sentinel `prev_hash` used for the first event in every chain.
    pub const GENESIS_HASH: &'static str =
        "0000000000000000000000000000000000000000000000000000000000000000";

    pub fn sequence(&self) -> u64 {
        self.entry.sequence
    }
}
