//! Hash-chain primitives: hashing and chain integrity verification.
//!
//! Hash input layout (bytes, in order):
//!   1. sequence as 8-byte little-endian
//!   2. prev_hash as UTF-8 bytes (64 ASCII hex chars)
//!   3. canonical JSON of the entry (serde_json with no pretty-printing)

use sha2::{Digest, Sha256};

use avara_contracts::{
    audit::AuditEntry,
    error::{AvaraError, AvaraResult},
};

use crate::event::AuditEvent;

/// Compute the SHA-256 hash for one entry linked to `prev_hash`.
///
/// Returns a lowercase 64-character hex string.
pub fn hash_event(entry: &AuditEntry, prev_hash: &str) -> AvaraResult<String> {
    let entry_json = serde_json::to_vec(entry).map_err(|e| AvaraError::AuditWriteFailed {
        reason: format!("audit entry is not serializable: {}", e),
    })?;

    let mut hasher = Sha256::new();
    hasher.update(entry.sequence.to_le_bytes());
    hasher.update(prev_hash.as_bytes());
    hasher.update(&entry_json);

    Ok(hex::encode(hasher.finalize()))
}

/// Link `entry` onto a chain whose last hash is `prev_hash`.
pub fn seal(entry: AuditEntry, prev_hash: &str) -> AvaraResult<AuditEvent> {
    let this_hash = hash_event(&entry, prev_hash)?;
    Ok(AuditEvent {
        entry,
        prev_hash: prev_hash.to_string(),
        this_hash,
    })
}

/// Verify the integrity of a hash chain.
///
/// Returns `true` when the chain is valid according to every rule:
///
/// 1. **Prev-hash linkage**: each event's `prev_hash` equals the
///    `this_hash` of the preceding event (or `GENESIS_HASH` for event 0).
/// 2. **Hash correctness**: each event's `this_hash` matches the value
///    recomputed from its own fields.
/// 3. **Position**: sequence numbers run 0, 1, 2, … without gaps.
///
/// An empty chain is valid.
pub fn verify_chain(events: &[AuditEvent]) -> bool {
    first_broken_link(events).is_none()
}

/// Index of the first event that breaks the chain, if any.
pub fn first_broken_link(events: &[AuditEvent]) -> Option<usize> {
    let mut expected_prev = AuditEvent::GENESIS_HASH;

    for (index, event) in events.iter().enumerate() {
        if event.entry.sequence != index as u64 || event.prev_hash != expected_prev {
            return Some(index);
        }

        match hash_event(&event.entry, &event.prev_hash) {
            Ok(recomputed) if recomputed == event.this_hash => {}
            _ => return Some(index),
        }

        expected_prev = event.this_hash.as_str();
    }

    None
}
