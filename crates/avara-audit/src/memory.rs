//! In-memory hash-chained ledger.

use std::sync::{Arc, Mutex};

use tracing::debug;

use avara_contracts::{
    audit::{AuditEntry, AuditRecord},
    error::{AvaraError, AvaraResult},
};
use avara_core::{
    clock::{Clock, SystemClock},
    traits::AuditLedger,
};

use crate::{
    chain::{first_broken_link, seal},
    event::AuditEvent,
};

/// Internal mutable state, protected by the mutex in `InMemoryLedger`.
///
/// `pub(crate)` so tests inside this crate can tamper with it directly.
#[derive(Debug, Default)]
pub(crate) struct LedgerState {
    pub(crate) events: Vec<AuditEvent>,
}

impl LedgerState {
    pub(crate) fn last_hash(&self) -> &str {
        self.events
            .last()
            .map(|e| e.this_hash.as_str())
            .unwrap_or(AuditEvent::GENESIS_HASH)
    }
}

/// An `AuditLedger` that keeps the whole chain in memory.
///
/// Appends are serialized by a single mutex: the sequence number, the
/// timestamp floor and the prev-hash link are all read and advanced while
/// it is held. Cloning shares the same chain.
#[derive(Clone)]
pub struct InMemoryLedger {
    pub(crate) state: Arc<Mutex<LedgerState>>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLedger {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// A ledger that stamps entries from `clock`.
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            state: Arc::new(Mutex::new(LedgerState::default())),
            clock,
        }
    }

    /// Snapshot of the chained events.
    ///
    /// Returns an empty vector if the lock is poisoned.
    pub fn events(&self) -> Vec<AuditEvent> {
        match self.state.lock() {
            Ok(state) => state.events.clone(),
            Err(_) => Vec::new(),
        }
    }

    /// Hash of the newest event, or the genesis hash for an empty chain.
    pub fn terminal_hash(&self) -> String {
        match self.state.lock() {
            Ok(state) => state.last_hash().to_string(),
            Err(_) => AuditEvent::GENESIS_HASH.to_string(),
        }
    }

    /// Re-verify the whole chain.
    ///
    /// A poisoned lock counts as a failed verification.
    pub fn verify_integrity(&self) -> bool {
        match self.state.lock() {
            Ok(state) => first_broken_link(&state.events).is_none(),
            Err(_) => false,
        }
    }

    fn lock(&self) -> AvaraResult<std::sync::MutexGuard<'_, LedgerState>> {
        self.state.lock().map_err(|e| AvaraError::AuditWriteFailed {
            reason: format!("ledger lock poisoned: {}", e),
        })
    }
}

impl Default for InMemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl AuditLedger for InMemoryLedger {
    fn append(&self, record: AuditRecord) -> AvaraResult<AuditEntry> {
        let mut state = self.lock()?;

        let sequence = state.events.len() as u64;
        let now = self.clock.now();
        let timestamp = match state.events.last() {
            Some(last) if last.entry.timestamp > now => last.entry.timestamp,
            _ => now,
        };

        let entry = AuditEntry::stamp(record, sequence, timestamp);
        let event = seal(entry.clone(), state.last_hash())?;

        debug!(
            sequence,
            event_type = ?entry.event_type,
            agent_id = %entry.agent_id,
            "audit entry appended"
        );

        state.events.push(event);
        Ok(entry)
    }

    fn replay(&self) -> AvaraResult<Vec<AuditEntry>> {
        let state = self.lock()?;
        Ok(state.events.iter().map(|e| e.entry.clone()).collect())
    }
}
