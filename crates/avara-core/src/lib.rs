//! # avara-core
//!
//! The runtime authorization control plane for autonomous agents.
//!
//! This crate provides:
//! - The trait seams for the audit ledger and every pluggable heuristic
//! - The stateful guards: identity registry, anomaly detector, tool registry,
//!   circuit breaker, context governor, retrieval firewall, message monitor
//! - The `ControlPlane` that runs them in the trusted order
//!
//! ## Usage
//!
//! ```rust,ignore
//! use avara_core::{ControlPlane, traits::AuditLedger};
//!
//! let plane = ControlPlane::builder(ledger)
//!     .anomaly_policy(Box::new(policy))
//!     .drift_scorer(Box::new(scorer))
//!     .token_estimator(Box::new(estimator))
//!     .instruction_scanner(Box::new(scanner))
//!     .build()?;
//! ```

use std::sync::{Mutex, MutexGuard};

use avara_contracts::error::{AvaraError, AvaraResult};

pub mod anomaly;
pub mod breaker;
pub mod clock;
pub mod context;
pub mod identity;
pub mod intent;
pub mod messaging;
pub mod pipeline;
pub mod retrieval;
pub mod tools;
pub mod traits;

pub use pipeline::{ControlPlane, ControlPlaneBuilder};

/// Agent id recorded on ledger entries that no agent caused.
pub const SYSTEM_AGENT: &str = "SYSTEM";

/// Lock shared state, turning a poisoned lock into a `StateError`.
pub(crate) fn lock_state<'a, T>(
    mutex: &'a Mutex<T>,
    what: &str,
) -> AvaraResult<MutexGuard<'a, T>> {
    mutex.lock().map_err(|e| AvaraError::StateError {
        reason: format!("{} lock poisoned: {}", what, e),
    })
}

#[cfg(test)]
pub(crate) mod testing {
    //! Ledger doubles shared by the unit tests in this crate.

    use std::sync::Mutex;

    use chrono::Utc;

    use avara_contracts::{
        audit::{AuditEntry, AuditEventType, AuditRecord},
        error::{AvaraError, AvaraResult},
    };

    use crate::traits::AuditLedger;

    /// Keeps every entry in memory, stamped like a real ledger.
    #[derive(Default)]
    pub struct RecordingLedger {
        entries: Mutex<Vec<AuditEntry>>,
    }

    impl RecordingLedger {
        pub fn events(&self) -> Vec<AuditEventType> {
            self.entries
                .lock()
                .unwrap()
                .iter()
                .map(|e| e.event_type)
                .collect()
        }
    }

    impl AuditLedger for RecordingLedger {
        fn append(&self, record: AuditRecord) -> AvaraResult<AuditEntry> {
            let mut entries = self.entries.lock().unwrap();
            let now = Utc::now();
            let timestamp = entries.last().map_or(now, |last| last.timestamp.max(now));
            let entry = AuditEntry::stamp(record, entries.len() as u64, timestamp);
            entries.push(entry.clone());
            Ok(entry)
        }

        fn replay(&self) -> AvaraResult<Vec<AuditEntry>> {
            Ok(self.entries.lock().unwrap().clone())
        }
    }

    /// Refuses every write.
    pub struct FailingLedger;

    impl AuditLedger for FailingLedger {
        fn append(&self, _record: AuditRecord) -> AvaraResult<AuditEntry> {
            Err(AvaraError::AuditWriteFailed {
                reason: "disk full".to_string(),
            })
        }

        fn replay(&self) -> AvaraResult<Vec<AuditEntry>> {
            Ok(Vec::new())
        }
    }
}
