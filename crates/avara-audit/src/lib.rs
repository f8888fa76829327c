//! # avara-audit
//!
//! Append-only, SHA-256 hash-chained audit ledgers for the AVARA control
//! plane.
//!
//! ## Overview
//!
//! Every stamped `AuditEntry` is wrapped in an `AuditEvent` that links to the
//! previous event via its SHA-256 hash. Tampering with any entry breaks the
//! chain and is detected by `verify_chain`.
//!
//! Two `AuditLedger` implementations are provided:
//!
//! - [`InMemoryLedger`]: the chain lives in process memory
//! - [`FileLedger`]: one JSON line per event, flushed on every append
//!
//! ## Usage
//!
//! ```rust,ignore
//! use avara_audit::FileLedger;
//! use avara_core::traits::AuditLedger;
//!
//! let ledger = FileLedger::open("var/avara_audit.jsonl")?;
//! ledger.append(record)?;
//! assert!(ledger.verify_integrity()?);
//! ```

pub mod chain;
pub mod event;
pub mod file;
pub mod memory;

pub use chain::{hash_event, verify_chain};
pub use event::AuditEvent;
pub use file::FileLedger;
pub use memory::InMemoryLedger;

// ── Tests ─────────────────────────────────────────────────────────────────────
