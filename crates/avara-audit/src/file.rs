//! Append-only JSONL ledger on disk.
//!
//! One `AuditEvent` per line, synced to disk before `append` returns. A
//! write that fails part way is truncated back off the file. Reopening a
//! file re-verifies the chain and continues it from the last line.

use std::{
    fs::{self, File, OpenOptions},
    io::{BufRead, BufReader, Write},
    path::{Path, PathBuf},
    sync::{Arc, Mutex},
};

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

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

#[derive(Debug)]
struct ChainHead {
    next_sequence: u64,
    last_hash: String,
    last_timestamp: Option<DateTime<Utc>>,
}

impl ChainHead {
    fn from_events(events: &[AuditEvent]) -> Self {
        match events.last() {
            Some(last) => Self {
                next_sequence: last.entry.sequence + 1,
                last_hash: last.this_hash.clone(),
                last_timestamp: Some(last.entry.timestamp),
            },
            None => Self {
                next_sequence: 0,
                last_hash: AuditEvent::GENESIS_HASH.to_string(),
                last_timestamp: None,
            },
        }
    }
}

/// An `AuditLedger` backed by a JSONL file.
pub struct FileLedger {
    path: PathBuf,
    head: Mutex<ChainHead>,
    clock: Arc<dyn Clock>,
}

fn write_failed(path: &Path, what: &str, e: impl std::fmt::Display) -> AvaraError {
    AvaraError::AuditWriteFailed {
        reason: format!("failed to {} ledger '{}': {}", what, path.display(), e),
    }
}

impl FileLedger {
    /// Open (or create) the ledger at `path`.
    ///
    /// Fails with `AuditWriteFailed` if an existing file cannot be parsed or
    /// its hash chain does not verify. Appending to a broken chain would
    /// make every later entry unverifiable.
    pub fn open(path: impl AsRef<Path>) -> AvaraResult<Self> {
        Self::open_with_clock(path, Arc::new(SystemClock))
    }

    pub fn open_with_clock(path: impl AsRef<Path>, clock: Arc<dyn Clock>) -> AvaraResult<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| write_failed(&path, "create directory for", e))?;
        }

        let events = if path.exists() {
            Self::read_events(&path)?
        } else {
            Vec::new()
        };
        if let Some(index) = first_broken_link(&events) {
            return Err(AvaraError::AuditWriteFailed {
                reason: format!(
                    "ledger '{}' failed chain verification at entry {}",
                    path.display(),
                    index
                ),
            });
        }

        info!(path = %path.display(), entries = events.len(), "file ledger opened");

        Ok(Self {
            head: Mutex::new(ChainHead::from_events(&events)),
            path,
            clock,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every chained event from a ledger file, skipping blank lines.
    pub fn read_events(path: &Path) -> AvaraResult<Vec<AuditEvent>> {
        let file = File::open(path).map_err(|e| write_failed(path, "open", e))?;

        let mut events = Vec::new();
        for (index, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(|e| write_failed(path, "read", e))?;
            if line.trim().is_empty() {
                continue;
            }
            let event: AuditEvent =
                serde_json::from_str(&line).map_err(|e| AvaraError::AuditWriteFailed {
                    reason: format!(
                        "malformed entry on line {} of '{}': {}",
                        index + 1,
                        path.display(),
                        e
                    ),
                })?;
            events.push(event);
        }
        Ok(events)
    }

    /// Re-read the file and verify its chain.
    pub fn verify_integrity(&self) -> AvaraResult<bool> {
        let events = Self::read_events(&self.path)?;
        Ok(first_broken_link(&events).is_none())
    }
}

impl AuditLedger for FileLedger {
    fn append(&self, record: AuditRecord) -> AvaraResult<AuditEntry> {
        let mut head = self.head.lock().map_err(|e| AvaraError::AuditWriteFailed {
            reason: format!("ledger lock poisoned: {}", e),
        })?;

        let now = self.clock.now();
        let timestamp = match head.last_timestamp {
            Some(last) if last > now => last,
            _ => now,
        };

        let entry = AuditEntry::stamp(record, head.next_sequence, timestamp);
        let event = seal(entry.clone(), &head.last_hash)?;

        let mut line = serde_json::to_string(&event).map_err(|e| AvaraError::AuditWriteFailed {
            reason: format!("audit event is not serializable: {}", e),
        })?;
        line.push('\n');

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| write_failed(&self.path, "open", e))?;
        let committed_len = file
            .metadata()
            .map_err(|e| write_failed(&self.path, "stat", e))?
            .len();

        if let Err(e) = file
            .write_all(line.as_bytes())
            .and_then(|()| file.sync_data())
        {
            // Cut off any partial line so the next append lands on a clean
            // boundary behind the last committed entry.
            if let Err(truncate) = file.set_len(committed_len) {
                warn!(path = %self.path.display(), error = %truncate, "failed to truncate torn ledger line");
            }
            return Err(write_failed(&self.path, "write", e));
        }

        // Only advance once the line has been synced to disk.
        head.next_sequence += 1;
        head.last_hash = event.this_hash;
        head.last_timestamp = Some(timestamp);

        debug!(
            sequence = entry.sequence,
            event_type = ?entry.event_type,
            agent_id = %entry.agent_id,
            "audit entry written"
        );
        Ok(entry)
    }

    fn replay(&self) -> AvaraResult<Vec<AuditEntry>> {
        if !self.path.exists() {
            return Ok(Vec::new());
        }
        Ok(Self::read_events(&self.path)?
            .into_iter()
            .map(|e| e.entry)
            .collect())
    }
}
