//! Shared wiring for the reference scenarios.
//!
//! Every scenario runs against a fresh control plane built from the bundled
//! default policy. Its ledger is in memory unless the caller hands it a file
//! ledger, in which case successive scenarios extend one chain.

use std::{path::Path, sync::Arc};

use serde_json::{Map, Value};

use avara_audit::{FileLedger, InMemoryLedger};
use avara_contracts::{
    action::{ActionRequest, RiskLevel},
    audit::AuditEventType,
    error::AvaraResult,
};
use avara_core::{traits::AuditLedger, ControlPlane};
use avara_policy::PolicyConfig;

/// The bundled default policy.
pub const DEFAULT_POLICY: &str = include_str!("../policies/default.toml");

/// Parse the bundled default policy.
pub fn default_policy() -> AvaraResult<PolicyConfig> {
    PolicyConfig::from_toml_str(DEFAULT_POLICY)
}

/// Where a scenario's audit chain is kept.
#[derive(Clone)]
pub enum ScenarioLedger {
    Memory(Arc<InMemoryLedger>),
    File(Arc<FileLedger>),
}

impl ScenarioLedger {
    pub fn memory() -> Self {
        Self::Memory(Arc::new(InMemoryLedger::new()))
    }

    pub fn file(path: &Path) -> AvaraResult<Self> {
        Ok(Self::File(Arc::new(FileLedger::open(path)?)))
    }

    fn shared(&self) -> Arc<dyn AuditLedger> {
        match self {
            Self::Memory(ledger) => ledger.clone(),
            Self::File(ledger) => ledger.clone(),
        }
    }

    fn verify_integrity(&self) -> AvaraResult<bool> {
        match self {
            Self::Memory(ledger) => Ok(ledger.verify_integrity()),
            Self::File(ledger) => ledger.verify_integrity(),
        }
    }
}

/// One scenario run: a control plane on the default policy and the ledger
/// it writes to.
pub struct Session {
    pub plane: ControlPlane,
    ledger: ScenarioLedger,
    /// Entries already in the ledger before this session started.
    first_sequence: usize,
}

/// Build a session on `ledger`. The session start is already recorded.
pub fn start(ledger: ScenarioLedger) -> AvaraResult<Session> {
    let first_sequence = ledger.shared().replay()?.len();
    let plane = default_policy()?.build(ledger.shared())?;
    plane.record_system_start("reference scenario started")?;
    Ok(Session {
        plane,
        ledger,
        first_sequence,
    })
}

pub fn request(
    agent_id: &str,
    task_intent: &str,
    action: &str,
    target: &str,
    args: Value,
    risk_level: RiskLevel,
) -> ActionRequest {
    ActionRequest {
        agent_id: agent_id.to_string(),
        task_intent: task_intent.to_string(),
        proposed_action: action.to_string(),
        target_resource: target.to_string(),
        action_args: match args {
            Value::Object(map) => map,
            _ => Map::new(),
        },
        risk_level,
    }
}

/// What a scenario left in its ledger.
#[derive(Debug, Clone)]
pub struct ScenarioReport {
    pub events: Vec<AuditEventType>,
    pub chain_verified: bool,
}

impl ScenarioReport {
    pub fn count(&self, event_type: AuditEventType) -> usize {
        self.events.iter().filter(|e| **e == event_type).count()
    }
}

impl Session {
    /// Verify the ledger chain, print this session's audit trail, and build
    /// the report.
    pub fn finish(&self, scenario: &str) -> AvaraResult<ScenarioReport> {
        let mut entries = self.plane.read_audit_trail(None)?;
        entries.drain(..self.first_sequence.min(entries.len()));
        let chain_verified = self.ledger.verify_integrity()?;

        println!("  Audit trail:");
        for entry in &entries {
            println!(
                "    #{:<3} {:<26} {:<38} {}",
                entry.sequence,
                entry.event_type.to_string(),
                entry.agent_id,
                entry
                    .decision
                    .map(|d| format!("{:?}", d).to_uppercase())
                    .unwrap_or_default()
            );
        }
        println!();
        println!(
            "  Audit chain integrity:  {} ({} entries)",
            if chain_verified { "VERIFIED" } else { "FAILED" },
            entries.len()
        );
        println!();
        println!("  {} complete.", scenario);
        println!();

        Ok(ScenarioReport {
            events: entries.into_iter().map(|e| e.event_type).collect(),
            chain_verified,
        })
    }
}
