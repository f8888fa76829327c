//! # avara-ref-agents
//!
//! Reference scenarios for the AVARA control plane.
//!
//! Four runnable walk-throughs against the bundled default policy:
//!
//! 1. **Lifecycle**: provisioning, a cleared read, a halted delete with an
//!    operator denial, the synchronous approver, and revocation.
//! 2. **Behavioral guards**: anomaly revocation by scan count and by rate,
//!    and intent drift.
//! 3. **Tool gate**: permission, argument-name, schema, and activation checks.
//! 4. **Context**: token budget, retrieval firewall, and message monitor.
//!
//! All agents and documents are fictional. No external systems are contacted.

pub mod fixtures;
pub mod scenarios;

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use avara_audit::{verify_chain, FileLedger};
    use avara_contracts::audit::AuditEventType;

    use crate::{
        fixtures::{default_policy, start, ScenarioLedger},
        scenarios::{lifecycle, tool_gate},
    };

    #[test]
    fn test_bundled_policy_parses() {
        let policy = default_policy().unwrap();
        assert!(policy.verify_arguments);
        assert_eq!(policy.anomaly.max_flagged_repeats, 3);

        let tools: Vec<_> = policy.tools.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(tools, vec!["calculate_math", "read_file"]);
        assert!(policy.tools[0].declares_argument("expression"));

        let documents: Vec<_> = policy.documents.iter().map(|d| d.doc_id.as_str()).collect();
        assert_eq!(documents, vec!["finance-q3", "vendor-faq"]);
    }

    #[test]
    fn test_session_starts_with_registrations() {
        let session = start(ScenarioLedger::memory()).unwrap();
        assert_eq!(
            session.plane.tool_names().unwrap(),
            vec!["calculate_math", "read_file"]
        );

        let trail = session.plane.read_audit_trail(None).unwrap();
        assert_eq!(trail.len(), 3);
        assert_eq!(trail[2].event_type, AuditEventType::SystemStart);
        assert_eq!(trail[2].context["status"], "reference scenario started");
    }

    /// Scenarios sharing a file ledger extend one chain, and each report
    /// covers only its own session.
    #[test]
    fn test_scenarios_share_a_file_ledger() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("avara_audit.jsonl");
        let ledger = ScenarioLedger::file(&path).unwrap();

        let first = lifecycle::run_on(ledger.clone()).unwrap();
        let second = tool_gate::run_on(ledger).unwrap();
        assert!(first.chain_verified && second.chain_verified);
        assert_eq!(second.events[0], AuditEventType::ToolRegister);
        assert_eq!(second.count(AuditEventType::IamRevoke), 0);

        let events = FileLedger::read_events(&path).unwrap();
        assert_eq!(events.len(), first.events.len() + second.events.len());
        assert!(verify_chain(&events));
    }
}
