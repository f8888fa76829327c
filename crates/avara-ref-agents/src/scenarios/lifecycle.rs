//! Scenario 1: Identity and approval lifecycle
//!
//! An analyst with `read:public` and a five-minute TTL:
//!   1. `read_config` at LOW risk clears every guard
//!   2. `delete_file` at HIGH risk is halted into the approval queue
//!   3. The operator denies it; a second resolution is refused
//!   4. `execute_payment` runs behind a synchronous approver, once denied and
//!      once approved
//!   5. The operator revokes the identity; the next request is unauthorized

use serde_json::{json, Map};

use avara_contracts::{
    action::{ProposedAction, RiskLevel},
    approval::ApprovalDecision,
    error::{AvaraError, AvaraResult},
};
use avara_core::breaker::{CallbackApprover, DenyAllApprover};

use crate::fixtures::{request, start, ScenarioLedger, ScenarioReport};

pub fn run_scenario() -> AvaraResult<ScenarioReport> {
    run_on(ScenarioLedger::memory())
}

pub fn run_on(ledger: ScenarioLedger) -> AvaraResult<ScenarioReport> {
    println!("=== Scenario 1: Identity and Approval Lifecycle ===");
    println!();

    let session = start(ledger)?;
    let plane = &session.plane;

    let analyst = plane.provision(
        "data_analyst",
        "Can read public data",
        ["read:public"],
        Some(300),
    )?;
    let id = analyst.agent_id.as_str();
    println!("  Provisioned:  {} ({})", id, analyst.role.name);
    println!("  Expires at:   {}", analyst.expires_at());
    println!();

    // ── Low-risk read ────────────────────────────────────────────────────────

    let read = request(id, "Fix config", "read_config", "app.yaml", json!({}), RiskLevel::Low);
    match plane.validate_action(&read) {
        Ok(clearance) => println!(
            "  read_config   → ALLOWED (risk {}, audit #{})",
            clearance.effective_risk, clearance.audit_sequence
        ),
        Err(e) => println!("  UNEXPECTED: {}", e),
    }

    // ── High-risk delete ─────────────────────────────────────────────────────

    let delete = request(id, "Clean up", "delete_file", "/var/data", json!({}), RiskLevel::High);
    let action_id = match plane.validate_action(&delete) {
        Err(AvaraError::ApprovalRequired { action_id, reason }) => {
            println!("  delete_file   → HALTED");
            println!("    Reason:     {}", reason);
            println!("    Action id:  {}", action_id);
            Some(action_id)
        }
        other => {
            println!("  UNEXPECTED: {:?}", other);
            None
        }
    };

    if let Some(action_id) = action_id {
        println!("    Pending:    {}", plane.list_pending()?.len());

        let resolved = plane.resolve_approval(&action_id, ApprovalDecision::Deny)?;
        println!("    Operator:   DENY → {}", resolved.status);

        match plane.resolve_approval(&action_id, ApprovalDecision::Approve) {
            Err(e @ AvaraError::AlreadyResolved { .. }) => println!("    Re-resolve: refused ({})", e),
            other => println!("    UNEXPECTED: {:?}", other),
        }
    }

    match plane.resolve_approval("no-such-action", ApprovalDecision::Approve) {
        Err(e @ AvaraError::NotFound { .. }) => println!("  Unknown id    → refused ({})", e),
        other => println!("  UNEXPECTED: {:?}", other),
    }
    println!();

    // ── Synchronous approver ─────────────────────────────────────────────────

    let payment = ProposedAction::new(
        "execute_payment",
        "invoice-1042",
        Map::new(),
        RiskLevel::Medium,
    );

    match plane.execute_with_breaker(id, &payment, &DenyAllApprover, || "paid") {
        Err(e @ AvaraError::PermissionDenied { .. }) => {
            println!("  execute_payment (no approver)        → {}", e)
        }
        other => println!("  UNEXPECTED: {:?}", other),
    }

    let invoice_desk = CallbackApprover::new(|action| action.target_resource() == "invoice-1042");
    match plane.execute_with_breaker(id, &payment, &invoice_desk, || "paid") {
        Ok(outcome) => println!("  execute_payment (invoice desk)       → approved, callback returned {:?}", outcome),
        Err(e) => println!("  UNEXPECTED: {}", e),
    }
    println!();

    // ── Revocation ───────────────────────────────────────────────────────────

    plane.revoke(id)?;
    println!("  Revoked {}; active identities: {}", id, plane.list_agents()?.len());
    match plane.validate_action(&read) {
        Err(e @ AvaraError::Unauthorized { .. }) => {
            println!("  read_config   → REJECTED ({}, status {})", e, e.status_code())
        }
        other => println!("  UNEXPECTED: {:?}", other),
    }
    println!();

    session.finish("Scenario 1")
}
