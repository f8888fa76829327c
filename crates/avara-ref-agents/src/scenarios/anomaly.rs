//! Scenario 2: Behavioral guards
//!
//! Sub-case A: a process scanner repeats `read_proc` past the scan limit and
//!             loses its identity mid-task
//! Sub-case B: a batch job exceeds the per-minute execution rate
//! Sub-case C: a log analyst's task drifts toward sending email and is
//!             blocked by the intent guard

use serde_json::json;

use avara_contracts::{
    action::RiskLevel,
    error::{AvaraError, AvaraResult},
};

use crate::fixtures::{request, start, ScenarioLedger, ScenarioReport};

pub fn run_scenario() -> AvaraResult<ScenarioReport> {
    run_on(ScenarioLedger::memory())
}

pub fn run_on(ledger: ScenarioLedger) -> AvaraResult<ScenarioReport> {
    println!("=== Scenario 2: Behavioral Guards ===");
    println!();

    let session = start(ledger)?;
    let plane = &session.plane;

    // ── Sub-case A: repeated scan ────────────────────────────────────────────

    println!("  ── Sub-case A: repeated read_proc ──");
    let scanner = plane.provision("process_scanner", "Inspects host processes", ["read:proc"], None)?;
    let id = scanner.agent_id.as_str();
    let scan = request(id, "Inspect processes", "read_proc", "/proc", json!({}), RiskLevel::Low);

    for attempt in 1..=6 {
        match plane.validate_action(&scan) {
            Ok(_) => println!("  attempt {}  → ALLOWED", attempt),
            Err(AvaraError::Forbidden { guard, reason }) => {
                println!("  attempt {}  → BLOCKED by {}", attempt, guard);
                println!("    {}", reason);
            }
            Err(e @ AvaraError::Unauthorized { .. }) => {
                println!("  attempt {}  → REJECTED ({})", attempt, e);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    println!();

    // ── Sub-case B: execution rate ───────────────────────────────────────────

    println!("  ── Sub-case B: execution burst ──");
    let batch = plane.provision("batch_reader", "Nightly config sync", ["read:config"], None)?;
    let id = batch.agent_id.as_str();
    let read = request(id, "Sync configuration", "read_config", "app.yaml", json!({}), RiskLevel::Low);

    let mut allowed = 0;
    for _ in 0..100 {
        match plane.validate_action(&read) {
            Ok(_) => allowed += 1,
            Err(AvaraError::Forbidden { guard, reason }) => {
                println!("  {} reads allowed, then BLOCKED by {}", allowed, guard);
                println!("    {}", reason);
                break;
            }
            Err(e) => return Err(e),
        }
    }
    println!();

    // ── Sub-case C: intent drift ─────────────────────────────────────────────

    println!("  ── Sub-case C: intent drift ──");
    let analyst = plane.provision("log_analyst", "Summarizes system logs", ["read:logs"], None)?;
    let id = analyst.agent_id.as_str();

    let parse = request(id, "Analyze syslogs", "parse_log", "/var/log/syslog", json!({}), RiskLevel::Low);
    match plane.validate_action(&parse) {
        Ok(_) => println!("  parse_log     → ALLOWED"),
        Err(e) => println!("  UNEXPECTED: {}", e),
    }

    let email = request(
        id,
        "Analyze syslogs",
        "send_email",
        "ops@example.com",
        json!({}),
        RiskLevel::Low,
    );
    match plane.validate_action(&email) {
        Err(AvaraError::Forbidden { guard, reason }) => {
            println!("  send_email    → BLOCKED by {}", guard);
            println!("    {}", reason);
        }
        other => println!("  UNEXPECTED: {:?}", other),
    }
    println!();

    session.finish("Scenario 2")
}
