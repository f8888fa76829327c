//! Scenario 3: Tool gate
//!
//! A calculator agent holding only `execute:math_engine` calls registered
//! tools. The tool guard checks, in order: registration and activation,
//! required permissions, declared argument names, then the argument values
//! against the tool's JSON Schema.

use serde_json::{json, Value};

use avara_contracts::{
    action::RiskLevel,
    error::{AvaraError, AvaraResult},
    tool::{ToolPermission, ToolRegistration},
};
use avara_core::ControlPlane;

use crate::fixtures::{request, start, ScenarioLedger, ScenarioReport};

fn attempt(plane: &ControlPlane, agent_id: &str, label: &str, tool: &str, target: &str, args: Value) {
    let call = request(agent_id, "Do arithmetic homework", tool, target, args, RiskLevel::Low);
    match plane.validate_action(&call) {
        Ok(clearance) => println!("  {:<28} → ALLOWED (audit #{})", label, clearance.audit_sequence),
        Err(AvaraError::Forbidden { guard, reason }) => {
            println!("  {:<28} → BLOCKED by {}", label, guard);
            println!("    {}", reason);
        }
        Err(e) => println!("  {:<28} → UNEXPECTED: {}", label, e),
    }
}

pub fn run_scenario() -> AvaraResult<ScenarioReport> {
    run_on(ScenarioLedger::memory())
}

pub fn run_on(ledger: ScenarioLedger) -> AvaraResult<ScenarioReport> {
    println!("=== Scenario 3: Tool Gate ===");
    println!();

    let session = start(ledger)?;
    let plane = &session.plane;
    println!("  Registered tools: {}", plane.tool_names()?.join(", "));

    let calculator = plane.provision("calculator", "Arithmetic only", ["execute:math_engine"], None)?;
    let id = calculator.agent_id.as_str();
    println!("  Agent scopes:     execute:math_engine");
    println!();

    // ── Permitted call, then the execution record ───────────────────────────

    let args = json!({ "expression": "2+2" });
    attempt(plane, id, "calculate_math(2+2)", "calculate_math", "math_engine", args.clone());
    if let Value::Object(map) = &args {
        let entry = plane.record_tool_call(id, "calculate_math", map, "4")?;
        println!("    Tool call recorded as audit #{}", entry.sequence);
    }

    // ── Rejections ───────────────────────────────────────────────────────────

    attempt(
        plane,
        id,
        "calculate_math(+shell)",
        "calculate_math",
        "math_engine",
        json!({ "expression": "2+2", "shell": "rm -rf /" }),
    );
    attempt(
        plane,
        id,
        "calculate_math(42)",
        "calculate_math",
        "math_engine",
        json!({ "expression": 42 }),
    );
    attempt(
        plane,
        id,
        "read_file(notes.txt)",
        "read_file",
        "workspace",
        json!({ "path": "notes.txt" }),
    );

    plane.register_tool(ToolRegistration {
        name: "shell_exec".to_string(),
        description: "Run a shell command (disabled)".to_string(),
        parameters_schema: json!({
            "type": "object",
            "properties": { "command": { "type": "string" } }
        }),
        required_permissions: vec![ToolPermission::new("execute", "math_engine")],
        is_active: false,
    })?;
    attempt(
        plane,
        id,
        "shell_exec(ls)",
        "shell_exec",
        "math_engine",
        json!({ "command": "ls" }),
    );
    println!();

    session.finish("Scenario 3")
}

#[cfg(test)]
mod tests {
    use avara_contracts::audit::AuditEventType;

    use super::run_scenario;

    #[test]
    fn test_tool_gate_ledger() {
        let report = run_scenario().unwrap();
        assert!(report.chain_verified);
        assert_eq!(
            report.events[3..],
            [
                AuditEventType::IamProvision,
                AuditEventType::ActionAllow,
                AuditEventType::ToolCall,
                AuditEventType::ToolBlock,
                AuditEventType::ToolBlock,
                AuditEventType::ToolBlock,
                AuditEventType::ToolRegister,
                AuditEventType::ToolBlock,
            ]
        );
    }
}
