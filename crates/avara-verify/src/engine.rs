//! Schema-based tool argument verifier for the AVARA control plane.
//!
//! `SchemaArgumentVerifier` implements the `ArgumentVerifier` trait from
//! `avara-core`. Verification runs in two phases:
//!
//! 1. **Structural**: the supplied arguments, as a JSON object, are
//!    validated against the tool's `parameters_schema` using the
//!    `jsonschema` crate.
//! 2. **Custom**: every check registered for the tool's name runs against
//!    the arguments. All failures are collected before returning so
//!    operators see the full violation set in one pass.
//!
//! The tool guard runs its declared-name check first, so this verifier never
//! sees an argument the schema does not name.

use std::collections::HashMap;

use serde_json::{Map, Value};
use tracing::{debug, warn};

use avara_contracts::{
    error::AvaraResult,
    tool::{ArgumentReport, ArgumentViolation, ToolRegistration},
};
use avara_core::traits::ArgumentVerifier;

/// A caller-supplied argument check.
///
/// Returns `Some(message)` when the arguments are unacceptable, `None`
/// otherwise.
pub type ArgumentCheckFn = Box<dyn Fn(&Map<String, Value>) -> Option<String> + Send + Sync>;

pub struct SchemaArgumentVerifier {
    /// Extra checks keyed by tool name.
    checks: HashMap<String, Vec<ArgumentCheckFn>>,
}

impl SchemaArgumentVerifier {
    pub fn new() -> Self {
        Self {
            checks: HashMap::new(),
        }
    }

    /// Run `check` on every invocation of `tool`, after schema validation.
    pub fn register_check(&mut self, tool: impl Into<String>, check: ArgumentCheckFn) {
        self.checks.entry(tool.into()).or_default().push(check);
    }
}

impl Default for SchemaArgumentVerifier {
    fn default() -> Self {
        Self::new()
    }
}

impl ArgumentVerifier for SchemaArgumentVerifier {
    fn verify(
        &self,
        tool: &ToolRegistration,
        arguments: &Map<String, Value>,
    ) -> AvaraResult<ArgumentReport> {
        let mut violations: Vec<ArgumentViolation> = Vec::new();

        // ── Phase 1: JSON Schema ─────────────────────────────────────────────
        //
        // A null schema places no structural constraint on the arguments.
        if !tool.parameters_schema.is_null() {
            let instance = Value::Object(arguments.clone());
            match jsonschema::validator_for(&tool.parameters_schema) {
                Ok(validator) => {
                    for error in validator.iter_errors(&instance) {
                        let path = error.instance_path.to_string();
                        let message = error.to_string();
                        warn!(tool = %tool.name, path = %path, %message, "argument schema violation");
                        violations.push(ArgumentViolation {
                            path: if path.is_empty() { "/".to_string() } else { path },
                            message,
                        });
                    }
                }
                Err(e) => {
                    // A broken schema in the registration must not let calls
                    // through; report it as a violation of the whole call.
                    let message = format!("invalid parameter schema: {e}");
                    warn!(tool = %tool.name, %message, "schema compilation failure");
                    violations.push(ArgumentViolation {
                        path: "/".to_string(),
                        message,
                    });
                }
            }
        }

        // ── Phase 2: custom checks ───────────────────────────────────────────
        for check in self.checks.get(&tool.name).into_iter().flatten() {
            if let Some(message) = check(arguments) {
                warn!(tool = %tool.name, %message, "custom argument check failed");
                violations.push(ArgumentViolation {
                    path: "/".to_string(),
                    message,
                });
            }
        }

        let passed = violations.is_empty();
        debug!(tool = %tool.name, passed, violation_count = violations.len(), "arguments verified");
        Ok(ArgumentReport { passed, violations })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
