//! Tool registration and invocation checks.
//!
//! A tool must be registered (and active) before any agent can call it. An
//! invocation passes only when the caller's permissions cover every
//! permission the tool requires, every supplied argument is declared in the
//! tool's parameter schema, and the optional structural verifier accepts the
//! argument values.

use std::{
    collections::HashMap,
    sync::{RwLock, RwLockReadGuard, RwLockWriteGuard},
};

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use avara_contracts::{
    error::{AvaraError, AvaraResult},
    tool::{ToolPermission, ToolRegistration},
    verdict::GuardVerdict,
};

use crate::traits::ArgumentVerifier;

/// The set of tools agents may invoke, keyed by name.
#[derive(Default)]
pub struct ToolRegistry {
    tools: RwLock<HashMap<String, ToolRegistration>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> AvaraResult<RwLockReadGuard<'_, HashMap<String, ToolRegistration>>> {
        self.tools.read().map_err(|e| AvaraError::StateError {
            reason: format!("tool registry lock poisoned: {}", e),
        })
    }

    fn write(&self) -> AvaraResult<RwLockWriteGuard<'_, HashMap<String, ToolRegistration>>> {
        self.tools.write().map_err(|e| AvaraError::StateError {
            reason: format!("tool registry lock poisoned: {}", e),
        })
    }

    /// Add or replace a registration. Returns the replaced one, if any.
    pub fn register(&self, tool: ToolRegistration) -> AvaraResult<Option<ToolRegistration>> {
        info!(tool = %tool.name, permissions = tool.required_permissions.len(), "tool registered");
        Ok(self.write()?.insert(tool.name.clone(), tool))
    }

    pub fn get(&self, name: &str) -> AvaraResult<Option<ToolRegistration>> {
        Ok(self.read()?.get(name).cloned())
    }

    /// True when `name` is registered and active.
    pub fn is_registered(&self, name: &str) -> AvaraResult<bool> {
        Ok(self.read()?.get(name).is_some_and(|t| t.is_active))
    }

    /// Registered tool names, sorted.
    pub fn names(&self) -> AvaraResult<Vec<String>> {
        let mut names: Vec<String> = self.read()?.keys().cloned().collect();
        names.sort();
        Ok(names)
    }
}

/// Validates tool invocations against the registry.
pub struct ToolGuard {
    registry: ToolRegistry,
    verifier: Option<Box<dyn ArgumentVerifier>>,
}

impl ToolGuard {
    pub fn new(registry: ToolRegistry) -> Self {
        Self {
            registry,
            verifier: None,
        }
    }

    /// Also verify argument values structurally after the name check.
    pub fn with_verifier(mut self, verifier: Box<dyn ArgumentVerifier>) -> Self {
        self.verifier = Some(verifier);
        self
    }

    pub fn registry(&self) -> &ToolRegistry {
        &self.registry
    }

    /// Decide whether `tool_name` may be called with `arguments` by a caller
    /// holding `permissions`.
    ///
    /// Returns `Allow` or `Block`; never `RequireApproval`.
    pub fn validate_invocation(
        &self,
        tool_name: &str,
        arguments: &Map<String, Value>,
        permissions: &[ToolPermission],
    ) -> AvaraResult<GuardVerdict> {
        let Some(tool) = self.registry.get(tool_name)?.filter(|t| t.is_active) else {
            warn!(tool = tool_name, "invocation of unregistered tool");
            return Ok(GuardVerdict::block(format!(
                "tool '{}' is not registered or inactive",
                tool_name
            )));
        };

        let missing: Vec<&ToolPermission> = tool
            .required_permissions
            .iter()
            .filter(|required| !permissions.iter().any(|held| required.is_covered_by(held)))
            .collect();
        if let Some(first) = missing.first() {
            warn!(
                tool = tool_name,
                missing = missing.len(),
                action = %first.action,
                resource = %first.resource,
                "tool permission missing"
            );
            return Ok(GuardVerdict::block(format!(
                "missing permission {}:{} for tool '{}'",
                first.action, first.resource, tool_name
            )));
        }

        let mut undeclared: Vec<&str> = arguments
            .keys()
            .map(String::as_str)
            .filter(|name| !tool.declares_argument(name))
            .collect();
        if !undeclared.is_empty() {
            undeclared.sort_unstable();
            warn!(tool = tool_name, arguments = ?undeclared, "undeclared tool arguments");
            return Ok(GuardVerdict::block(format!(
                "argument(s) {} not declared by tool '{}'",
                undeclared.join(", "),
                tool_name
            )));
        }

        if let Some(verifier) = &self.verifier {
            let report = verifier.verify(&tool, arguments)?;
            if !report.passed {
                let summary = report.summary();
                warn!(tool = tool_name, violations = %summary, "tool arguments failed verification");
                return Ok(GuardVerdict::block(format!(
                    "arguments for tool '{}' failed verification: {}",
                    tool_name, summary
                )));
            }
        }

        debug!(tool = tool_name, "tool invocation permitted");
        Ok(GuardVerdict::Allow)
    }
}
