//! Tool registration and argument verification types.
//!
//! Tools cannot describe their own permissions at call time. A tool is only
//! invocable if an operator registered it ahead of time with a parameter
//! schema and the permissions an agent must hold to call it.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// An `(action, resource)` permission pair.
///
/// Matching is exact on both halves; `"*"` carries no special meaning here.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ToolPermission {
    pub action: String,
    pub resource: String,
    #[serde(default)]
    pub description: String,
}

impl ToolPermission {
    pub fn new(action: impl Into<String>, resource: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource: resource.into(),
            description: String::new(),
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// True when `other` grants this permission.
    pub fn is_covered_by(&self, other: &ToolPermission) -> bool {
        self.action == other.action && self.resource == other.resource
    }
}

/// The registered description of one invocable tool.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolRegistration {
    pub name: String,
    pub description: String,
    /// A JSON Schema object. Argument names must appear under `properties`.
    pub parameters_schema: Value,
    pub required_permissions: Vec<ToolPermission>,
    #[serde(default = "default_active")]
    pub is_active: bool,
}

fn default_active() -> bool {
    true
}

impl ToolRegistration {
    /// Argument names declared under the schema's `properties` object.
    pub fn declared_arguments(&self) -> impl Iterator<Item = &str> {
        self.parameters_schema
            .get("properties")
            .and_then(Value::as_object)
            .into_iter()
            .flat_map(|props| props.keys().map(String::as_str))
    }

    /// True when `name` is declared in the parameter schema.
    pub fn declares_argument(&self, name: &str) -> bool {
        self.declared_arguments().any(|declared| declared == name)
    }
}

/// The result of verifying a tool call's arguments against its schema.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ArgumentReport {
    /// True only if no violation was found.
    pub passed: bool,
    /// All violations collected in one pass. Empty on pass.
    pub violations: Vec<ArgumentViolation>,
}

impl ArgumentReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    /// Join every violation into one line for reasons and audit contexts.
    pub fn summary(&self) -> String {
        self.violations
            .iter()
            .map(|v| format!("[{}] {}", v.path, v.message))
            .collect::<Vec<_>>()
            .join("; ")
    }
}

/// A single schema violation within an `ArgumentReport`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgumentViolation {
    /// JSON pointer into the arguments object (empty for the object itself).
    pub path: String,
    pub message: String,
}
