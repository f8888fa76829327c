//! Proposed actions and the request that carries them into the pipeline.

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::{AvaraError, AvaraResult};

/// Declared risk of a proposed action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RiskLevel {
    /// Reads of non-sensitive data, parsing.
    Low,
    /// Modifying non-sensitive state, local computation.
    Medium,
    /// Destructive or externally visible: deletion, transmission, credentials.
    High,
}

impl RiskLevel {
    /// Parse the wire spelling (`LOW`, `MEDIUM`, `HIGH`), case-insensitively.
    pub fn parse(s: &str) -> AvaraResult<Self> {
        match s.to_ascii_uppercase().as_str() {
            "LOW" => Ok(Self::Low),
            "MEDIUM" => Ok(Self::Medium),
            "HIGH" => Ok(Self::High),
            other => Err(AvaraError::SchemaValidation {
                reason: format!("unknown risk level '{}'", other),
            }),
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        };
        f.write_str(s)
    }
}

/// An action an agent is attempting to take.
///
/// Constructed once per request and only ever read by the guards.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedAction {
    action_type: String,
    target_resource: String,
    parameters: Map<String, Value>,
    risk_level: RiskLevel,
}

impl ProposedAction {
    pub fn new(
        action_type: impl Into<String>,
        target_resource: impl Into<String>,
        parameters: Map<String, Value>,
        risk_level: RiskLevel,
    ) -> Self {
        Self {
            action_type: action_type.into(),
            target_resource: target_resource.into(),
            parameters,
            risk_level,
        }
    }

    pub fn action_type(&self) -> &str {
        &self.action_type
    }

    pub fn target_resource(&self) -> &str {
        &self.target_resource
    }

    pub fn parameters(&self) -> &Map<String, Value> {
        &self.parameters
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    /// A copy of this action with its risk raised to `High`.
    ///
    /// Used when an upstream guard escalates the action; the original value
    /// is left untouched.
    pub fn escalated(&self) -> Self {
        Self {
            risk_level: RiskLevel::High,
            ..self.clone()
        }
    }
}

/// The `ValidateAction` request: who is acting, why, and what they propose.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActionRequest {
    pub agent_id: String,
    /// The task the agent was assigned, compared against the action for drift.
    pub task_intent: String,
    pub proposed_action: String,
    pub target_resource: String,
    #[serde(default)]
    pub action_args: Map<String, Value>,
    pub risk_level: RiskLevel,
}

impl ActionRequest {
    /// Build the immutable `ProposedAction` the guards evaluate.
    pub fn to_action(&self) -> ProposedAction {
        ProposedAction::new(
            self.proposed_action.as_str(),
            self.target_resource.as_str(),
            self.action_args.clone(),
            self.risk_level,
        )
    }

    /// The request as an audit context value.
    pub fn audit_context(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// Receipt returned for an action that cleared every guard and the breaker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionClearance {
    pub agent_id: String,
    pub action_type: String,
    pub target_resource: String,
    /// The risk level the breaker evaluated, after any escalation.
    pub effective_risk: RiskLevel,
    /// Ledger sequence of the `ACTION_ALLOW` entry recording this decision.
    pub audit_sequence: u64,
}
