//! The policy file schema and the control-plane assembly.
//!
//! A `PolicyConfig` is deserialized from TOML. Every section is optional and
//! falls back to the built-in defaults, so an empty file is a valid policy.
//!
//! ```toml
//! verify_arguments = true
//!
//! [identity]
//! default_ttl_seconds = 3600
//!
//! [intent]
//! block_above = 0.8
//! review_above = 0.5
//!
//! [breaker]
//! high_risk_actions = ["delete_file", "execute_payment"]
//!
//! [[tools]]
//! name = "calculate_math"
//! description = "Evaluate an arithmetic expression"
//! parameters_schema = { type = "object", properties = { expression = { type = "string" } } }
//! required_permissions = [{ action = "execute", resource = "math_engine" }]
//! ```

use std::{path::Path, sync::Arc};

use serde::Deserialize;
use tracing::{debug, info};

use avara_contracts::{
    context::DocumentProvenance,
    error::{AvaraError, AvaraResult},
    identity::MAX_TTL_SECONDS,
    tool::ToolRegistration,
};
use avara_core::{
    breaker::BreakerConfig,
    clock::{Clock, SystemClock},
    context::ContextConfig,
    identity::IdentityConfig,
    intent::IntentConfig,
    messaging::MessagingConfig,
    traits::AuditLedger,
    ControlPlane,
};
use avara_verify::SchemaArgumentVerifier;

use crate::heuristics::{
    AnomalyConfig, DriftConfig, KeywordDriftScorer, RetrievalConfig, SignatureScanner,
    ThresholdAnomalyPolicy, WhitespaceTokenEstimator,
};

fn default_true() -> bool {
    true
}

/// A complete control-plane policy.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Check tool argument values against each tool's JSON Schema, on top of
    /// the declared-name check.
    #[serde(default = "default_true")]
    pub verify_arguments: bool,
    pub identity: IdentityConfig,
    pub anomaly: AnomalyConfig,
    pub drift: DriftConfig,
    pub intent: IntentConfig,
    pub breaker: BreakerConfig,
    pub context: ContextConfig,
    pub retrieval: RetrievalConfig,
    pub messaging: MessagingConfig,
    /// Tools registered when the control plane is built.
    pub tools: Vec<ToolRegistration>,
    /// Document provenance registered when the control plane is built.
    pub documents: Vec<DocumentProvenance>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            verify_arguments: true,
            identity: IdentityConfig::default(),
            anomaly: AnomalyConfig::default(),
            drift: DriftConfig::default(),
            intent: IntentConfig::default(),
            breaker: BreakerConfig::default(),
            context: ContextConfig::default(),
            retrieval: RetrievalConfig::default(),
            messaging: MessagingConfig::default(),
            tools: Vec::new(),
            documents: Vec::new(),
        }
    }
}

impl PolicyConfig {
    /// Parse `s` as a TOML policy.
    ///
    /// Returns `AvaraError::ConfigError` if the TOML is malformed, does not
    /// match the schema, or carries values no control plane can run with.
    pub fn from_toml_str(s: &str) -> AvaraResult<Self> {
        let config: PolicyConfig = toml::from_str(s).map_err(|e| AvaraError::ConfigError {
            reason: format!("failed to parse policy TOML: {}", e),
        })?;
        config.validate()?;
        debug!(
            tools = config.tools.len(),
            documents = config.documents.len(),
            "policy parsed"
        );
        Ok(config)
    }

    /// Read the file at `path` and parse it as a TOML policy.
    pub fn from_file(path: &Path) -> AvaraResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| AvaraError::ConfigError {
            reason: format!("failed to read policy file '{}': {}", path.display(), e),
        })?;
        Self::from_toml_str(&contents)
    }

    fn validate(&self) -> AvaraResult<()> {
        let invalid = |reason: String| Err(AvaraError::ConfigError { reason });

        if !(1..=MAX_TTL_SECONDS).contains(&self.anomaly.window_seconds) {
            return invalid(format!(
                "anomaly.window_seconds must be within [1, {}], got {}",
                MAX_TTL_SECONDS, self.anomaly.window_seconds
            ));
        }
        if !(0..=MAX_TTL_SECONDS).contains(&self.identity.default_ttl_seconds) {
            return invalid(format!(
                "identity.default_ttl_seconds must be within [0, {}], got {}",
                MAX_TTL_SECONDS, self.identity.default_ttl_seconds
            ));
        }
        if self.context.max_tokens == 0 {
            return invalid("context.max_tokens must be positive".to_string());
        }
        if !(0.0..=1.0).contains(&self.messaging.min_confidence) {
            return invalid(format!(
                "messaging.min_confidence must be within [0, 1], got {}",
                self.messaging.min_confidence
            ));
        }
        if let Some(rule) = self
            .drift
            .rules
            .iter()
            .find(|r| !(0.0..=1.0).contains(&r.score))
        {
            return invalid(format!(
                "drift rule '{}'/'{}' has score {} outside [0, 1]",
                rule.task_contains, rule.action_contains, rule.score
            ));
        }
        if let Some(tool) = self.tools.iter().find(|t| t.name.trim().is_empty()) {
            return invalid(format!("tool with description '{}' has no name", tool.description));
        }
        Ok(())
    }

    /// Assemble a control plane on the system clock.
    pub fn build(&self, ledger: Arc<dyn AuditLedger>) -> AvaraResult<ControlPlane> {
        self.build_with_clock(ledger, Arc::new(SystemClock))
    }

    /// Assemble a control plane and register this policy's tools and
    /// documents on it.
    pub fn build_with_clock(
        &self,
        ledger: Arc<dyn AuditLedger>,
        clock: Arc<dyn Clock>,
    ) -> AvaraResult<ControlPlane> {
        let mut builder = ControlPlane::builder(ledger)
            .clock(clock)
            .anomaly_policy(Box::new(ThresholdAnomalyPolicy::new(self.anomaly.clone())))
            .drift_scorer(Box::new(KeywordDriftScorer::new(self.drift.clone())))
            .token_estimator(Box::new(WhitespaceTokenEstimator))
            .instruction_scanner(Box::new(SignatureScanner::new(self.retrieval.clone())))
            .identity_config(self.identity.clone())
            .intent_config(self.intent.clone())
            .breaker_config(self.breaker.clone())
            .context_config(self.context.clone())
            .messaging_config(self.messaging.clone());
        if self.verify_arguments {
            builder = builder.argument_verifier(Box::new(SchemaArgumentVerifier::new()));
        }
        let plane = builder.build()?;

        for tool in &self.tools {
            plane.register_tool(tool.clone())?;
        }
        for document in &self.documents {
            plane.register_document(document.clone())?;
        }

        info!(
            tools = self.tools.len(),
            documents = self.documents.len(),
            verify_arguments = self.verify_arguments,
            "control plane built from policy"
        );
        Ok(plane)
    }
}
