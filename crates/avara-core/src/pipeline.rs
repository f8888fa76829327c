//! The AVARA control plane: the trusted guard pipeline.
//!
//! Every guarded request runs the same order:
//!
//!   Identity → Anomaly → Log → Intent → Tool → Breaker → Audit
//!
//! A rejection at any stage is written to the ledger before the error is
//! returned, and no later stage runs. An action is only cleared once its
//! `ACTION_ALLOW` entry exists; if the ledger refuses that write the action
//! is not cleared.
//!
//! The control plane is one shareable service object. All mutable state sits
//! inside the guards behind their own locks, so `&self` methods can be
//! called from any number of threads.

use std::sync::Arc;

use chrono::Duration;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use avara_contracts::{
    action::{ActionClearance, ActionRequest, ProposedAction},
    approval::{ApprovalDecision, PendingApproval},
    audit::{AuditDecision, AuditEntry, AuditEventType, AuditRecord},
    context::{AgentMessage, DocumentProvenance, PromptContext, RetrievedContext},
    error::{AvaraError, AvaraResult},
    identity::{AgentIdentity, AgentRole, MAX_TTL_SECONDS},
    scope::ScopeSet,
    tool::ToolRegistration,
    verdict::{BlockingGuard, BreakerStatus, GuardVerdict},
};

use crate::{
    anomaly::{AnomalyAssessment, AnomalyDetector},
    breaker::{BreakerConfig, CircuitBreaker},
    clock::{Clock, SystemClock},
    context::{ContextConfig, ContextGovernor},
    identity::{IdentityConfig, IdentityRegistry, RevocationCause},
    intent::{IntentConfig, IntentGuard},
    messaging::{MessageMonitor, MessagingConfig},
    retrieval::{RetrievalFirewall, RetrievalOutcome},
    tools::{ToolGuard, ToolRegistry},
    traits::{
        AnomalyPolicy, Approver, ArgumentVerifier, AuditLedger, DriftScorer, InstructionScanner,
        TokenEstimator,
    },
    SYSTEM_AGENT,
};

/// Reason attached to every circuit-breaker halt.
pub const HALT_REASON: &str =
    "Blocked: High-risk action halted by Circuit Breaker. Human approval required.";

/// Prefix of the reason attached to every anomaly revocation.
pub const ANOMALY_REASON: &str = "Agent identity revoked due to anomalous behavior.";

/// The runtime authorization service.
///
/// Construct one per process with [`ControlPlane::builder`] and share it.
pub struct ControlPlane {
    ledger: Arc<dyn AuditLedger>,
    identity_config: IdentityConfig,
    identities: IdentityRegistry,
    anomalies: AnomalyDetector,
    intent: IntentGuard,
    tools: ToolGuard,
    breaker: CircuitBreaker,
    context: ContextGovernor,
    retrieval: RetrievalFirewall,
    messages: MessageMonitor,
}

impl ControlPlane {
    pub fn builder(ledger: Arc<dyn AuditLedger>) -> ControlPlaneBuilder {
        ControlPlaneBuilder::new(ledger)
    }

    // ── Identity lifecycle ───────────────────────────────────────────────────

    /// Issue a fresh ephemeral identity.
    ///
    /// `ttl_seconds` falls back to the configured default. A TTL outside
    /// `[0, MAX_TTL_SECONDS]` is rejected; zero yields an identity that is
    /// already expired.
    pub fn provision<I, S>(
        &self,
        role_name: &str,
        description: &str,
        scopes: I,
        ttl_seconds: Option<i64>,
    ) -> AvaraResult<AgentIdentity>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let ttl = ttl_seconds.unwrap_or(self.identity_config.default_ttl_seconds);
        let ttl = Some(ttl)
            .filter(|t| (0..=MAX_TTL_SECONDS).contains(t))
            .and_then(Duration::try_seconds)
            .ok_or_else(|| AvaraError::SchemaValidation {
                reason: format!("ttl_seconds must be within [0, {}], got {}", MAX_TTL_SECONDS, ttl),
            })?;
        if role_name.trim().is_empty() {
            return Err(AvaraError::SchemaValidation {
                reason: "role_name must not be empty".to_string(),
            });
        }

        let scopes: ScopeSet = scopes.into_iter().collect();
        self.identities.provision(
            AgentRole::new(role_name, description),
            scopes,
            ttl,
        )
    }

    /// Revoke an identity. Returns whether an active identity was removed.
    pub fn revoke(&self, agent_id: &str) -> AvaraResult<bool> {
        let mut history = self.anomalies.screen()?;
        let was_active = self.identities.revoke(agent_id, RevocationCause::Operator)?;
        history.forget(agent_id);
        Ok(was_active)
    }

    /// Snapshot of stored identities, oldest first. Never revokes.
    pub fn list_agents(&self) -> AvaraResult<Vec<AgentIdentity>> {
        self.identities.active()
    }

    /// Resolve `agent_id` to a live, well-behaved identity and, when
    /// `action` is given as `(action_type, target)`, add it to the agent's
    /// history.
    ///
    /// Unknown and expired identities are recorded as `UNAUTHORIZED`. An
    /// identity whose history is anomalous is revoked and rejected. The
    /// whole step runs under one hold of the history lock, so concurrent
    /// requests are judged against each other's records. Lock order is
    /// history, then registry, then ledger.
    fn verified_agent(
        &self,
        agent_id: &str,
        operation: &str,
        action: Option<(&str, &str)>,
    ) -> AvaraResult<AgentIdentity> {
        let mut history = self.anomalies.screen()?;

        let identity = match self.identities.validate(agent_id) {
            Ok(identity) => identity,
            Err(err @ AvaraError::Unauthorized { .. }) => {
                history.forget(agent_id);
                self.ledger.append(
                    AuditRecord::new(AuditEventType::Unauthorized, agent_id)
                        .with_decision(AuditDecision::Block)
                        .with_context(json!({
                            "operation": operation,
                            "reason": err.to_string(),
                        })),
                )?;
                return Err(err);
            }
            Err(other) => return Err(other),
        };

        if let AnomalyAssessment::Anomalous { reason } = history.assess(agent_id) {
            self.identities.revoke(
                agent_id,
                RevocationCause::Anomaly {
                    reason: reason.clone(),
                },
            )?;
            history.forget(agent_id);
            return Err(AvaraError::Forbidden {
                guard: BlockingGuard::Anomaly,
                reason: format!("{} {}", ANOMALY_REASON, reason),
            });
        }

        // Recorded after the assessment, so the check always judges the
        // actions that came before this one.
        if let Some((action_type, target)) = action {
            history.record(agent_id, action_type, target);
        }
        Ok(identity)
    }

    // ── Guard chain ──────────────────────────────────────────────────────────

    /// Run the full guard chain on one proposed action.
    ///
    /// # Errors
    ///
    /// - `Unauthorized`: unknown, expired, or revoked identity
    /// - `Forbidden`: anomaly revocation, severe intent drift, or a tool check
    /// - `ApprovalRequired`: the breaker halted the action; the carried
    ///   `action_id` names the pending approval
    /// - `AuditWriteFailed`: the decision could not be recorded
    pub fn validate_action(&self, request: &ActionRequest) -> AvaraResult<ActionClearance> {
        let agent_id = request.agent_id.as_str();
        debug!(
            agent_id,
            action = %request.proposed_action,
            target = %request.target_resource,
            risk = %request.risk_level,
            "validating action"
        );

        // ── Stage 1: identity and behavior ──────────────────────────────────
        let identity = self.verified_agent(
            agent_id,
            "validate_action",
            Some((request.proposed_action.as_str(), request.target_resource.as_str())),
        )?;

        let mut action = request.to_action();

        // ── Stage 2: intent ─────────────────────────────────────────────────
        match self.intent.validate_action(
            &request.task_intent,
            &request.proposed_action,
            &request.target_resource,
        ) {
            GuardVerdict::Block { reason } => {
                return Err(self.reject(
                    AuditEventType::IntentBlock,
                    BlockingGuard::IntentDrift,
                    request,
                    reason,
                ));
            }
            GuardVerdict::RequireApproval { reason } => {
                if self.intent.config().escalate_review_to_high_risk {
                    info!(agent_id, reason = %reason, "intent review escalated to high risk");
                    action = action.escalated();
                } else {
                    debug!(agent_id, reason = %reason, "intent review noted; breaker decides");
                }
            }
            GuardVerdict::Allow => {}
        }

        // ── Stage 3: tool permissions and arguments ─────────────────────────
        if self.tools.registry().get(&request.proposed_action)?.is_some() {
            let verdict = self.tools.validate_invocation(
                &request.proposed_action,
                &request.action_args,
                &identity.scopes.permissions(),
            )?;
            if let GuardVerdict::Block { reason } = verdict {
                return Err(self.reject(
                    AuditEventType::ToolBlock,
                    BlockingGuard::ToolPermission,
                    request,
                    reason,
                ));
            }
        }

        // ── Stage 4: circuit breaker ────────────────────────────────────────
        if self.breaker.evaluate(&action) == BreakerStatus::HaltRequireApproval {
            let approval = self.breaker.halt(&identity.agent_id, &action)?;
            return Err(AvaraError::ApprovalRequired {
                action_id: approval.action_id.0,
                reason: HALT_REASON.to_string(),
            });
        }

        // ── Stage 5: clearance ──────────────────────────────────────────────
        let entry = self.ledger.append(
            AuditRecord::new(AuditEventType::ActionAllow, agent_id)
                .with_decision(AuditDecision::Allow)
                .with_context(request.audit_context()),
        )?;

        info!(agent_id, action = %request.proposed_action, sequence = entry.sequence, "action cleared");
        Ok(ActionClearance {
            agent_id: agent_id.to_string(),
            action_type: request.proposed_action.clone(),
            target_resource: request.target_resource.clone(),
            effective_risk: action.risk_level(),
            audit_sequence: entry.sequence,
        })
    }

    /// Record a guard block and build the matching error.
    ///
    /// If the ledger refuses the entry, that failure is returned instead;
    /// the action is blocked either way.
    fn reject(
        &self,
        event_type: AuditEventType,
        guard: BlockingGuard,
        request: &ActionRequest,
        reason: String,
    ) -> AvaraError {
        let mut context = request.audit_context();
        if let Value::Object(map) = &mut context {
            map.insert("reason".to_string(), Value::String(reason.clone()));
        }
        let record = AuditRecord::new(event_type, request.agent_id.as_str())
            .with_decision(AuditDecision::Block)
            .with_context(context);

        match self.ledger.append(record) {
            Ok(_) => AvaraError::Forbidden { guard, reason },
            Err(err) => err,
        }
    }

    // ── Approvals ────────────────────────────────────────────────────────────

    pub fn resolve_approval(
        &self,
        action_id: &str,
        decision: ApprovalDecision,
    ) -> AvaraResult<PendingApproval> {
        self.breaker.resolve(action_id, decision)
    }

    /// Approvals still awaiting a decision, in the order they were raised.
    pub fn list_pending(&self) -> AvaraResult<Vec<PendingApproval>> {
        self.breaker.pending()
    }

    pub fn approval(&self, action_id: &str) -> AvaraResult<Option<PendingApproval>> {
        self.breaker.get(action_id)
    }

    /// Run `callback` for a verified agent behind the breaker, asking
    /// `approver` synchronously if it halts.
    pub fn execute_with_breaker<T, F>(
        &self,
        agent_id: &str,
        action: &ProposedAction,
        approver: &dyn Approver,
        callback: F,
    ) -> AvaraResult<T>
    where
        F: FnOnce() -> T,
    {
        let identity = self.verified_agent(agent_id, "execute_with_breaker", None)?;
        self.breaker
            .execute_with_breaker(&identity.agent_id, action, approver, callback)
    }

    // ── Tools ────────────────────────────────────────────────────────────────

    /// Add a tool to the registry. Privileged; recorded as `SYSTEM`.
    pub fn register_tool(&self, tool: ToolRegistration) -> AvaraResult<()> {
        self.ledger.append(
            AuditRecord::new(AuditEventType::ToolRegister, SYSTEM_AGENT)
                .with_decision(AuditDecision::Allow)
                .with_context(json!({
                    "tool": tool.name,
                    "required_permissions": tool.required_permissions,
                    "is_active": tool.is_active,
                })),
        )?;
        if self.tools.registry().register(tool)?.is_some() {
            debug!("tool registration replaced an earlier one");
        }
        Ok(())
    }

    pub fn tool_names(&self) -> AvaraResult<Vec<String>> {
        self.tools.registry().names()
    }

    /// Record a completed tool execution.
    pub fn record_tool_call(
        &self,
        agent_id: &str,
        tool: &str,
        arguments: &Map<String, Value>,
        result_summary: &str,
    ) -> AvaraResult<AuditEntry> {
        self.ledger.append(
            AuditRecord::new(AuditEventType::ToolCall, agent_id).with_context(json!({
                "tool": tool,
                "args": arguments,
                "result": result_summary,
            })),
        )
    }

    // ── Context, retrieval, messaging ───────────────────────────────────────

    /// Build a budget-checked prompt context for a verified agent.
    pub fn prepare_context(
        &self,
        agent_id: &str,
        query: &str,
        system_prompt: &str,
    ) -> AvaraResult<PromptContext> {
        self.verified_agent(agent_id, "prepare_context", None)?;

        match self.context.prepare_context(query, system_prompt) {
            Err(AvaraError::Saturation { used, budget }) => {
                self.ledger.append(
                    AuditRecord::new(AuditEventType::ContextSaturationBlock, agent_id)
                        .with_decision(AuditDecision::Block)
                        .with_context(json!({ "tokens_used": used, "budget": budget })),
                )?;
                Err(AvaraError::Saturation { used, budget })
            }
            other => other,
        }
    }

    pub fn register_document(&self, provenance: DocumentProvenance) -> AvaraResult<()> {
        self.retrieval.register_document(provenance)
    }

    /// Screen retrieved content for a verified agent, using its role name
    /// against the document ACL.
    pub fn screen_retrieval(
        &self,
        agent_id: &str,
        query: &str,
        doc_id: &str,
        content: &str,
    ) -> AvaraResult<RetrievedContext> {
        let identity = self.verified_agent(agent_id, "screen_retrieval", None)?;

        match self
            .retrieval
            .validate_retrieval(query, doc_id, content, &identity.role.name)?
        {
            RetrievalOutcome::Admitted(retrieved) => Ok(retrieved),
            RetrievalOutcome::Blocked { reason } => {
                self.ledger.append(
                    AuditRecord::new(AuditEventType::RetrievalBlock, agent_id)
                        .with_decision(AuditDecision::Block)
                        .with_context(json!({
                            "doc_id": doc_id,
                            "query": query,
                            "role": identity.role.name,
                            "reason": reason,
                        })),
                )?;
                Err(AvaraError::Forbidden {
                    guard: BlockingGuard::Retrieval,
                    reason,
                })
            }
        }
    }

    /// Pass a message between agents. The sender must be verified.
    pub fn relay_message(&self, message: &AgentMessage) -> AvaraResult<AuditEntry> {
        self.verified_agent(&message.sender_id, "relay_message", None)?;

        let context = json!({
            "receiver_id": message.receiver_id,
            "confidence": message.confidence,
            "assumptions": message.assumptions,
        });
        match self.messages.validate_message(message)? {
            GuardVerdict::Allow => self.ledger.append(
                AuditRecord::new(AuditEventType::MessageRelay, message.sender_id.as_str())
                    .with_decision(AuditDecision::Allow)
                    .with_context(context),
            ),
            GuardVerdict::Block { reason } | GuardVerdict::RequireApproval { reason } => {
                let mut context = context;
                if let Value::Object(map) = &mut context {
                    map.insert("reason".to_string(), Value::String(reason.clone()));
                }
                self.ledger.append(
                    AuditRecord::new(AuditEventType::MessageBlock, message.sender_id.as_str())
                        .with_decision(AuditDecision::Block)
                        .with_context(context),
                )?;
                warn!(sender = %message.sender_id, "message blocked");
                Err(AvaraError::Forbidden {
                    guard: BlockingGuard::Messaging,
                    reason,
                })
            }
        }
    }

    // ── Audit ────────────────────────────────────────────────────────────────

    /// Ledger entries in append order; only the last `tail` when given.
    pub fn read_audit_trail(&self, tail: Option<usize>) -> AvaraResult<Vec<AuditEntry>> {
        match tail {
            Some(count) => self.ledger.tail(count),
            None => self.ledger.replay(),
        }
    }

    /// Mark the start of a control-plane session in the ledger.
    pub fn record_system_start(&self, status: &str) -> AvaraResult<AuditEntry> {
        self.ledger.append(
            AuditRecord::new(AuditEventType::SystemStart, SYSTEM_AGENT)
                .with_context(json!({ "status": status })),
        )
    }

    pub fn ledger(&self) -> Arc<dyn AuditLedger> {
        Arc::clone(&self.ledger)
    }
}

/// Assembles a [`ControlPlane`].
///
/// The ledger is mandatory at construction. The anomaly policy, drift
/// scorer, token estimator, and instruction scanner must be supplied before
/// `build`; the argument verifier is optional and every config section
/// defaults.
pub struct ControlPlaneBuilder {
    ledger: Arc<dyn AuditLedger>,
    clock: Arc<dyn Clock>,
    anomaly_policy: Option<Box<dyn AnomalyPolicy>>,
    drift_scorer: Option<Box<dyn DriftScorer>>,
    argument_verifier: Option<Box<dyn ArgumentVerifier>>,
    token_estimator: Option<Box<dyn TokenEstimator>>,
    instruction_scanner: Option<Box<dyn InstructionScanner>>,
    identity: IdentityConfig,
    intent: IntentConfig,
    breaker: BreakerConfig,
    context: ContextConfig,
    messaging: MessagingConfig,
}

impl ControlPlaneBuilder {
    pub fn new(ledger: Arc<dyn AuditLedger>) -> Self {
        Self {
            ledger,
            clock: Arc::new(SystemClock),
            anomaly_policy: None,
            drift_scorer: None,
            argument_verifier: None,
            token_estimator: None,
            instruction_scanner: None,
            identity: IdentityConfig::default(),
            intent: IntentConfig::default(),
            breaker: BreakerConfig::default(),
            context: ContextConfig::default(),
            messaging: MessagingConfig::default(),
        }
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn anomaly_policy(mut self, policy: Box<dyn AnomalyPolicy>) -> Self {
        self.anomaly_policy = Some(policy);
        self
    }

    pub fn drift_scorer(mut self, scorer: Box<dyn DriftScorer>) -> Self {
        self.drift_scorer = Some(scorer);
        self
    }

    pub fn argument_verifier(mut self, verifier: Box<dyn ArgumentVerifier>) -> Self {
        self.argument_verifier = Some(verifier);
        self
    }

    pub fn token_estimator(mut self, estimator: Box<dyn TokenEstimator>) -> Self {
        self.token_estimator = Some(estimator);
        self
    }

    pub fn instruction_scanner(mut self, scanner: Box<dyn InstructionScanner>) -> Self {
        self.instruction_scanner = Some(scanner);
        self
    }

    pub fn identity_config(mut self, config: IdentityConfig) -> Self {
        self.identity = config;
        self
    }

    pub fn intent_config(mut self, config: IntentConfig) -> Self {
        self.intent = config;
        self
    }

    pub fn breaker_config(mut self, config: BreakerConfig) -> Self {
        self.breaker = config;
        self
    }

    pub fn context_config(mut self, config: ContextConfig) -> Self {
        self.context = config;
        self
    }

    pub fn messaging_config(mut self, config: MessagingConfig) -> Self {
        self.messaging = config;
        self
    }

    pub fn build(self) -> AvaraResult<ControlPlane> {
        fn required<T>(value: Option<T>, what: &str) -> AvaraResult<T> {
            value.ok_or_else(|| AvaraError::ConfigError {
                reason: format!("no {} configured", what),
            })
        }

        let anomaly_policy = required(self.anomaly_policy, "anomaly policy")?;
        let drift_scorer = required(self.drift_scorer, "drift scorer")?;
        let token_estimator = required(self.token_estimator, "token estimator")?;
        let instruction_scanner = required(self.instruction_scanner, "instruction scanner")?;

        let thresholds = [self.intent.review_above, self.intent.block_above];
        if thresholds.iter().any(|t| !(0.0..=1.0).contains(t))
            || self.intent.review_above > self.intent.block_above
        {
            return Err(AvaraError::ConfigError {
                reason: format!(
                    "intent thresholds must satisfy 0 <= review_above ({}) <= block_above ({}) <= 1",
                    self.intent.review_above, self.intent.block_above
                ),
            });
        }
        if !(0..=MAX_TTL_SECONDS).contains(&self.identity.default_ttl_seconds) {
            return Err(AvaraError::ConfigError {
                reason: format!(
                    "default_ttl_seconds must be within [0, {}], got {}",
                    MAX_TTL_SECONDS, self.identity.default_ttl_seconds
                ),
            });
        }

        let tools = match self.argument_verifier {
            Some(verifier) => ToolGuard::new(ToolRegistry::new()).with_verifier(verifier),
            None => ToolGuard::new(ToolRegistry::new()),
        };

        info!(
            high_risk_actions = self.breaker.high_risk_actions.len(),
            max_tokens = self.context.max_tokens,
            "control plane assembled"
        );

        Ok(ControlPlane {
            identities: IdentityRegistry::new(Arc::clone(&self.ledger), Arc::clone(&self.clock)),
            anomalies: AnomalyDetector::new(anomaly_policy, Arc::clone(&self.clock)),
            intent: IntentGuard::new(drift_scorer, self.intent),
            tools,
            breaker: CircuitBreaker::new(self.breaker, Arc::clone(&self.ledger), self.clock),
            context: ContextGovernor::new(self.context, token_estimator),
            retrieval: RetrievalFirewall::new(instruction_scanner),
            messages: MessageMonitor::new(self.messaging),
            identity_config: self.identity,
            ledger: self.ledger,
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────────────────
