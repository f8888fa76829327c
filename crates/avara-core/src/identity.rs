//! The ephemeral identity registry.
//!
//! Identities are provisioned with a scope set and a TTL, validated on every
//! guarded request, and removed on explicit revocation, on anomaly, or by the
//! validation that first observes their expiry. Every one of those transitions
//! is appended to the ledger while the registry lock is held, so the ledger
//! order matches the order in which the registry changed.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::Duration;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use avara_contracts::{
    audit::{AuditDecision, AuditEventType, AuditRecord},
    error::{AvaraError, AvaraResult},
    identity::{AgentId, AgentIdentity, AgentRole},
    scope::ScopeSet,
};

use crate::{clock::Clock, lock_state, traits::AuditLedger};

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IdentityConfig {
    /// TTL applied when a provisioning request does not name one.
    pub default_ttl_seconds: i64,
}

impl Default for IdentityConfig {
    fn default() -> Self {
        Self {
            default_ttl_seconds: 3600,
        }
    }
}

/// Why an identity is being revoked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RevocationCause {
    /// An operator or the agent's owner asked for it.
    Operator,
    /// The anomaly detector flagged the agent's behavior.
    Anomaly { reason: String },
}

/// Issues, validates, and revokes agent identities.
pub struct IdentityRegistry {
    agents: Mutex<HashMap<AgentId, AgentIdentity>>,
    ledger: Arc<dyn AuditLedger>,
    clock: Arc<dyn Clock>,
}

impl IdentityRegistry {
    pub fn new(ledger: Arc<dyn AuditLedger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            agents: Mutex::new(HashMap::new()),
            ledger,
            clock,
        }
    }

    fn agents(&self) -> AvaraResult<MutexGuard<'_, HashMap<AgentId, AgentIdentity>>> {
        lock_state(&self.agents, "identity registry")
    }

    /// Create and store a fresh identity.
    ///
    /// The identity only becomes visible after its `IAM_PROVISION` entry has
    /// been written.
    pub fn provision(
        &self,
        role: AgentRole,
        scopes: ScopeSet,
        ttl: Duration,
    ) -> AvaraResult<AgentIdentity> {
        let identity = AgentIdentity {
            agent_id: AgentId::generate(),
            role,
            scopes,
            created_at: self.clock.now(),
            ttl_seconds: ttl.num_seconds(),
        };

        let mut agents = self.agents()?;
        self.ledger.append(
            AuditRecord::new(AuditEventType::IamProvision, identity.agent_id.as_str())
                .with_decision(AuditDecision::Allow)
                .with_context(json!({
                    "role_name": identity.role.name,
                    "description": identity.role.description,
                    "scopes": identity.scopes,
                    "ttl_seconds": identity.ttl_seconds,
                })),
        )?;
        agents.insert(identity.agent_id.clone(), identity.clone());

        info!(
            agent_id = %identity.agent_id,
            role = %identity.role.name,
            ttl_seconds = identity.ttl_seconds,
            "identity provisioned"
        );
        Ok(identity)
    }

    /// Resolve `agent_id` to a live identity.
    ///
    /// Fails with `Unauthorized` for unknown ids. An expired identity is
    /// revoked inside the same critical section that discovers the expiry, so
    /// no concurrent call can observe it as valid afterwards.
    pub fn validate(&self, agent_id: &str) -> AvaraResult<AgentIdentity> {
        let key = AgentId::from(agent_id);
        let mut agents = self.agents()?;

        let Some(identity) = agents.get(&key) else {
            debug!(agent_id, "validation of unknown identity");
            return Err(AvaraError::Unauthorized {
                agent_id: agent_id.to_string(),
                reason: "agent is not registered or anonymous".to_string(),
            });
        };

        let now = self.clock.now();
        if identity.is_expired_at(now) {
            self.ledger.append(
                AuditRecord::new(AuditEventType::IamExpired, agent_id)
                    .with_decision(AuditDecision::Revoked)
                    .with_context(json!({
                        "created_at": identity.created_at,
                        "ttl_seconds": identity.ttl_seconds,
                        "observed_at": now,
                    })),
            )?;
            agents.remove(&key);

            warn!(agent_id, "identity token expired; revoked");
            return Err(AvaraError::Unauthorized {
                agent_id: agent_id.to_string(),
                reason: "token expired; execution blocked".to_string(),
            });
        }

        Ok(identity.clone())
    }

    /// Remove an identity. Revoking an unknown id is a no-op apart from its
    /// audit entry.
    ///
    /// Returns whether an active identity was removed.
    pub fn revoke(&self, agent_id: &str, cause: RevocationCause) -> AvaraResult<bool> {
        let key = AgentId::from(agent_id);
        let mut agents = self.agents()?;
        let was_active = agents.contains_key(&key);

        let record = match &cause {
            RevocationCause::Operator => AuditRecord::new(AuditEventType::IamRevoke, agent_id)
                .with_decision(AuditDecision::Revoked)
                .with_context(json!({ "was_active": was_active })),
            RevocationCause::Anomaly { reason } => {
                AuditRecord::new(AuditEventType::AnomalyRevoke, agent_id)
                    .with_decision(AuditDecision::Revoked)
                    .with_context(json!({ "was_active": was_active, "reason": reason }))
            }
        };
        self.ledger.append(record)?;
        agents.remove(&key);

        if was_active {
            info!(agent_id, cause = ?cause, "identity revoked");
        } else {
            debug!(agent_id, "revocation of inactive identity ignored");
        }
        Ok(was_active)
    }

    /// Exact-match scope check against a validated identity.
    pub fn has_scope(identity: &AgentIdentity, scope: &str) -> bool {
        identity.has_scope(scope)
    }

    /// Snapshot of every stored identity, oldest first.
    ///
    /// Expired identities that have not yet been validated are included;
    /// listing never revokes.
    pub fn active(&self) -> AvaraResult<Vec<AgentIdentity>> {
        let agents = self.agents()?;
        let mut all: Vec<AgentIdentity> = agents.values().cloned().collect();
        all.sort_by(|a, b| {
            a.created_at
                .cmp(&b.created_at)
                .then_with(|| a.agent_id.cmp(&b.agent_id))
        });
        Ok(all)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use avara_contracts::{
        audit::{AuditDecision, AuditEventType},
        error::AvaraError,
        identity::AgentRole,
        scope::ScopeSet,
    };

    use super::{IdentityRegistry, RevocationCause};
    use crate::{
        clock::ManualClock,
        testing::{FailingLedger, RecordingLedger},
        traits::AuditLedger,
    };

    fn registry() -> (IdentityRegistry, Arc<RecordingLedger>, Arc<ManualClock>) {
        let ledger = Arc::new(RecordingLedger::default());
        let clock = Arc::new(ManualClock::default());
        (
            IdentityRegistry::new(ledger.clone(), clock.clone()),
            ledger,
            clock,
        )
    }

    fn analyst() -> AgentRole {
        AgentRole::new("data_analyst", "Can read public data")
    }

    #[test]
    fn provision_then_validate() {
        let (registry, ledger, _clock) = registry();
        let identity = registry
            .provision(analyst(), ["read:public"].into_iter().collect(), Duration::seconds(300))
            .unwrap();

        let validated = registry.validate(identity.agent_id.as_str()).unwrap();
        assert_eq!(validated, identity);
        assert!(IdentityRegistry::has_scope(&validated, "read:public"));
        assert!(!IdentityRegistry::has_scope(&validated, "write:public"));

        let entries = ledger.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, AuditEventType::IamProvision);
        assert_eq!(entries[0].agent_id, identity.agent_id.0);
    }

    #[test]
    fn unknown_agent_is_unauthorized() {
        let (registry, _ledger, _clock) = registry();
        match registry.validate("anon_bot") {
            Err(AvaraError::Unauthorized { agent_id, .. }) => assert_eq!(agent_id, "anon_bot"),
            other => panic!("expected Unauthorized, got {:?}", other),
        }
    }

    #[test]
    fn expiry_revokes_atomically_and_stays_revoked() {
        let (registry, ledger, clock) = registry();
        let identity = registry
            .provision(analyst(), ["read:public"].into_iter().collect(), Duration::seconds(300))
            .unwrap();
        let id = identity.agent_id.as_str();

        clock.advance(Duration::seconds(299));
        assert!(registry.validate(id).is_ok());

        clock.advance(Duration::seconds(1));
        match registry.validate(id) {
            Err(AvaraError::Unauthorized { reason, .. }) => assert!(reason.contains("expired")),
            other => panic!("expected Unauthorized, got {:?}", other),
        }

        // No flapping: the second check fails too, now as unknown.
        assert!(matches!(registry.validate(id), Err(AvaraError::Unauthorized { .. })));
        assert!(registry.active().unwrap().is_empty());

        let expired: Vec<_> = ledger
            .replay()
            .unwrap()
            .into_iter()
            .filter(|e| e.event_type == AuditEventType::IamExpired)
            .collect();
        assert_eq!(expired.len(), 1, "expiry must be audited exactly once");
        assert_eq!(expired[0].decision, Some(AuditDecision::Revoked));
    }

    #[test]
    fn revoke_blocks_validation_before_ttl() {
        let (registry, _ledger, _clock) = registry();
        let identity = registry
            .provision(analyst(), ScopeSet::default(), Duration::seconds(3600))
            .unwrap();
        let id = identity.agent_id.as_str();

        assert!(registry.revoke(id, RevocationCause::Operator).unwrap());
        assert!(matches!(registry.validate(id), Err(AvaraError::Unauthorized { .. })));
    }

    #[test]
    fn revoke_unknown_is_idempotent_noop() {
        let (registry, ledger, _clock) = registry();
        assert!(!registry.revoke("agt_missing", RevocationCause::Operator).unwrap());
        assert!(!registry.revoke("agt_missing", RevocationCause::Operator).unwrap());

        let entries = ledger.replay().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].context["was_active"], serde_json::json!(false));
    }

    #[test]
    fn provision_is_not_visible_when_audit_fails() {
        let registry = IdentityRegistry::new(
            Arc::new(FailingLedger),
            Arc::new(ManualClock::default()),
        );
        let result = registry.provision(analyst(), ScopeSet::default(), Duration::seconds(60));

        assert!(matches!(result, Err(AvaraError::AuditWriteFailed { .. })));
        assert!(registry.active().unwrap().is_empty());
    }
}
