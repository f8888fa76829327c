//! The circuit breaker and its pending-approval queue.
//!
//! High-risk actions are never executed on the request path. The breaker
//! halts them into a `PendingApproval` and the request is rejected at once;
//! an operator later resolves the approval out of band. Resolution only
//! moves the record to a terminal status. It never re-executes the action.
//!
//! Status transitions:
//!
//!   PENDING → APPROVED
//!   PENDING → DENIED
//!
//! Every transition is written to the ledger while the approval lock is
//! held, so two concurrent resolutions of one action are ordered and the
//! loser observes `AlreadyResolved`.

use std::{
    collections::{BTreeSet, HashMap},
    sync::{Arc, Mutex, MutexGuard},
};

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, warn};

use avara_contracts::{
    action::{ProposedAction, RiskLevel},
    approval::{ActionId, ApprovalDecision, ApprovalStatus, PendingApproval},
    audit::{AuditDecision, AuditEventType, AuditRecord},
    error::{AvaraError, AvaraResult},
    identity::AgentId,
    verdict::BreakerStatus,
};

use crate::{clock::Clock, lock_state, traits::{Approver, AuditLedger}, SYSTEM_AGENT};

/// Action types that always halt, whatever risk level they declare.
pub const DEFAULT_HIGH_RISK_ACTIONS: [&str; 5] = [
    "delete_file",
    "transmit_external",
    "rotate_credential",
    "escalate_privilege",
    "execute_payment",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BreakerConfig {
    pub high_risk_actions: BTreeSet<String>,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            high_risk_actions: DEFAULT_HIGH_RISK_ACTIONS
                .iter()
                .map(|a| a.to_string())
                .collect(),
        }
    }
}

/// Approvals in the order they were raised, plus an index by action id.
#[derive(Default)]
struct ApprovalBook {
    records: Vec<PendingApproval>,
    index: HashMap<ActionId, usize>,
}

pub struct CircuitBreaker {
    config: BreakerConfig,
    approvals: Mutex<ApprovalBook>,
    ledger: Arc<dyn AuditLedger>,
    clock: Arc<dyn Clock>,
}

impl CircuitBreaker {
    pub fn new(config: BreakerConfig, ledger: Arc<dyn AuditLedger>, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            approvals: Mutex::new(ApprovalBook::default()),
            ledger,
            clock,
        }
    }

    fn book(&self) -> AvaraResult<MutexGuard<'_, ApprovalBook>> {
        lock_state(&self.approvals, "approval queue")
    }

    pub fn config(&self) -> &BreakerConfig {
        &self.config
    }

    /// Halt iff the action type is in the high-risk set or the action is
    /// declared HIGH.
    pub fn evaluate(&self, action: &ProposedAction) -> BreakerStatus {
        if self.config.high_risk_actions.contains(action.action_type())
            || action.risk_level() == RiskLevel::High
        {
            BreakerStatus::HaltRequireApproval
        } else {
            BreakerStatus::Allow
        }
    }

    /// Queue `action` for human approval.
    ///
    /// The approval only enters the queue once its `APPROVAL_REQUEST` entry
    /// has been written.
    pub fn halt(&self, agent_id: &AgentId, action: &ProposedAction) -> AvaraResult<PendingApproval> {
        let approval = PendingApproval {
            action_id: ActionId::generate(),
            agent_id: agent_id.clone(),
            action_type: action.action_type().to_string(),
            target_resource: action.target_resource().to_string(),
            raised_at: self.clock.now(),
            status: ApprovalStatus::Pending,
        };

        let mut book = self.book()?;
        self.ledger.append(
            AuditRecord::new(AuditEventType::ApprovalRequest, agent_id.as_str())
                .with_decision(AuditDecision::Pending)
                .with_context(json!({
                    "action_id": approval.action_id,
                    "action_type": approval.action_type,
                    "target_resource": approval.target_resource,
                    "risk_level": action.risk_level(),
                })),
        )?;
        let position = book.records.len();
        book.index.insert(approval.action_id.clone(), position);
        book.records.push(approval.clone());

        warn!(
            agent_id = %agent_id,
            action_id = %approval.action_id,
            action = %approval.action_type,
            "high-risk action halted by circuit breaker"
        );
        Ok(approval)
    }

    /// Move a pending approval to APPROVED or DENIED.
    ///
    /// Unknown ids fail with `NotFound` and already-resolved ones with
    /// `AlreadyResolved`; both misuses leave an `APPROVAL_REJECTED` note in
    /// the ledger.
    pub fn resolve(&self, action_id: &str, decision: ApprovalDecision) -> AvaraResult<PendingApproval> {
        let mut book = self.book()?;

        let Some(&position) = book.index.get(&ActionId::from(action_id)) else {
            self.note_rejection(action_id, decision, "unknown action id")?;
            debug!(action_id, "resolution of unknown approval");
            return Err(AvaraError::NotFound {
                action_id: action_id.to_string(),
            });
        };

        let current = book.records[position].status;
        if current.is_terminal() {
            self.note_rejection(action_id, decision, &format!("already {}", current))?;
            debug!(action_id, status = %current, "resolution of settled approval");
            return Err(AvaraError::AlreadyResolved {
                action_id: action_id.to_string(),
                status: current,
            });
        }

        let status = decision.resulting_status();
        let agent_id = book.records[position].agent_id.clone();
        self.ledger.append(
            AuditRecord::new(AuditEventType::ApprovalResolved, agent_id.as_str())
                .with_decision(if decision.is_approved() {
                    AuditDecision::Approved
                } else {
                    AuditDecision::Denied
                })
                .with_context(json!({
                    "action_id": action_id,
                    "action_type": book.records[position].action_type,
                    "status": status,
                })),
        )?;
        book.records[position].status = status;

        info!(action_id, agent_id = %agent_id, status = %status, "approval resolved");
        Ok(book.records[position].clone())
    }

    fn note_rejection(&self, action_id: &str, decision: ApprovalDecision, reason: &str) -> AvaraResult<()> {
        self.ledger.append(
            AuditRecord::new(AuditEventType::ApprovalRejected, SYSTEM_AGENT)
                .with_decision(AuditDecision::Rejected)
                .with_context(json!({
                    "action_id": action_id,
                    "requested": decision,
                    "reason": reason,
                })),
        )?;
        Ok(())
    }

    /// Approvals still awaiting a decision, in the order they were raised.
    pub fn pending(&self) -> AvaraResult<Vec<PendingApproval>> {
        Ok(self
            .book()?
            .records
            .iter()
            .filter(|a| a.status == ApprovalStatus::Pending)
            .cloned()
            .collect())
    }

    pub fn get(&self, action_id: &str) -> AvaraResult<Option<PendingApproval>> {
        let book = self.book()?;
        Ok(book
            .index
            .get(&ActionId::from(action_id))
            .map(|&i| book.records[i].clone()))
    }

    /// Run `callback` behind the breaker, asking `approver` synchronously
    /// when the action halts.
    ///
    /// A halted action still goes through the queue, so the request and its
    /// resolution are both on record. Denial returns `PermissionDenied`.
    /// The callback only runs once an `ACTION_ALLOW` entry has been written.
    pub fn execute_with_breaker<T, F>(
        &self,
        agent_id: &AgentId,
        action: &ProposedAction,
        approver: &dyn Approver,
        callback: F,
    ) -> AvaraResult<T>
    where
        F: FnOnce() -> T,
    {
        if self.evaluate(action) == BreakerStatus::Allow {
            debug!(agent_id = %agent_id, action = action.action_type(), "breaker allows action");
            self.record_allow(agent_id, action, None)?;
            return Ok(callback());
        }

        let approval = self.halt(agent_id, action)?;
        let decision = approver.decide(action);
        self.resolve(approval.action_id.as_str(), decision)?;

        if decision.is_approved() {
            self.record_allow(agent_id, action, Some(&approval.action_id))?;
            Ok(callback())
        } else {
            Err(AvaraError::PermissionDenied {
                action: action.action_type().to_string(),
            })
        }
    }

    fn record_allow(
        &self,
        agent_id: &AgentId,
        action: &ProposedAction,
        approval: Option<&ActionId>,
    ) -> AvaraResult<()> {
        self.ledger.append(
            AuditRecord::new(AuditEventType::ActionAllow, agent_id.as_str())
                .with_decision(AuditDecision::Allow)
                .with_context(json!({
                    "action_type": action.action_type(),
                    "target_resource": action.target_resource(),
                    "risk_level": action.risk_level(),
                    "action_id": approval,
                })),
        )?;
        Ok(())
    }
}

/// Denies everything. The safe default when no human is attached.
#[derive(Debug, Default, Clone, Copy)]
pub struct DenyAllApprover;

impl Approver for DenyAllApprover {
    fn decide(&self, action: &ProposedAction) -> ApprovalDecision {
        debug!(action = action.action_type(), "no approver attached; denying");
        ApprovalDecision::Deny
    }
}

/// Closure-backed approver.
#[derive(Clone)]
pub struct CallbackApprover {
    callback: Arc<dyn Fn(&ProposedAction) -> bool + Send + Sync>,
}

impl CallbackApprover {
    /// The closure returns true to approve.
    pub fn new<F>(callback: F) -> Self
    where
        F: Fn(&ProposedAction) -> bool + Send + Sync + 'static,
    {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl Approver for CallbackApprover {
    fn decide(&self, action: &ProposedAction) -> ApprovalDecision {
        if (self.callback)(action) {
            ApprovalDecision::Approve
        } else {
            ApprovalDecision::Deny
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    };

    use serde_json::Map;

    use avara_contracts::{
        action::{ProposedAction, RiskLevel},
        approval::{ApprovalDecision, ApprovalStatus},
        audit::{AuditDecision, AuditEventType},
        error::AvaraError,
        identity::AgentId,
        verdict::BreakerStatus,
    };

    use super::{BreakerConfig, CallbackApprover, CircuitBreaker, DenyAllApprover};
    use crate::{
        clock::ManualClock,
        testing::{FailingLedger, RecordingLedger},
        traits::AuditLedger,
    };

    fn breaker() -> (CircuitBreaker, Arc<RecordingLedger>) {
        let ledger = Arc::new(RecordingLedger::default());
        let breaker = CircuitBreaker::new(
            BreakerConfig::default(),
            ledger.clone(),
            Arc::new(ManualClock::default()),
        );
        (breaker, ledger)
    }

    fn action(action_type: &str, risk: RiskLevel) -> ProposedAction {
        ProposedAction::new(action_type, "prod_db", Map::new(), risk)
    }

    fn agent() -> AgentId {
        AgentId::from("agt_ops")
    }

    #[test]
    fn high_risk_types_halt_whatever_their_declared_risk() {
        let (breaker, _) = breaker();
        for name in super::DEFAULT_HIGH_RISK_ACTIONS {
            assert_eq!(
                breaker.evaluate(&action(name, RiskLevel::Low)),
                BreakerStatus::HaltRequireApproval,
                "{} must halt",
                name
            );
        }
        assert_eq!(
            breaker.evaluate(&action("read_config", RiskLevel::High)),
            BreakerStatus::HaltRequireApproval
        );
        assert_eq!(
            breaker.evaluate(&action("read_config", RiskLevel::Medium)),
            BreakerStatus::Allow
        );
    }

    #[test]
    fn halt_queues_one_pending_approval() {
        let (breaker, ledger) = breaker();
        let approval = breaker.halt(&agent(), &action("delete_file", RiskLevel::High)).unwrap();

        assert_eq!(approval.status, ApprovalStatus::Pending);
        assert_eq!(breaker.pending().unwrap(), vec![approval.clone()]);

        let entries = ledger.replay().unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].event_type, AuditEventType::ApprovalRequest);
        assert_eq!(entries[0].decision, Some(AuditDecision::Pending));
        assert_eq!(entries[0].context["action_id"], approval.action_id.0.as_str());
    }

    #[test]
    fn double_resolution_keeps_first_status() {
        let (breaker, ledger) = breaker();
        let approval = breaker.halt(&agent(), &action("delete_file", RiskLevel::High)).unwrap();
        let id = approval.action_id.as_str();

        let resolved = breaker.resolve(id, ApprovalDecision::Deny).unwrap();
        assert_eq!(resolved.status, ApprovalStatus::Denied);

        match breaker.resolve(id, ApprovalDecision::Approve) {
            Err(AvaraError::AlreadyResolved { status, .. }) => {
                assert_eq!(status, ApprovalStatus::Denied)
            }
            other => panic!("expected AlreadyResolved, got {:?}", other),
        }
        assert_eq!(breaker.get(id).unwrap().unwrap().status, ApprovalStatus::Denied);
        assert!(breaker.pending().unwrap().is_empty());
        assert_eq!(
            ledger.events(),
            vec![
                AuditEventType::ApprovalRequest,
                AuditEventType::ApprovalResolved,
                AuditEventType::ApprovalRejected,
            ]
        );
    }

    #[test]
    fn unknown_action_is_not_found() {
        let (breaker, ledger) = breaker();
        assert!(matches!(
            breaker.resolve("act_missing", ApprovalDecision::Approve),
            Err(AvaraError::NotFound { .. })
        ));
        assert_eq!(ledger.events(), vec![AuditEventType::ApprovalRejected]);
    }

    #[test]
    fn concurrent_resolutions_have_exactly_one_winner() {
        let (breaker, _) = breaker();
        let approval = breaker.halt(&agent(), &action("rotate_credential", RiskLevel::High)).unwrap();
        let id = approval.action_id.as_str();
        let wins = AtomicUsize::new(0);
        let conflicts = AtomicUsize::new(0);

        std::thread::scope(|s| {
            for i in 0..8 {
                let decision = if i % 2 == 0 {
                    ApprovalDecision::Approve
                } else {
                    ApprovalDecision::Deny
                };
                let (breaker, wins, conflicts) = (&breaker, &wins, &conflicts);
                s.spawn(move || match breaker.resolve(id, decision) {
                    Ok(_) => {
                        wins.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(AvaraError::AlreadyResolved { .. }) => {
                        conflicts.fetch_add(1, Ordering::SeqCst);
                    }
                    Err(other) => panic!("unexpected error: {:?}", other),
                });
            }
        });

        assert_eq!(wins.load(Ordering::SeqCst), 1);
        assert_eq!(conflicts.load(Ordering::SeqCst), 7);
        assert!(breaker.get(id).unwrap().unwrap().status.is_terminal());
    }

    #[test]
    fn pending_preserves_raise_order() {
        let (breaker, _) = breaker();
        let first = breaker.halt(&agent(), &action("delete_file", RiskLevel::High)).unwrap();
        let second = breaker.halt(&agent(), &action("execute_payment", RiskLevel::High)).unwrap();
        let third = breaker.halt(&agent(), &action("transmit_external", RiskLevel::High)).unwrap();

        breaker.resolve(second.action_id.as_str(), ApprovalDecision::Approve).unwrap();

        let ids: Vec<_> = breaker
            .pending()
            .unwrap()
            .into_iter()
            .map(|a| a.action_id)
            .collect();
        assert_eq!(ids, vec![first.action_id, third.action_id]);
    }

    #[test]
    fn execute_with_breaker_denies_by_default() {
        let (breaker, ledger) = breaker();
        let ran = AtomicUsize::new(0);

        let result = breaker.execute_with_breaker(
            &agent(),
            &action("delete_file", RiskLevel::High),
            &DenyAllApprover,
            || ran.fetch_add(1, Ordering::SeqCst),
        );

        assert!(matches!(result, Err(AvaraError::PermissionDenied { action }) if action == "delete_file"));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        assert_eq!(
            ledger.events(),
            vec![AuditEventType::ApprovalRequest, AuditEventType::ApprovalResolved]
        );
    }

    #[test]
    fn execute_with_breaker_runs_approved_and_low_risk_actions() {
        let (breaker, ledger) = breaker();
        let approver = CallbackApprover::new(|a| a.target_resource() == "prod_db");

        let approved = breaker
            .execute_with_breaker(&agent(), &action("delete_file", RiskLevel::High), &approver, || 7)
            .unwrap();
        assert_eq!(approved, 7);

        let low = breaker
            .execute_with_breaker(&agent(), &action("read_config", RiskLevel::Low), &DenyAllApprover, || "ran")
            .unwrap();
        assert_eq!(low, "ran");

        let entries = ledger.replay().unwrap();
        assert_eq!(
            entries.iter().map(|e| e.event_type).collect::<Vec<_>>(),
            vec![
                AuditEventType::ApprovalRequest,
                AuditEventType::ApprovalResolved,
                AuditEventType::ActionAllow,
                AuditEventType::ActionAllow,
            ]
        );
        assert_eq!(entries[3].decision, Some(AuditDecision::Allow));
        assert_eq!(entries[3].context["action_type"], "read_config");
        assert!(entries[3].context["action_id"].is_null());
    }

    #[test]
    fn execute_with_breaker_does_not_run_unrecorded_actions() {
        let breaker = CircuitBreaker::new(
            BreakerConfig::default(),
            Arc::new(FailingLedger),
            Arc::new(ManualClock::default()),
        );
        let ran = AtomicUsize::new(0);

        let result = breaker.execute_with_breaker(
            &agent(),
            &action("read_config", RiskLevel::Low),
            &DenyAllApprover,
            || ran.fetch_add(1, Ordering::SeqCst),
        );
        assert!(matches!(result, Err(AvaraError::AuditWriteFailed { .. })));
        assert_eq!(ran.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn halt_is_not_queued_when_audit_fails() {
        let breaker = CircuitBreaker::new(
            BreakerConfig::default(),
            Arc::new(FailingLedger),
            Arc::new(ManualClock::default()),
        );
        let result = breaker.halt(&agent(), &action("delete_file", RiskLevel::High));
        assert!(matches!(result, Err(AvaraError::AuditWriteFailed { .. })));
        assert!(breaker.pending().unwrap().is_empty());
    }
}
