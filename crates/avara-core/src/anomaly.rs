//! Behavioral anomaly detection.
//!
//! The detector keeps an ordered per-agent history of every action that
//! passed identity validation. Judging that history is delegated to an
//! `AnomalyPolicy`; the detector only owns the bookkeeping.
//!
//! Callers that must validate, judge, and record as one step take the
//! history lock once with [`AnomalyDetector::screen`] and work through the
//! returned [`HistoryBook`]. While a book is held no other request can read
//! or extend any agent's history, so concurrent requests from one agent are
//! judged one after another.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex, MutexGuard},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use avara_contracts::error::AvaraResult;

use crate::{clock::Clock, lock_state, traits::AnomalyPolicy};

/// One logged action in an agent's history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExecutionRecord {
    pub action_type: String,
    pub target: String,
    pub timestamp: DateTime<Utc>,
}

/// The policy's judgement of an agent's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AnomalyAssessment {
    Nominal,
    Anomalous { reason: String },
}

impl AnomalyAssessment {
    pub fn is_anomalous(&self) -> bool {
        matches!(self, Self::Anomalous { .. })
    }
}

type Histories = HashMap<String, Vec<ExecutionRecord>>;

/// Per-agent action history plus the policy that judges it.
pub struct AnomalyDetector {
    history: Mutex<Histories>,
    policy: Box<dyn AnomalyPolicy>,
    clock: Arc<dyn Clock>,
}

impl AnomalyDetector {
    pub fn new(policy: Box<dyn AnomalyPolicy>, clock: Arc<dyn Clock>) -> Self {
        Self {
            history: Mutex::new(HashMap::new()),
            policy,
            clock,
        }
    }

    /// Take the history lock for one validate/assess/record step.
    pub fn screen(&self) -> AvaraResult<HistoryBook<'_>> {
        Ok(HistoryBook {
            histories: lock_state(&self.history, "anomaly history")?,
            detector: self,
        })
    }

    /// Append one action to the agent's history, stamped with the current time.
    pub fn log_execution(&self, agent_id: &str, action_type: &str, target: &str) -> AvaraResult<()> {
        self.screen()?.record(agent_id, action_type, target);
        Ok(())
    }

    /// Evaluate the agent's history as it stands now.
    ///
    /// An agent with no history is nominal.
    pub fn detect_anomalies(&self, agent_id: &str) -> AvaraResult<AnomalyAssessment> {
        Ok(self.screen()?.assess(agent_id))
    }

    /// A copy of the agent's history, oldest first.
    pub fn history(&self, agent_id: &str) -> AvaraResult<Vec<ExecutionRecord>> {
        Ok(self.screen()?.histories.get(agent_id).cloned().unwrap_or_default())
    }

    /// Number of agents with any history on file.
    pub fn tracked_agents(&self) -> AvaraResult<usize> {
        Ok(self.screen()?.histories.len())
    }
}

/// Exclusive access to every agent's history, held for one screening step.
pub struct HistoryBook<'a> {
    histories: MutexGuard<'a, Histories>,
    detector: &'a AnomalyDetector,
}

impl HistoryBook<'_> {
    /// Judge the agent's history as it stands now.
    pub fn assess(&self, agent_id: &str) -> AnomalyAssessment {
        let records = self.histories.get(agent_id).map(Vec::as_slice).unwrap_or(&[]);
        let assessment = self.detector.policy.assess(records, self.detector.clock.now());

        match &assessment {
            AnomalyAssessment::Anomalous { reason } => {
                warn!(agent_id, reason = %reason, history_len = records.len(), "anomalous behavior detected");
            }
            AnomalyAssessment::Nominal => {
                debug!(agent_id, history_len = records.len(), "agent behavior is nominal");
            }
        }
        assessment
    }

    pub fn record(&mut self, agent_id: &str, action_type: &str, target: &str) {
        let record = ExecutionRecord {
            action_type: action_type.to_string(),
            target: target.to_string(),
            timestamp: self.detector.clock.now(),
        };
        self.histories
            .entry(agent_id.to_string())
            .or_default()
            .push(record);
    }

    /// Drop the agent's history. Used once its identity can no longer validate.
    pub fn forget(&mut self, agent_id: &str) {
        if let Some(records) = self.histories.remove(agent_id) {
            debug!(agent_id, dropped = records.len(), "anomaly history dropped");
        }
    }
}
