//! Intent validation: compares the declared task against the proposed action.
//!
//! Stateless per action. The drift score comes from a pluggable
//! `DriftScorer`; this module only applies the thresholds.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use avara_contracts::verdict::GuardVerdict;

use crate::traits::DriftScorer;

/// Drift thresholds and the review-escalation switch.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IntentConfig {
    /// Scores strictly above this block the action.
    pub block_above: f64,
    /// Scores strictly above this (and not above `block_above`) ask for review.
    pub review_above: f64,
    /// When true, a review verdict raises the action's risk to HIGH so the
    /// circuit breaker halts it. Off by default: a review verdict is recorded
    /// in the trace log and otherwise has no effect.
    pub escalate_review_to_high_risk: bool,
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            block_above: 0.8,
            review_above: 0.5,
            escalate_review_to_high_risk: false,
        }
    }
}

pub struct IntentGuard {
    scorer: Box<dyn DriftScorer>,
    config: IntentConfig,
}

impl IntentGuard {
    pub fn new(scorer: Box<dyn DriftScorer>, config: IntentConfig) -> Self {
        Self { scorer, config }
    }

    pub fn config(&self) -> &IntentConfig {
        &self.config
    }

    /// Score `action` against `intent` and map the score onto a verdict.
    pub fn validate_action(&self, intent: &str, action: &str, target: &str) -> GuardVerdict {
        let raw = self.scorer.score(intent, action);
        if !raw.is_finite() {
            warn!(intent, action, target, "drift scorer returned a non-finite score");
            return GuardVerdict::Block {
                reason: format!(
                    "drift score for task '{}' and action '{}' on '{}' is not a number",
                    intent, action, target
                ),
            };
        }
        let score = raw.clamp(0.0, 1.0);

        if score > self.config.block_above {
            warn!(score, intent, action, target, "severe semantic drift detected");
            return GuardVerdict::Block {
                reason: format!(
                    "severe semantic drift (score {:.2}) from task '{}' to action '{}' on '{}'",
                    score, intent, action, target
                ),
            };
        }

        if score > self.config.review_above {
            warn!(score, intent, action, "questionable alignment with task");
            return GuardVerdict::RequireApproval {
                reason: format!("questionable alignment (score {:.2}) with task '{}'", score, intent),
            };
        }

        debug!(score, action, "action aligned with task");
        GuardVerdict::Allow
    }
}

#[cfg(test)]
mod tests {
    use avara_contracts::verdict::GuardVerdict;

    use super::{IntentConfig, IntentGuard};
    use crate::traits::DriftScorer;

    struct FixedScore(f64);

    impl DriftScorer for FixedScore {
        fn score(&self, _intent: &str, _action: &str) -> f64 {
            self.0
        }
    }

    fn verdict_for(score: f64) -> GuardVerdict {
        IntentGuard::new(Box::new(FixedScore(score)), IntentConfig::default())
            .validate_action("Analyze syslogs", "parse_log", "syslog.txt")
    }

    #[test]
    fn thresholds_are_strict() {
        assert_eq!(verdict_for(0.1), GuardVerdict::Allow);
        assert_eq!(verdict_for(0.5), GuardVerdict::Allow);
        assert!(matches!(verdict_for(0.51), GuardVerdict::RequireApproval { .. }));
        assert!(matches!(verdict_for(0.8), GuardVerdict::RequireApproval { .. }));
        assert!(matches!(verdict_for(0.81), GuardVerdict::Block { .. }));
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert!(matches!(verdict_for(7.0), GuardVerdict::Block { .. }));
        assert_eq!(verdict_for(-1.0), GuardVerdict::Allow);
    }

    #[test]
    fn non_finite_scores_block() {
        for score in [f64::NAN, f64::INFINITY, f64::NEG_INFINITY] {
            assert!(
                matches!(verdict_for(score), GuardVerdict::Block { .. }),
                "expected Block for {}",
                score
            );
        }
    }

    #[test]
    fn block_reason_names_task_and_action() {
        match verdict_for(0.9) {
            GuardVerdict::Block { reason } => {
                assert!(reason.contains("Analyze syslogs"));
                assert!(reason.contains("parse_log"));
            }
            other => panic!("expected Block, got {:?}", other),
        }
    }
}
