//! Reference implementations of the pluggable heuristics.
//!
//! These are deliberately simple keyword and threshold rules. Each one sits
//! behind a core trait, so a deployment can swap in an embedding model or a
//! tokenizer without touching the control plane.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use avara_core::{
    anomaly::{AnomalyAssessment, ExecutionRecord},
    traits::{AnomalyPolicy, DriftScorer, InstructionScanner, TokenEstimator},
};

// ── Anomaly ──────────────────────────────────────────────────────────────────

/// Thresholds for [`ThresholdAnomalyPolicy`].
///
/// ```toml
/// [anomaly]
/// window_seconds = 60
/// max_actions_per_window = 20
/// flagged_action = "read_proc"
/// max_flagged_repeats = 3
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    /// Length of the sliding rate window.
    pub window_seconds: i64,
    /// More actions than this inside one window is anomalous.
    pub max_actions_per_window: usize,
    /// Action type treated as a scan when repeated.
    pub flagged_action: String,
    /// More lifetime uses of `flagged_action` than this is anomalous.
    pub max_flagged_repeats: usize,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            window_seconds: 60,
            max_actions_per_window: 20,
            flagged_action: "read_proc".to_string(),
            max_flagged_repeats: 3,
        }
    }
}

/// Rate limit over a sliding window plus a repeat limit on one flagged
/// action type. Both comparisons are strict.
#[derive(Debug, Clone)]
pub struct ThresholdAnomalyPolicy {
    config: AnomalyConfig,
}

impl ThresholdAnomalyPolicy {
    pub fn new(config: AnomalyConfig) -> Self {
        Self { config }
    }
}

impl AnomalyPolicy for ThresholdAnomalyPolicy {
    fn assess(&self, history: &[ExecutionRecord], now: DateTime<Utc>) -> AnomalyAssessment {
        let window = Duration::try_seconds(self.config.window_seconds).unwrap_or(Duration::MAX);
        let recent = history
            .iter()
            .filter(|r| now.signed_duration_since(r.timestamp) < window)
            .count();
        if recent > self.config.max_actions_per_window {
            return AnomalyAssessment::Anomalous {
                reason: format!(
                    "exceeded nominal execution rate: {} actions in {}s (limit {})",
                    recent, self.config.window_seconds, self.config.max_actions_per_window
                ),
            };
        }

        let flagged = history
            .iter()
            .filter(|r| r.action_type == self.config.flagged_action)
            .count();
        if flagged > self.config.max_flagged_repeats {
            return AnomalyAssessment::Anomalous {
                reason: format!(
                    "repetitive suspicious pattern: '{}' repeated {} times (limit {})",
                    self.config.flagged_action, flagged, self.config.max_flagged_repeats
                ),
            };
        }

        AnomalyAssessment::Nominal
    }
}

// ── Drift ────────────────────────────────────────────────────────────────────

/// One keyword pairing that signals drift.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DriftRule {
    /// Matched case-insensitively against the task intent.
    pub task_contains: String,
    /// Matched case-insensitively against the action type.
    pub action_contains: String,
    pub score: f64,
}

/// ```toml
/// [drift]
/// baseline = 0.1
///
/// [[drift.rules]]
/// task_contains = "analyze"
/// action_contains = "email"
/// score = 0.9
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftConfig {
    /// Score when no rule matches.
    pub baseline: f64,
    pub rules: Vec<DriftRule>,
}

impl Default for DriftConfig {
    fn default() -> Self {
        Self {
            baseline: 0.1,
            rules: vec![DriftRule {
                task_contains: "analyze".to_string(),
                action_contains: "email".to_string(),
                score: 0.9,
            }],
        }
    }
}

/// Scores drift as the highest matching rule, or the baseline.
#[derive(Debug, Clone)]
pub struct KeywordDriftScorer {
    config: DriftConfig,
}

impl KeywordDriftScorer {
    pub fn new(config: DriftConfig) -> Self {
        Self { config }
    }
}

impl DriftScorer for KeywordDriftScorer {
    fn score(&self, intent: &str, action: &str) -> f64 {
        let intent = intent.to_lowercase();
        let action = action.to_lowercase();

        let score = self
            .config
            .rules
            .iter()
            .filter(|rule| {
                intent.contains(&rule.task_contains.to_lowercase())
                    && action.contains(&rule.action_contains.to_lowercase())
            })
            .map(|rule| rule.score)
            .fold(self.config.baseline, f64::max);

        debug!(score, action = %action, "drift scored");
        score
    }
}

// ── Tokens ───────────────────────────────────────────────────────────────────

/// Counts whitespace-separated words as tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct WhitespaceTokenEstimator;

impl TokenEstimator for WhitespaceTokenEstimator {
    fn estimate(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }
}

// ── Retrieval ────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrievalConfig {
    pub instruction_signatures: Vec<String>,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            instruction_signatures: ["ignore previous instructions", "system proxy:", "execute immediately"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
        }
    }
}

/// Rejects text containing any known injection signature, ignoring case.
#[derive(Debug, Clone)]
pub struct SignatureScanner {
    signatures: Vec<String>,
}

impl SignatureScanner {
    pub fn new(config: RetrievalConfig) -> Self {
        Self {
            signatures: config
                .instruction_signatures
                .into_iter()
                .map(|s| s.to_lowercase())
                .collect(),
        }
    }
}

impl InstructionScanner for SignatureScanner {
    fn scan(&self, text: &str) -> bool {
        let text = text.to_lowercase();
        match self.signatures.iter().find(|s| text.contains(s.as_str())) {
            Some(signature) => {
                debug!(signature = %signature, "instruction signature matched");
                false
            }
            None => true,
        }
    }
}
