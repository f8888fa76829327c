//! Context saturation guard.
//!
//! Keeps an assembled prompt inside its token budget and pins the safety
//! anchors to the top of every context so they are never pushed out.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use avara_contracts::{
    context::PromptContext,
    error::{AvaraError, AvaraResult},
};

use crate::traits::TokenEstimator;

pub const DEFAULT_SAFETY_ANCHORS: [&str; 2] = [
    "CRITICAL: Do not alter configuration files.",
    "CRITICAL: Only read from the designated sandboxed directory.",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContextConfig {
    pub max_tokens: usize,
    pub safety_anchors: Vec<String>,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            max_tokens: 4000,
            safety_anchors: DEFAULT_SAFETY_ANCHORS.iter().map(|a| a.to_string()).collect(),
        }
    }
}

pub struct ContextGovernor {
    config: ContextConfig,
    estimator: Box<dyn TokenEstimator>,
}

impl ContextGovernor {
    pub fn new(config: ContextConfig, estimator: Box<dyn TokenEstimator>) -> Self {
        Self { config, estimator }
    }

    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Fails with `Saturation` when `text` is over budget.
    pub fn validate_budget(&self, text: &str) -> AvaraResult<usize> {
        let used = self.estimator.estimate(text);
        if used > self.config.max_tokens {
            warn!(used, budget = self.config.max_tokens, "context saturation");
            return Err(AvaraError::Saturation {
                used,
                budget: self.config.max_tokens,
            });
        }
        Ok(used)
    }

    /// Assemble anchors, system prompt, and query, then check the budget on
    /// the whole block.
    pub fn prepare_context(&self, query: &str, system_prompt: &str) -> AvaraResult<PromptContext> {
        let mut context = PromptContext {
            tokens_used: 0,
            safety_anchors: self.config.safety_anchors.clone(),
            working_memory: query.to_string(),
        };
        context.tokens_used = self.validate_budget(&context.render(system_prompt))?;

        debug!(tokens_used = context.tokens_used, budget = self.config.max_tokens, "context prepared");
        Ok(context)
    }
}

#[cfg(test)]
mod tests {
    use avara_contracts::error::AvaraError;

    use super::{ContextConfig, ContextGovernor};
    use crate::traits::TokenEstimator;

    struct Words;

    impl TokenEstimator for Words {
        fn estimate(&self, text: &str) -> usize {
            text.split_whitespace().count()
        }
    }

    fn governor(max_tokens: usize) -> ContextGovernor {
        ContextGovernor::new(
            ContextConfig {
                max_tokens,
                ..ContextConfig::default()
            },
            Box::new(Words),
        )
    }

    #[test]
    fn anchors_lead_the_rendered_block() {
        let context = governor(4000)
            .prepare_context("summarize yesterday's errors", "You are a log analyst.")
            .unwrap();
        let block = context.render("You are a log analyst.");

        assert!(block.starts_with("CRITICAL: Do not alter configuration files.\nCRITICAL: Only read"));
        assert!(block.ends_with("You are a log analyst.\n\nsummarize yesterday's errors"));
        assert_eq!(context.tokens_used, block.split_whitespace().count());
    }

    #[test]
    fn over_budget_is_saturation() {
        let huge = "word ".repeat(5000);
        match governor(4000).prepare_context(&huge, "prompt") {
            Err(AvaraError::Saturation { used, budget }) => {
                assert!(used > 5000);
                assert_eq!(budget, 4000);
            }
            other => panic!("expected Saturation, got {:?}", other),
        }
    }

    #[test]
    fn budget_is_inclusive() {
        let governor = governor(3);
        assert_eq!(governor.validate_budget("one two three").unwrap(), 3);
        assert!(governor.validate_budget("one two three four").is_err());
    }
}
