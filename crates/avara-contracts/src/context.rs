//! Types for the context-facing guards: prompt assembly, retrieved
//! documents, and agent-to-agent messages.

use serde::{Deserialize, Serialize};

/// A prompt context that fit the token budget.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PromptContext {
    pub tokens_used: usize,
    /// Constraints re-anchored at the top of every context. Never pruned.
    pub safety_anchors: Vec<String>,
    pub working_memory: String,
}

impl PromptContext {
    /// Render the final block: anchors, then the system prompt, then the query.
    pub fn render(&self, system_prompt: &str) -> String {
        format!(
            "{}\n\n{}\n\n{}",
            self.safety_anchors.join("\n"),
            system_prompt,
            self.working_memory
        )
    }
}

/// Provenance and ACL for one retrievable document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentProvenance {
    pub doc_id: String,
    pub source_uri: String,
    /// Role names allowed to retrieve this document.
    pub allowed_roles: Vec<String>,
    pub content_hash: String,
}

/// Retrieved content that passed the firewall.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetrievedContext {
    pub query: String,
    pub text_content: String,
    pub provenance: DocumentProvenance,
}

/// A message passed from one agent to another.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentMessage {
    pub sender_id: String,
    pub receiver_id: String,
    pub content: String,
    /// Assumptions the sender is propagating downstream.
    #[serde(default)]
    pub assumptions: Vec<String>,
    /// Sender's confidence in the content, 0.0 to 1.0.
    pub confidence: f64,
}
