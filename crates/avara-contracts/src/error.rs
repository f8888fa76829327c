//! Error types for the AVARA control plane.
//!
//! All fallible operations return `AvaraResult<T>`. Every variant that
//! represents a security rejection has already been written to the audit
//! ledger by the time the caller sees it.

use thiserror::Error;

use crate::{approval::ApprovalStatus, verdict::BlockingGuard};

/// The unified error type for the AVARA crates.
#[derive(Debug, Error)]
pub enum AvaraError {
    /// The identity is unknown, expired, or revoked. The caller must
    /// re-provision; retrying with the same id never succeeds.
    #[error("unauthorized agent '{agent_id}': {reason}")]
    Unauthorized { agent_id: String, reason: String },

    /// A guard blocked the action. The identical action must not be retried.
    #[error("blocked by {guard}: {reason}")]
    Forbidden { guard: BlockingGuard, reason: String },

    /// The circuit breaker halted the action into the approval queue.
    ///
    /// `action_id` names the pending approval an operator can resolve.
    #[error("action '{action_id}' halted by circuit breaker: {reason}")]
    ApprovalRequired { action_id: String, reason: String },

    /// No pending approval exists for this action id.
    #[error("no pending approval for action '{action_id}'")]
    NotFound { action_id: String },

    /// The approval was already moved to a terminal status.
    #[error("approval for action '{action_id}' already resolved as {status}")]
    AlreadyResolved {
        action_id: String,
        status: ApprovalStatus,
    },

    /// The assembled context exceeds the token budget. Shrink the input.
    #[error("context saturation: {used} tokens exceeds budget of {budget}")]
    Saturation { used: usize, budget: usize },

    /// A synchronous approver refused a halted action.
    #[error("action '{action}' was denied by human/policy override")]
    PermissionDenied { action: String },

    /// The ledger could not record a decision.
    ///
    /// Fatal for the call that produced it: an unaudited decision is treated
    /// as not having happened.
    #[error("audit write failed: {reason}")]
    AuditWriteFailed { reason: String },

    /// Shared control-plane state could not be accessed.
    #[error("state error: {reason}")]
    StateError { reason: String },

    /// A required configuration value is missing or invalid.
    #[error("configuration error: {reason}")]
    ConfigError { reason: String },

    /// Input did not match the shape it was declared with.
    #[error("schema validation error: {reason}")]
    SchemaValidation { reason: String },
}

impl AvaraError {
    /// The transport status code this error maps to.
    pub fn status_code(&self) -> u16 {
        match self {
            Self::Unauthorized { .. } => 401,
            Self::Forbidden { .. }
            | Self::ApprovalRequired { .. }
            | Self::PermissionDenied { .. } => 403,
            Self::NotFound { .. } => 404,
            Self::AlreadyResolved { .. } => 409,
            Self::Saturation { .. } => 413,
            Self::SchemaValidation { .. } => 422,
            Self::AuditWriteFailed { .. } | Self::StateError { .. } | Self::ConfigError { .. } => {
                500
            }
        }
    }

    /// True for rejections the caller may not retry unchanged.
    pub fn is_rejection(&self) -> bool {
        matches!(
            self,
            Self::Unauthorized { .. }
                | Self::Forbidden { .. }
                | Self::ApprovalRequired { .. }
                | Self::PermissionDenied { .. }
                | Self::Saturation { .. }
        )
    }
}

/// Convenience alias used throughout the AVARA crates.
pub type AvaraResult<T> = Result<T, AvaraError>;
