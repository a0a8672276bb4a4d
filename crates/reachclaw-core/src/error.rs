//! Error taxonomy for the outreach engine.
//!
//! The variants map directly onto how the control loop reacts:
//! `Validation`/`Conflict`/`NotFound` are rejected at the API boundary,
//! `RateLimited` keeps a task pending, `Transient` requeues with backoff,
//! `Permanent` terminates a task as failed, `Storage` pauses the tick.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Result alias used across all ReachClaw crates.
pub type Result<T> = std::result::Result<T, ReachClawError>;

#[derive(Debug, Error)]
pub enum ReachClawError {
    /// Malformed request, rejected before enqueue.
    #[error("validation error: {0}")]
    Validation(String),

    /// Concurrent-edit precondition failed (e.g. editing a non-pending task).
    #[error("conflict: {0}")]
    Conflict(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// Quota exhausted; not an operator-visible failure. Carries the earliest
    /// instant the strictest violated ceiling will admit the action again.
    #[error("rate limited until {retry_after}")]
    RateLimited { retry_after: DateTime<Utc> },

    /// Retryable execution failure: timeout, platform pushback, network blip.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Non-retryable execution failure: duplicate action, gone target,
    /// permanently invalid content.
    #[error("permanent failure: {0}")]
    Permanent(String),

    /// Entity store unavailable. Fatal for the current tick only.
    #[error("storage error: {0}")]
    Storage(String),

    #[error("config error: {0}")]
    Config(String),

    /// Content collaborator failed; degrades to empty content, never blocks.
    #[error("content generation failed: {0}")]
    Content(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl ReachClawError {
    /// Whether the executor may requeue a task after this failure.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ReachClawError::Transient(_) | ReachClawError::RateLimited { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(ReachClawError::Transient("timeout".into()).is_retryable());
        assert!(
            ReachClawError::RateLimited { retry_after: Utc::now() }.is_retryable()
        );
        assert!(!ReachClawError::Permanent("duplicate".into()).is_retryable());
        assert!(!ReachClawError::Validation("empty content".into()).is_retryable());
        assert!(!ReachClawError::Storage("db locked".into()).is_retryable());
    }
}
