//! Engine error taxonomy.
//!
//! Validation and authorization failures are rejected synchronously with no
//! state mutation. Background loops (escrow release, sweeper, webhook
//! delivery) log their errors and move on; they never surface them to the
//! caller that triggered the event.

use thiserror::Error;

use super::ids::{BidId, DisputeId, SubscriptionId, TaskId};

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),

    #[error("bid not found: {0}")]
    BidNotFound(BidId),

    #[error("dispute not found: {0}")]
    DisputeNotFound(DisputeId),

    #[error("webhook subscription not found: {0}")]
    SubscriptionNotFound(SubscriptionId),

    /// The operation is illegal for the entity's current status.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Malformed input; nothing was mutated.
    #[error("validation failed: {0}")]
    Validation(String),

    /// The actor is not entitled to act on this entity.
    #[error("unauthorized: {0}")]
    Unauthorized(String),

    /// The actor is known but not allowed here (wrong party, reputation
    /// below the admission floor, ...).
    #[error("forbidden: {0}")]
    Forbidden(String),

    /// Duplicate active dispute, duplicate id.
    #[error("conflict: {0}")]
    Conflict(String),

    /// Settlement ledger unreachable or rejected the write. Non-fatal:
    /// the task stays valid in a degraded, locally-settled state.
    #[error("settlement ledger: {0}")]
    Ledger(String),
}

impl EngineError {
    /// HTTP-equivalent status code, for transports that need one.
    pub fn status_code(&self) -> u16 {
        match self {
            EngineError::TaskNotFound(_)
            | EngineError::BidNotFound(_)
            | EngineError::DisputeNotFound(_)
            | EngineError::SubscriptionNotFound(_) => 404,
            EngineError::InvalidState(_) | EngineError::Validation(_) => 400,
            EngineError::Unauthorized(_) | EngineError::Forbidden(_) => 403,
            EngineError::Conflict(_) => 409,
            EngineError::Ledger(_) => 502,
        }
    }
}
