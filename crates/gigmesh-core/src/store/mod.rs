//! Task store: owns task and bid records and enforces the state machine.
//!
//! The trait is the seam for swapping the in-memory arena for a persistent
//! keyed store; implementations must serialize all mutating operations on a
//! given task (single writer per task), which is what makes the bid
//! acceptance and payment invariants hold under concurrent callers.

mod memory;

pub use memory::InMemoryTaskStore;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::domain::{
    Bid, BidDraft, BidId, CancelReason, DisputeId, EngineError, LedgerState, Resolution,
    TaskDraft, TaskId, TaskRecord, TaskStatus,
};

/// Which release path is asking for the payment flip.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum ReleaseKind {
    /// Timer-driven release: only valid while the task is still Verified
    /// and the accepted amount sits inside the configured bounds.
    Auto { min_amount: f64, max_amount: f64 },

    /// Arbitrator/maintenance release: bypasses status and bounds, only
    /// the one-shot `payment_released` guard applies.
    Manual,
}

/// Task counts by status, for observability.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreCounts {
    pub posted: usize,
    pub in_progress: usize,
    pub completed: usize,
    pub verified: usize,
    pub disputed: usize,
    pub resolved: usize,
    pub paid: usize,
    pub cancelled: usize,
    pub expired: usize,
}

#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Validate the draft and insert a new Posted task.
    async fn create_task(&self, draft: TaskDraft) -> Result<TaskRecord, EngineError>;

    async fn get_task(&self, id: TaskId) -> Result<TaskRecord, EngineError>;

    /// Posted tasks, newest first.
    async fn list_open(&self) -> Vec<TaskRecord>;

    async fn list_by_status(&self, status: TaskStatus) -> Vec<TaskRecord>;

    /// Append a bid to a Posted task. Does not change task status.
    async fn place_bid(&self, task: TaskId, draft: BidDraft) -> Result<Bid, EngineError>;

    /// Accept one bid: winner marked, siblings rejected, worker assigned,
    /// status moved to InProgress, all in one critical section.
    async fn accept_bid(&self, task: TaskId, bid: BidId) -> Result<TaskRecord, EngineError>;

    async fn complete_task(
        &self,
        task: TaskId,
        worker: &str,
        delivery: Option<String>,
    ) -> Result<TaskRecord, EngineError>;

    async fn verify_task(&self, task: TaskId) -> Result<TaskRecord, EngineError>;

    /// Requester-initiated cancellation, legal from Posted or InProgress.
    async fn cancel_task(&self, task: TaskId, requester: &str)
    -> Result<TaskRecord, EngineError>;

    /// Record an open dispute on the task so the release path's re-read
    /// sees it. Fails once payment is released.
    async fn mark_disputed(
        &self,
        task: TaskId,
        dispute: DisputeId,
    ) -> Result<TaskRecord, EngineError>;

    /// Apply a dispute ruling to the task status (Resolved, or Cancelled
    /// for a refund). Payment release, when owed, is a separate step.
    async fn resolve_dispute_status(
        &self,
        task: TaskId,
        outcome: Resolution,
    ) -> Result<TaskRecord, EngineError>;

    /// The one-shot payment flip. Atomic check-and-set per task: two
    /// concurrent callers can never both succeed.
    async fn settle_payment(
        &self,
        task: TaskId,
        kind: ReleaseKind,
    ) -> Result<TaskRecord, EngineError>;

    /// Record the ledger's view of this task (write-behind bookkeeping).
    async fn update_ledger(
        &self,
        task: TaskId,
        state: LedgerState,
        escrow_ref: Option<String>,
    ) -> Result<(), EngineError>;

    /// Expire stale Posted tasks: past deadline, or deadline-less with zero
    /// bids and older than `stale_after`. Returns the transitioned records
    /// with their reason tags. Idempotent: non-Posted tasks are untouched.
    async fn sweep_expired(&self, stale_after: chrono::Duration)
    -> Vec<(TaskRecord, CancelReason)>;

    /// Hard-delete terminal tasks untouched for longer than `retain_for`.
    async fn purge_terminal(&self, retain_for: chrono::Duration) -> usize;

    async fn counts(&self) -> StoreCounts;
}
