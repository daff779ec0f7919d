//! Task and bid records: metadata + state machine.
//!
//! Design:
//! - `TaskRecord` is the single source of truth for one task's state.
//! - All state transitions happen through methods here; callers (the store)
//!   check preconditions inside their critical section and then apply the
//!   transition, so a record is never observable mid-transition.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::errors::EngineError;
use super::ids::{BidId, DisputeId, TaskId};

/// Task lifecycle status.
///
/// State transitions:
/// - Posted -> InProgress -> Completed -> Verified -> Paid
/// - Verified -> Disputed -> Resolved -> Paid (arbitrator ruled for the worker)
/// - Posted -> Expired (sweeper)
/// - Posted | InProgress -> Cancelled (requester, or dispute refund)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Open for bidding.
    Posted,

    /// A bid was accepted; the assigned worker is on it.
    InProgress,

    /// Worker delivered; waiting for verification.
    Completed,

    /// Delivery verified; payment release is pending the dispute window.
    Verified,

    /// An open dispute is freezing payment release.
    Disputed,

    /// Dispute resolved; terminal unless the ruling pays the worker.
    Resolved,

    /// Payment released. Terminal.
    Paid,

    /// Withdrawn before completion. Terminal.
    Cancelled,

    /// Forced out by the sweeper. Terminal.
    Expired,
}

impl TaskStatus {
    /// Is this a terminal state (no further transitions)?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Paid | TaskStatus::Cancelled | TaskStatus::Expired
        )
    }

    /// Does this status imply an assigned worker?
    pub fn has_worker(self) -> bool {
        matches!(
            self,
            TaskStatus::InProgress
                | TaskStatus::Completed
                | TaskStatus::Verified
                | TaskStatus::Disputed
                | TaskStatus::Resolved
                | TaskStatus::Paid
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            TaskStatus::Posted => "posted",
            TaskStatus::InProgress => "in_progress",
            TaskStatus::Completed => "completed",
            TaskStatus::Verified => "verified",
            TaskStatus::Disputed => "disputed",
            TaskStatus::Resolved => "resolved",
            TaskStatus::Paid => "paid",
            TaskStatus::Cancelled => "cancelled",
            TaskStatus::Expired => "expired",
        };
        f.write_str(s)
    }
}

/// Reason tag attached to a `task.cancelled` event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// Sweeper: deadline passed while still open.
    DeadlineExpired,
    /// Sweeper: no deadline, no bids, open past the staleness threshold.
    StaleNoBids,
    /// The requester withdrew the task.
    RequesterCancelled,
}

impl CancelReason {
    pub fn as_str(self) -> &'static str {
        match self {
            CancelReason::DeadlineExpired => "deadline_expired",
            CancelReason::StaleNoBids => "stale_no_bids",
            CancelReason::RequesterCancelled => "requester_cancelled",
        }
    }
}

/// Where the external settlement ledger stands for this task.
///
/// The ledger is write-behind and best-effort: a failed write degrades the
/// task, it never blocks the in-store transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LedgerState {
    /// No ledger configured, or nothing to record yet.
    Skipped,
    /// Escrow entry created on the ledger.
    Held,
    /// Escrow entry released on the ledger.
    Released,
    /// A ledger write failed; the task is settled locally only.
    Failed,
}

/// A worker's offer on a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Bid {
    pub id: BidId,
    pub bidder: String,
    pub amount: f64,
    pub estimated_duration: Option<String>,
    pub message: Option<String>,
    pub accepted: bool,
    pub created_at: DateTime<Utc>,
}

/// Input for placing a bid.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BidDraft {
    pub bidder: String,
    pub amount: f64,
    #[serde(default)]
    pub estimated_duration: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Input for task creation; validated before a record is allocated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskDraft {
    pub title: String,
    pub description: String,
    pub budget: f64,
    #[serde(default)]
    pub currency: Option<String>,
    pub deadline: Option<DateTime<Utc>>,
    pub required_capabilities: Vec<String>,
    pub requester: String,
}

impl TaskDraft {
    /// Validate creation input.
    ///
    /// Rules: positive finite budget, future deadline (when given),
    /// 1..=10 required capabilities, non-empty title and requester.
    pub fn validate(&self, now: DateTime<Utc>) -> Result<(), EngineError> {
        if self.title.trim().is_empty() {
            return Err(EngineError::Validation("title must not be empty".into()));
        }
        if self.requester.trim().is_empty() {
            return Err(EngineError::Validation("requester must not be empty".into()));
        }
        if !self.budget.is_finite() || self.budget <= 0.0 {
            return Err(EngineError::Validation(format!(
                "budget must be a positive amount, got {}",
                self.budget
            )));
        }
        if let Some(deadline) = self.deadline
            && deadline <= now
        {
            return Err(EngineError::Validation(
                "deadline must be in the future".into(),
            ));
        }
        let caps = self.required_capabilities.len();
        if caps == 0 || caps > 10 {
            return Err(EngineError::Validation(format!(
                "between 1 and 10 required capabilities expected, got {caps}"
            )));
        }
        Ok(())
    }
}

/// Single source of truth for one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskRecord {
    pub id: TaskId,
    pub title: String,
    pub description: String,
    pub budget: f64,
    pub currency: String,
    pub deadline: Option<DateTime<Utc>>,
    pub required_capabilities: Vec<String>,
    pub requester: String,

    pub status: TaskStatus,
    pub assigned_worker: Option<String>,
    pub bids: Vec<Bid>,
    pub accepted_bid: Option<BidId>,
    pub delivery: Option<String>,

    pub payment_released: bool,
    pub payment_ref: Option<String>,
    pub payment_released_at: Option<DateTime<Utc>>,
    pub escrow_ref: Option<String>,
    pub ledger_state: LedgerState,

    pub dispute: Option<DisputeId>,

    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl TaskRecord {
    pub fn new(id: TaskId, draft: TaskDraft, now: DateTime<Utc>) -> Self {
        Self {
            id,
            title: draft.title,
            description: draft.description,
            budget: draft.budget,
            currency: draft.currency.unwrap_or_else(|| "USDC".to_string()),
            deadline: draft.deadline,
            required_capabilities: draft.required_capabilities,
            requester: draft.requester,
            status: TaskStatus::Posted,
            assigned_worker: None,
            bids: Vec::new(),
            accepted_bid: None,
            delivery: None,
            payment_released: false,
            payment_ref: None,
            payment_released_at: None,
            escrow_ref: None,
            ledger_state: LedgerState::Skipped,
            dispute: None,
            created_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Amount of the accepted bid, if one exists.
    pub fn accepted_amount(&self) -> Option<f64> {
        let accepted = self.accepted_bid?;
        self.bids.iter().find(|b| b.id == accepted).map(|b| b.amount)
    }

    /// The accepted bid record, if one exists.
    pub fn accepted_bid_record(&self) -> Option<&Bid> {
        let accepted = self.accepted_bid?;
        self.bids.iter().find(|b| b.id == accepted)
    }

    /// Accept one bid and reject all siblings.
    ///
    /// Invariant kept here: at most one bid has `accepted == true`.
    pub fn assign(&mut self, bid_id: BidId, now: DateTime<Utc>) {
        let mut worker = None;
        for bid in &mut self.bids {
            bid.accepted = bid.id == bid_id;
            if bid.accepted {
                worker = Some(bid.bidder.clone());
            }
        }
        self.accepted_bid = Some(bid_id);
        self.assigned_worker = worker;
        self.status = TaskStatus::InProgress;
        self.updated_at = now;
    }

    pub fn mark_completed(&mut self, delivery: Option<String>, now: DateTime<Utc>) {
        self.status = TaskStatus::Completed;
        self.delivery = delivery;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    pub fn mark_verified(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Verified;
        self.updated_at = now;
    }

    pub fn mark_disputed(&mut self, dispute: DisputeId, now: DateTime<Utc>) {
        self.status = TaskStatus::Disputed;
        self.dispute = Some(dispute);
        self.updated_at = now;
    }

    /// Dispute closed. The dispute reference stays on the record as an
    /// audit trail.
    pub fn mark_dispute_resolved(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Resolved;
        self.updated_at = now;
    }

    /// Flip the payment flag. One-way: never called twice for a task
    /// (guarded by the store's check-and-set).
    pub fn settle(&mut self, payment_ref: String, now: DateTime<Utc>) {
        self.payment_released = true;
        self.payment_ref = Some(payment_ref);
        self.payment_released_at = Some(now);
        self.status = TaskStatus::Paid;
        self.updated_at = now;
    }

    pub fn mark_cancelled(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Cancelled;
        self.updated_at = now;
    }

    pub fn mark_expired(&mut self, now: DateTime<Utc>) {
        self.status = TaskStatus::Expired;
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::TaskId;
    use rstest::rstest;
    use ulid::Ulid;

    fn draft() -> TaskDraft {
        TaskDraft {
            title: "Summarize a dataset".into(),
            description: "Produce a one-page summary".into(),
            budget: 100.0,
            currency: None,
            deadline: None,
            required_capabilities: vec!["analysis".into()],
            requester: "agent-req".into(),
        }
    }

    fn record() -> TaskRecord {
        TaskRecord::new(TaskId::from_ulid(Ulid::new()), draft(), Utc::now())
    }

    #[test]
    fn new_task_is_posted_and_unpaid() {
        let task = record();
        assert_eq!(task.status, TaskStatus::Posted);
        assert!(!task.payment_released);
        assert!(task.assigned_worker.is_none());
        assert_eq!(task.currency, "USDC");
    }

    #[test]
    fn assign_accepts_one_bid_and_rejects_siblings() {
        let mut task = record();
        let now = Utc::now();
        for i in 0..3 {
            task.bids.push(Bid {
                id: BidId::from_ulid(Ulid::new()),
                bidder: format!("worker-{i}"),
                amount: 50.0 + i as f64,
                estimated_duration: None,
                message: None,
                accepted: false,
                created_at: now,
            });
        }
        let winner = task.bids[1].id;

        task.assign(winner, now);

        assert_eq!(task.status, TaskStatus::InProgress);
        assert_eq!(task.assigned_worker.as_deref(), Some("worker-1"));
        assert_eq!(task.bids.iter().filter(|b| b.accepted).count(), 1);
        assert_eq!(task.accepted_amount(), Some(51.0));
    }

    #[test]
    fn settle_is_one_way() {
        let mut task = record();
        let now = Utc::now();
        task.settle("auto-abc".into(), now);

        assert!(task.payment_released);
        assert_eq!(task.status, TaskStatus::Paid);
        assert_eq!(task.payment_ref.as_deref(), Some("auto-abc"));
        assert!(task.payment_released_at.is_some());
    }

    #[rstest]
    #[case::paid(TaskStatus::Paid, true)]
    #[case::cancelled(TaskStatus::Cancelled, true)]
    #[case::expired(TaskStatus::Expired, true)]
    #[case::posted(TaskStatus::Posted, false)]
    #[case::verified(TaskStatus::Verified, false)]
    #[case::disputed(TaskStatus::Disputed, false)]
    #[case::resolved(TaskStatus::Resolved, false)]
    fn terminal_statuses(#[case] status: TaskStatus, #[case] terminal: bool) {
        assert_eq!(status.is_terminal(), terminal);
    }

    #[rstest]
    #[case::zero_budget(0.0)]
    #[case::negative_budget(-5.0)]
    #[case::nan_budget(f64::NAN)]
    fn draft_rejects_bad_budget(#[case] budget: f64) {
        let mut d = draft();
        d.budget = budget;
        assert!(matches!(
            d.validate(Utc::now()),
            Err(EngineError::Validation(_))
        ));
    }

    #[test]
    fn draft_rejects_past_deadline() {
        let mut d = draft();
        let now = Utc::now();
        d.deadline = Some(now - chrono::Duration::seconds(1));
        assert!(matches!(d.validate(now), Err(EngineError::Validation(_))));
    }

    #[test]
    fn draft_rejects_capability_count_out_of_range() {
        let mut d = draft();
        d.required_capabilities = vec![];
        assert!(d.validate(Utc::now()).is_err());

        d.required_capabilities = (0..11).map(|i| format!("cap-{i}")).collect();
        assert!(d.validate(Utc::now()).is_err());
    }

    #[test]
    fn draft_accepts_valid_input() {
        let now = Utc::now();
        let mut d = draft();
        d.deadline = Some(now + chrono::Duration::hours(24));
        assert!(d.validate(now).is_ok());
    }
}
