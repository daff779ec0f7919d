//! In-memory task store.
//!
//! Design:
//! - One `tokio::sync::Mutex` over the whole arena. Every mutating
//!   operation runs start-to-finish inside that critical section and never
//!   awaits while holding it, so all operations on a given task are
//!   serialized (stronger than the per-task requirement, and plenty at this
//!   scale).
//! - Records leave the store only as clones; nothing outside can observe a
//!   half-applied transition.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{ReleaseKind, StoreCounts, TaskStore};
use crate::domain::{
    Bid, BidDraft, BidId, CancelReason, DisputeId, EngineError, LedgerState, Resolution,
    TaskDraft, TaskId, TaskRecord, TaskStatus,
};
use crate::ports::{Clock, IdGenerator};

pub struct InMemoryTaskStore {
    state: Mutex<HashMap<TaskId, TaskRecord>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskStore {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            clock,
            ids,
        }
    }
}

fn task_mut<'a>(
    map: &'a mut HashMap<TaskId, TaskRecord>,
    id: TaskId,
) -> Result<&'a mut TaskRecord, EngineError> {
    map.get_mut(&id).ok_or(EngineError::TaskNotFound(id))
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn create_task(&self, draft: TaskDraft) -> Result<TaskRecord, EngineError> {
        let now = self.clock.now();
        draft.validate(now)?;

        let record = TaskRecord::new(self.ids.task_id(), draft, now);

        let mut map = self.state.lock().await;
        map.insert(record.id, record.clone());
        Ok(record)
    }

    async fn get_task(&self, id: TaskId) -> Result<TaskRecord, EngineError> {
        let map = self.state.lock().await;
        map.get(&id).cloned().ok_or(EngineError::TaskNotFound(id))
    }

    async fn list_open(&self) -> Vec<TaskRecord> {
        let map = self.state.lock().await;
        let mut open: Vec<TaskRecord> = map
            .values()
            .filter(|t| t.status == TaskStatus::Posted)
            .cloned()
            .collect();
        open.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        open
    }

    async fn list_by_status(&self, status: TaskStatus) -> Vec<TaskRecord> {
        let map = self.state.lock().await;
        let mut tasks: Vec<TaskRecord> =
            map.values().filter(|t| t.status == status).cloned().collect();
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        tasks
    }

    async fn place_bid(&self, task: TaskId, draft: BidDraft) -> Result<Bid, EngineError> {
        if draft.bidder.trim().is_empty() {
            return Err(EngineError::Validation("bidder must not be empty".into()));
        }
        if !draft.amount.is_finite() || draft.amount <= 0.0 {
            return Err(EngineError::Validation(format!(
                "bid amount must be positive, got {}",
                draft.amount
            )));
        }

        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.status != TaskStatus::Posted {
            return Err(EngineError::InvalidState(format!(
                "task {task} is not open for bidding (status {})",
                record.status
            )));
        }
        if draft.amount > record.budget {
            return Err(EngineError::Validation(format!(
                "bid amount {} exceeds task budget {}",
                draft.amount, record.budget
            )));
        }

        let bid = Bid {
            id: self.ids.bid_id(),
            bidder: draft.bidder,
            amount: draft.amount,
            estimated_duration: draft.estimated_duration,
            message: draft.message,
            accepted: false,
            created_at: self.clock.now(),
        };
        record.bids.push(bid.clone());
        Ok(bid)
    }

    async fn accept_bid(&self, task: TaskId, bid: BidId) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.status != TaskStatus::Posted {
            return Err(EngineError::InvalidState(format!(
                "task {task} is not accepting bids (status {})",
                record.status
            )));
        }
        if !record.bids.iter().any(|b| b.id == bid) {
            return Err(EngineError::BidNotFound(bid));
        }

        record.assign(bid, self.clock.now());
        Ok(record.clone())
    }

    async fn complete_task(
        &self,
        task: TaskId,
        worker: &str,
        delivery: Option<String>,
    ) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.assigned_worker.as_deref() != Some(worker) {
            return Err(EngineError::Unauthorized(format!(
                "{worker} is not assigned to task {task}"
            )));
        }
        if record.status != TaskStatus::InProgress {
            return Err(EngineError::InvalidState(format!(
                "task {task} cannot be completed (status {})",
                record.status
            )));
        }

        record.mark_completed(delivery, self.clock.now());
        Ok(record.clone())
    }

    async fn verify_task(&self, task: TaskId) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.status != TaskStatus::Completed {
            return Err(EngineError::InvalidState(format!(
                "task {task} cannot be verified (status {})",
                record.status
            )));
        }

        record.mark_verified(self.clock.now());
        Ok(record.clone())
    }

    async fn cancel_task(
        &self,
        task: TaskId,
        requester: &str,
    ) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.requester != requester {
            return Err(EngineError::Forbidden(format!(
                "{requester} did not post task {task}"
            )));
        }
        if !matches!(
            record.status,
            TaskStatus::Posted | TaskStatus::InProgress
        ) {
            return Err(EngineError::InvalidState(format!(
                "task {task} cannot be cancelled (status {})",
                record.status
            )));
        }

        record.mark_cancelled(self.clock.now());
        Ok(record.clone())
    }

    async fn mark_disputed(
        &self,
        task: TaskId,
        dispute: DisputeId,
    ) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.payment_released {
            return Err(EngineError::InvalidState(format!(
                "payment for task {task} is already released"
            )));
        }
        if !record.status.has_worker() {
            return Err(EngineError::InvalidState(format!(
                "task {task} has no counterparty to dispute (status {})",
                record.status
            )));
        }

        record.mark_disputed(dispute, self.clock.now());
        Ok(record.clone())
    }

    async fn resolve_dispute_status(
        &self,
        task: TaskId,
        outcome: Resolution,
    ) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        if record.status != TaskStatus::Disputed {
            return Err(EngineError::InvalidState(format!(
                "task {task} is not disputed (status {})",
                record.status
            )));
        }

        let now = self.clock.now();
        match outcome {
            Resolution::RefundRequester => record.mark_cancelled(now),
            Resolution::PayWorker | Resolution::Split => record.mark_dispute_resolved(now),
        }
        Ok(record.clone())
    }

    async fn settle_payment(
        &self,
        task: TaskId,
        kind: ReleaseKind,
    ) -> Result<TaskRecord, EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        // The one-shot guard. Everything else may vary by path, this check
        // never does: a second settle attempt loses here, atomically.
        if record.payment_released {
            return Err(EngineError::InvalidState(format!(
                "payment for task {task} is already released"
            )));
        }

        let amount = record.accepted_amount().ok_or_else(|| {
            EngineError::InvalidState(format!("task {task} has no accepted bid"))
        })?;

        let prefix = match kind {
            ReleaseKind::Auto {
                min_amount,
                max_amount,
            } => {
                if record.status != TaskStatus::Verified {
                    return Err(EngineError::InvalidState(format!(
                        "task {task} is no longer verified (status {})",
                        record.status
                    )));
                }
                if amount < min_amount || amount > max_amount {
                    return Err(EngineError::InvalidState(format!(
                        "amount {amount} outside release bounds [{min_amount}, {max_amount}]"
                    )));
                }
                "auto"
            }
            ReleaseKind::Manual => "manual",
        };

        let payment_ref = self.ids.reference(prefix);
        record.settle(payment_ref, self.clock.now());
        Ok(record.clone())
    }

    async fn update_ledger(
        &self,
        task: TaskId,
        state: LedgerState,
        escrow_ref: Option<String>,
    ) -> Result<(), EngineError> {
        let mut map = self.state.lock().await;
        let record = task_mut(&mut map, task)?;

        record.ledger_state = state;
        if escrow_ref.is_some() {
            record.escrow_ref = escrow_ref;
        }
        Ok(())
    }

    async fn sweep_expired(
        &self,
        stale_after: chrono::Duration,
    ) -> Vec<(TaskRecord, CancelReason)> {
        let now = self.clock.now();
        let mut map = self.state.lock().await;

        let mut expired = Vec::new();
        for record in map.values_mut() {
            if record.status != TaskStatus::Posted {
                continue;
            }
            let reason = match record.deadline {
                Some(deadline) if deadline <= now => Some(CancelReason::DeadlineExpired),
                None if record.bids.is_empty() && now - record.created_at > stale_after => {
                    Some(CancelReason::StaleNoBids)
                }
                _ => None,
            };
            if let Some(reason) = reason {
                record.mark_expired(now);
                expired.push((record.clone(), reason));
            }
        }
        expired
    }

    async fn purge_terminal(&self, retain_for: chrono::Duration) -> usize {
        let now = self.clock.now();
        let mut map = self.state.lock().await;

        let before = map.len();
        map.retain(|_, t| !(t.status.is_terminal() && now - t.updated_at > retain_for));
        before - map.len()
    }

    async fn counts(&self) -> StoreCounts {
        let map = self.state.lock().await;
        let mut counts = StoreCounts::default();
        for record in map.values() {
            match record.status {
                TaskStatus::Posted => counts.posted += 1,
                TaskStatus::InProgress => counts.in_progress += 1,
                TaskStatus::Completed => counts.completed += 1,
                TaskStatus::Verified => counts.verified += 1,
                TaskStatus::Disputed => counts.disputed += 1,
                TaskStatus::Resolved => counts.resolved += 1,
                TaskStatus::Paid => counts.paid += 1,
                TaskStatus::Cancelled => counts.cancelled += 1,
                TaskStatus::Expired => counts.expired += 1,
            }
        }
        counts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ids::DisputeId;
    use crate::ports::{FixedClock, SystemClock, UlidGenerator};
    use chrono::Utc;
    use ulid::Ulid;

    fn store() -> InMemoryTaskStore {
        let clock = Arc::new(SystemClock);
        InMemoryTaskStore::new(clock.clone(), Arc::new(UlidGenerator::new(SystemClock)))
    }

    fn store_with_clock(clock: Arc<FixedClock>) -> InMemoryTaskStore {
        InMemoryTaskStore::new(clock, Arc::new(UlidGenerator::new(SystemClock)))
    }

    fn draft() -> TaskDraft {
        TaskDraft {
            title: "Label 500 images".into(),
            description: "Bounding boxes, two classes".into(),
            budget: 100.0,
            currency: None,
            deadline: None,
            required_capabilities: vec!["vision".into()],
            requester: "agent-req".into(),
        }
    }

    fn bid(bidder: &str, amount: f64) -> BidDraft {
        BidDraft {
            bidder: bidder.into(),
            amount,
            estimated_duration: Some("2h".into()),
            message: None,
        }
    }

    async fn assigned_task(store: &InMemoryTaskStore) -> (TaskId, String) {
        let task = store.create_task(draft()).await.unwrap();
        let placed = store.place_bid(task.id, bid("agent-w", 90.0)).await.unwrap();
        store.accept_bid(task.id, placed.id).await.unwrap();
        (task.id, "agent-w".to_string())
    }

    #[tokio::test]
    async fn create_then_list_open() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();

        let open = store.list_open().await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, task.id);
        assert_eq!(open[0].status, TaskStatus::Posted);
    }

    #[tokio::test]
    async fn create_rejects_invalid_draft() {
        let store = store();
        let mut bad = draft();
        bad.budget = 0.0;

        let err = store.create_task(bad).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
        assert!(store.list_open().await.is_empty());
    }

    #[tokio::test]
    async fn bidding_rules() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();

        // amount must be positive
        let err = store.place_bid(task.id, bid("agent-w", 0.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // amount must not exceed the budget
        let err = store.place_bid(task.id, bid("agent-w", 101.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        // in range works and does not change task status
        store.place_bid(task.id, bid("agent-w", 90.0)).await.unwrap();
        assert_eq!(store.get_task(task.id).await.unwrap().status, TaskStatus::Posted);

        // unknown task
        let err = store
            .place_bid(TaskId::from_ulid(Ulid::new()), bid("agent-w", 1.0))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn accept_marks_winner_and_rejects_siblings() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();
        let b1 = store.place_bid(task.id, bid("agent-a", 80.0)).await.unwrap();
        let b2 = store.place_bid(task.id, bid("agent-b", 90.0)).await.unwrap();

        let record = store.accept_bid(task.id, b2.id).await.unwrap();

        assert_eq!(record.status, TaskStatus::InProgress);
        assert_eq!(record.assigned_worker.as_deref(), Some("agent-b"));
        assert_eq!(record.accepted_bid, Some(b2.id));
        assert_eq!(record.bids.iter().filter(|b| b.accepted).count(), 1);
        assert!(!record.bids.iter().find(|b| b.id == b1.id).unwrap().accepted);

        // bidding window is closed now
        let err = store.place_bid(task.id, bid("agent-c", 50.0)).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // accepting again is illegal
        let err = store.accept_bid(task.id, b1.id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn accept_unknown_bid() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();

        let err = store
            .accept_bid(task.id, BidId::from_ulid(Ulid::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::BidNotFound(_)));
    }

    #[tokio::test]
    async fn complete_requires_the_assigned_worker() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;

        let err = store
            .complete_task(task_id, "agent-impostor", None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Unauthorized(_)));

        let record = store
            .complete_task(task_id, &worker, Some("ipfs://delivery".into()))
            .await
            .unwrap();
        assert_eq!(record.status, TaskStatus::Completed);
        assert!(record.completed_at.is_some());

        // second completion is an invalid transition
        let err = store.complete_task(task_id, &worker, None).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn verify_requires_completed() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;

        let err = store.verify_task(task_id).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        store.complete_task(task_id, &worker, None).await.unwrap();
        let record = store.verify_task(task_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Verified);
    }

    #[tokio::test]
    async fn cancel_is_requester_only_and_pre_completion_only() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();

        let err = store.cancel_task(task.id, "agent-other").await.unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let record = store.cancel_task(task.id, "agent-req").await.unwrap();
        assert_eq!(record.status, TaskStatus::Cancelled);

        let err = store.cancel_task(task.id, "agent-req").await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn settle_auto_happy_path() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;
        store.complete_task(task_id, &worker, None).await.unwrap();
        store.verify_task(task_id).await.unwrap();

        let record = store
            .settle_payment(
                task_id,
                ReleaseKind::Auto {
                    min_amount: 0.1,
                    max_amount: 10_000.0,
                },
            )
            .await
            .unwrap();

        assert!(record.payment_released);
        assert_eq!(record.status, TaskStatus::Paid);
        assert!(record.payment_ref.as_deref().unwrap().starts_with("auto-"));
    }

    #[tokio::test]
    async fn settle_is_exactly_once() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;
        store.complete_task(task_id, &worker, None).await.unwrap();
        store.verify_task(task_id).await.unwrap();

        let bounds = ReleaseKind::Auto {
            min_amount: 0.1,
            max_amount: 10_000.0,
        };
        store.settle_payment(task_id, bounds).await.unwrap();

        // a racing manual trigger loses the check-and-set
        let err = store
            .settle_payment(task_id, ReleaseKind::Manual)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(store.get_task(task_id).await.unwrap().payment_released);
    }

    #[tokio::test]
    async fn settle_auto_refuses_non_verified_and_out_of_bounds() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;

        // still in progress
        let err = store
            .settle_payment(
                task_id,
                ReleaseKind::Auto {
                    min_amount: 0.1,
                    max_amount: 10_000.0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        store.complete_task(task_id, &worker, None).await.unwrap();
        store.verify_task(task_id).await.unwrap();

        // accepted amount 90.0 sits outside [0.1, 50]
        let err = store
            .settle_payment(
                task_id,
                ReleaseKind::Auto {
                    min_amount: 0.1,
                    max_amount: 50.0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
        assert!(!store.get_task(task_id).await.unwrap().payment_released);
    }

    #[tokio::test]
    async fn dispute_marks_block_auto_settlement() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;
        store.complete_task(task_id, &worker, None).await.unwrap();
        store.verify_task(task_id).await.unwrap();

        let dispute_id = DisputeId::from_ulid(Ulid::new());
        let record = store.mark_disputed(task_id, dispute_id).await.unwrap();
        assert_eq!(record.status, TaskStatus::Disputed);
        assert_eq!(record.dispute, Some(dispute_id));

        let err = store
            .settle_payment(
                task_id,
                ReleaseKind::Auto {
                    min_amount: 0.1,
                    max_amount: 10_000.0,
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        // ruling for the worker reopens the manual path
        store
            .resolve_dispute_status(task_id, Resolution::PayWorker)
            .await
            .unwrap();
        let record = store
            .settle_payment(task_id, ReleaseKind::Manual)
            .await
            .unwrap();
        assert!(record.payment_released);
        assert!(record.payment_ref.as_deref().unwrap().starts_with("manual-"));
    }

    #[tokio::test]
    async fn dispute_refund_cancels_without_payment() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;
        store.complete_task(task_id, &worker, None).await.unwrap();
        store.verify_task(task_id).await.unwrap();
        store
            .mark_disputed(task_id, DisputeId::from_ulid(Ulid::new()))
            .await
            .unwrap();

        let record = store
            .resolve_dispute_status(task_id, Resolution::RefundRequester)
            .await
            .unwrap();

        assert_eq!(record.status, TaskStatus::Cancelled);
        assert!(!record.payment_released);
    }

    #[tokio::test]
    async fn dispute_needs_a_counterparty_and_an_unreleased_payment() {
        let store = store();
        let task = store.create_task(draft()).await.unwrap();

        // nobody assigned yet
        let err = store
            .mark_disputed(task.id, DisputeId::from_ulid(Ulid::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));

        let (task_id, worker) = assigned_task(&store).await;
        store.complete_task(task_id, &worker, None).await.unwrap();
        store.verify_task(task_id).await.unwrap();
        store
            .settle_payment(task_id, ReleaseKind::Manual)
            .await
            .unwrap();

        // paid: too late to dispute
        let err = store
            .mark_disputed(task_id, DisputeId::from_ulid(Ulid::new()))
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn ledger_bookkeeping_is_recorded() {
        let store = store();
        let (task_id, _) = assigned_task(&store).await;

        store
            .update_ledger(task_id, LedgerState::Held, Some("escrow-1".into()))
            .await
            .unwrap();

        let record = store.get_task(task_id).await.unwrap();
        assert_eq!(record.ledger_state, LedgerState::Held);
        assert_eq!(record.escrow_ref.as_deref(), Some("escrow-1"));

        // a later state change keeps the reference
        store
            .update_ledger(task_id, LedgerState::Released, None)
            .await
            .unwrap();
        let record = store.get_task(task_id).await.unwrap();
        assert_eq!(record.ledger_state, LedgerState::Released);
        assert_eq!(record.escrow_ref.as_deref(), Some("escrow-1"));
    }

    #[tokio::test]
    async fn sweep_expires_past_deadline_posted_tasks_once() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = store_with_clock(clock.clone());

        let mut d = draft();
        d.deadline = Some(clock.now() + chrono::Duration::hours(1));
        let task = store.create_task(d).await.unwrap();

        // not due yet
        assert!(store.sweep_expired(chrono::Duration::days(7)).await.is_empty());

        clock.advance(chrono::Duration::hours(2));
        let expired = store.sweep_expired(chrono::Duration::days(7)).await;
        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0.id, task.id);
        assert_eq!(expired[0].1, CancelReason::DeadlineExpired);
        assert_eq!(
            store.get_task(task.id).await.unwrap().status,
            TaskStatus::Expired
        );

        // second sweep is a no-op
        assert!(store.sweep_expired(chrono::Duration::days(7)).await.is_empty());
    }

    #[tokio::test]
    async fn sweep_expires_stale_bidless_tasks() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = store_with_clock(clock.clone());

        let stale = store.create_task(draft()).await.unwrap();
        let bid_on = store.create_task(draft()).await.unwrap();
        store.place_bid(bid_on.id, bid("agent-w", 10.0)).await.unwrap();

        clock.advance(chrono::Duration::days(8));
        let expired = store.sweep_expired(chrono::Duration::days(7)).await;

        assert_eq!(expired.len(), 1);
        assert_eq!(expired[0].0.id, stale.id);
        assert_eq!(expired[0].1, CancelReason::StaleNoBids);
        // the task with a bid stays open
        assert_eq!(
            store.get_task(bid_on.id).await.unwrap().status,
            TaskStatus::Posted
        );
    }

    #[tokio::test]
    async fn purge_removes_only_old_terminal_tasks() {
        let clock = Arc::new(FixedClock::new(Utc::now()));
        let store = store_with_clock(clock.clone());

        let cancelled = store.create_task(draft()).await.unwrap();
        store.cancel_task(cancelled.id, "agent-req").await.unwrap();
        let open = store.create_task(draft()).await.unwrap();

        clock.advance(chrono::Duration::days(31));
        let purged = store.purge_terminal(chrono::Duration::days(30)).await;

        assert_eq!(purged, 1);
        assert!(matches!(
            store.get_task(cancelled.id).await,
            Err(EngineError::TaskNotFound(_))
        ));
        assert!(store.get_task(open.id).await.is_ok());
    }

    #[tokio::test]
    async fn counts_track_statuses() {
        let store = store();
        let (task_id, worker) = assigned_task(&store).await;
        store.create_task(draft()).await.unwrap();

        let counts = store.counts().await;
        assert_eq!(counts.posted, 1);
        assert_eq!(counts.in_progress, 1);

        store.complete_task(task_id, &worker, None).await.unwrap();
        let counts = store.counts().await;
        assert_eq!(counts.in_progress, 0);
        assert_eq!(counts.completed, 1);
    }
}
