//! Dispute gate: owns dispute records and the release-blocked predicate.
//!
//! Design:
//! - One non-resolved dispute per task, enforced inside the gate's own
//!   critical section (`active` index).
//! - Records are never deleted; resolution is terminal and the full history
//!   stays queryable as an audit trail.
//! - `release_blocked` is the single boolean the escrow release path
//!   consults at execution time (not at scheduling time).

use std::collections::HashMap;
use std::sync::Arc;

use tokio::sync::Mutex;
use tracing::info;

use crate::domain::{
    DisputeId, DisputeRecord, DisputeStatus, EngineError, EvidenceKind, Resolution, TaskId,
};
use crate::ports::{Clock, IdGenerator};

/// Filters for dispute listings.
#[derive(Debug, Clone, Default)]
pub struct DisputeFilter {
    pub status: Option<DisputeStatus>,
    pub task: Option<TaskId>,
    pub initiator: Option<String>,
}

struct GateState {
    disputes: HashMap<DisputeId, DisputeRecord>,
    /// Task -> its one non-resolved dispute.
    active: HashMap<TaskId, DisputeId>,
}

pub struct DisputeGate {
    state: Mutex<GateState>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
}

impl DisputeGate {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            state: Mutex::new(GateState {
                disputes: HashMap::new(),
                active: HashMap::new(),
            }),
            clock,
            ids,
        }
    }

    /// Open a dispute against a task. `Conflict` if the task already has a
    /// non-resolved one.
    pub async fn open(
        &self,
        task: TaskId,
        initiator: String,
        respondent: String,
        reason: String,
    ) -> Result<DisputeRecord, EngineError> {
        let len = reason.trim().len();
        if !(10..=500).contains(&len) {
            return Err(EngineError::Validation(
                "dispute reason must be 10-500 characters".into(),
            ));
        }
        if initiator == respondent {
            return Err(EngineError::Validation(
                "initiator and respondent must differ".into(),
            ));
        }

        let mut state = self.state.lock().await;
        if let Some(existing) = state.active.get(&task) {
            return Err(EngineError::Conflict(format!(
                "task {task} already has an active dispute ({existing})"
            )));
        }

        let record = DisputeRecord::new(
            self.ids.dispute_id(),
            task,
            initiator,
            respondent,
            reason,
            self.clock.now(),
        );
        state.active.insert(task, record.id);
        state.disputes.insert(record.id, record.clone());
        info!(
            dispute_id = %record.id,
            task_id = %task,
            initiator = %record.initiator,
            respondent = %record.respondent,
            "dispute opened"
        );
        Ok(record)
    }

    /// Drop a dispute that was opened but whose task-side mark failed
    /// (e.g. payment released concurrently). Only a pristine open record
    /// can be discarded; anything with history stays.
    pub(crate) async fn discard(&self, id: DisputeId) {
        let mut state = self.state.lock().await;
        let pristine = state
            .disputes
            .get(&id)
            .map(|d| d.status == DisputeStatus::Open && d.evidence.is_empty())
            .unwrap_or(false);
        if pristine
            && let Some(record) = state.disputes.remove(&id)
        {
            state.active.remove(&record.task);
        }
    }

    pub async fn submit_evidence(
        &self,
        id: DisputeId,
        party: String,
        kind: EvidenceKind,
        content: String,
    ) -> Result<DisputeRecord, EngineError> {
        let len = content.len();
        if !(1..=2000).contains(&len) {
            return Err(EngineError::Validation(
                "evidence content must be 1-2000 characters".into(),
            ));
        }

        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let record = state
            .disputes
            .get_mut(&id)
            .ok_or(EngineError::DisputeNotFound(id))?;

        if record.is_resolved() {
            return Err(EngineError::InvalidState(format!(
                "dispute {id} is already resolved"
            )));
        }
        if !record.involves(&party) {
            return Err(EngineError::Forbidden(format!(
                "{party} is not a party to dispute {id}"
            )));
        }

        record.add_evidence(party, kind, content, now);
        Ok(record.clone())
    }

    /// Move an open dispute to under-review and attach the arbitrator.
    pub async fn begin_review(
        &self,
        id: DisputeId,
        arbitrator: String,
    ) -> Result<DisputeRecord, EngineError> {
        let mut state = self.state.lock().await;
        let record = state
            .disputes
            .get_mut(&id)
            .ok_or(EngineError::DisputeNotFound(id))?;

        if record.status != DisputeStatus::Open {
            return Err(EngineError::InvalidState(format!(
                "dispute {id} is not open for review"
            )));
        }

        record.begin_review(arbitrator);
        Ok(record.clone())
    }

    /// Terminal: records the ruling and frees the task for a new dispute.
    pub async fn resolve(
        &self,
        id: DisputeId,
        arbitrator: String,
        outcome: Resolution,
        reason: Option<String>,
    ) -> Result<DisputeRecord, EngineError> {
        let mut state = self.state.lock().await;
        let now = self.clock.now();
        let record = state
            .disputes
            .get_mut(&id)
            .ok_or(EngineError::DisputeNotFound(id))?;

        if record.is_resolved() {
            return Err(EngineError::InvalidState(format!(
                "dispute {id} is already resolved"
            )));
        }

        record.resolve(arbitrator, outcome, reason, now);
        let record = record.clone();
        state.active.remove(&record.task);
        info!(
            dispute_id = %id,
            task_id = %record.task,
            outcome = ?outcome,
            arbitrator = record.arbitrator.as_deref().unwrap_or(""),
            "dispute resolved"
        );
        Ok(record)
    }

    /// The predicate the release path re-reads at execution time.
    pub async fn release_blocked(&self, task: TaskId) -> bool {
        let state = self.state.lock().await;
        state.active.contains_key(&task)
    }

    pub async fn get(&self, id: DisputeId) -> Result<DisputeRecord, EngineError> {
        let state = self.state.lock().await;
        state
            .disputes
            .get(&id)
            .cloned()
            .ok_or(EngineError::DisputeNotFound(id))
    }

    /// The task's non-resolved dispute, if any.
    pub async fn active_for_task(&self, task: TaskId) -> Option<DisputeRecord> {
        let state = self.state.lock().await;
        let id = state.active.get(&task)?;
        state.disputes.get(id).cloned()
    }

    /// Newest first, like every other listing.
    pub async fn list(&self, filter: DisputeFilter) -> Vec<DisputeRecord> {
        let state = self.state.lock().await;
        let mut disputes: Vec<DisputeRecord> = state
            .disputes
            .values()
            .filter(|d| filter.status.is_none_or(|s| d.status == s))
            .filter(|d| filter.task.is_none_or(|t| d.task == t))
            .filter(|d| {
                filter
                    .initiator
                    .as_deref()
                    .is_none_or(|i| d.initiator == i)
            })
            .cloned()
            .collect();
        disputes.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        disputes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ports::{SystemClock, UlidGenerator};
    use ulid::Ulid;

    fn gate() -> DisputeGate {
        DisputeGate::new(
            Arc::new(SystemClock),
            Arc::new(UlidGenerator::new(SystemClock)),
        )
    }

    fn task_id() -> TaskId {
        TaskId::from_ulid(Ulid::new())
    }

    const REASON: &str = "delivery does not match the task description";

    #[tokio::test]
    async fn open_blocks_release_until_resolved() {
        let gate = gate();
        let task = task_id();

        assert!(!gate.release_blocked(task).await);

        let dispute = gate
            .open(task, "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();
        assert!(gate.release_blocked(task).await);

        gate.resolve(dispute.id, "arb-1".into(), Resolution::PayWorker, None)
            .await
            .unwrap();
        assert!(!gate.release_blocked(task).await);
    }

    #[tokio::test]
    async fn one_active_dispute_per_task() {
        let gate = gate();
        let task = task_id();

        let first = gate
            .open(task, "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();

        let err = gate
            .open(task, "agent-w".into(), "agent-req".into(), REASON.into())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Conflict(_)));

        // after resolution a fresh dispute may open
        gate.resolve(first.id, "arb-1".into(), Resolution::Split, None)
            .await
            .unwrap();
        gate.open(task, "agent-w".into(), "agent-req".into(), REASON.into())
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn open_validates_reason_and_parties() {
        let gate = gate();

        let err = gate
            .open(task_id(), "a".into(), "b".into(), "too short".into())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));

        let err = gate
            .open(task_id(), "a".into(), "a".into(), REASON.into())
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Validation(_)));
    }

    #[tokio::test]
    async fn evidence_is_party_gated_and_stops_at_resolution() {
        let gate = gate();
        let dispute = gate
            .open(task_id(), "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();

        let err = gate
            .submit_evidence(
                dispute.id,
                "agent-bystander".into(),
                EvidenceKind::Message,
                "me too".into(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Forbidden(_)));

        let record = gate
            .submit_evidence(
                dispute.id,
                "agent-w".into(),
                EvidenceKind::Delivery,
                "ipfs://proof".into(),
            )
            .await
            .unwrap();
        assert_eq!(record.evidence.len(), 1);

        gate.resolve(dispute.id, "arb-1".into(), Resolution::PayWorker, None)
            .await
            .unwrap();
        let err = gate
            .submit_evidence(
                dispute.id,
                "agent-req".into(),
                EvidenceKind::Message,
                "late".into(),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn resolve_is_terminal() {
        let gate = gate();
        let dispute = gate
            .open(task_id(), "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();

        let resolved = gate
            .resolve(
                dispute.id,
                "arb-1".into(),
                Resolution::RefundRequester,
                Some("delivery missing".into()),
            )
            .await
            .unwrap();
        assert_eq!(resolved.resolution, Some(Resolution::RefundRequester));
        assert!(resolved.resolved_at.is_some());

        let err = gate
            .resolve(dispute.id, "arb-2".into(), Resolution::Split, None)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn begin_review_tracks_the_arbitrator() {
        let gate = gate();
        let dispute = gate
            .open(task_id(), "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();

        let record = gate.begin_review(dispute.id, "arb-1".into()).await.unwrap();
        assert_eq!(record.status, DisputeStatus::UnderReview);
        assert_eq!(record.arbitrator.as_deref(), Some("arb-1"));

        // still blocks release while under review
        assert!(gate.release_blocked(dispute.task).await);

        // review can only start once
        let err = gate.begin_review(dispute.id, "arb-2".into()).await.unwrap_err();
        assert!(matches!(err, EngineError::InvalidState(_)));
    }

    #[tokio::test]
    async fn discard_removes_only_pristine_open_records() {
        let gate = gate();
        let task = task_id();
        let dispute = gate
            .open(task, "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();

        gate.discard(dispute.id).await;
        assert!(matches!(
            gate.get(dispute.id).await,
            Err(EngineError::DisputeNotFound(_))
        ));
        assert!(!gate.release_blocked(task).await);

        // with evidence on file the record is history and stays
        let dispute = gate
            .open(task, "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();
        gate.submit_evidence(
            dispute.id,
            "agent-req".into(),
            EvidenceKind::Message,
            "chat log".into(),
        )
        .await
        .unwrap();
        gate.discard(dispute.id).await;
        assert!(gate.get(dispute.id).await.is_ok());
    }

    #[tokio::test]
    async fn list_filters_and_orders() {
        let gate = gate();
        let task_a = task_id();
        let task_b = task_id();

        let a = gate
            .open(task_a, "agent-req".into(), "agent-w".into(), REASON.into())
            .await
            .unwrap();
        let b = gate
            .open(task_b, "agent-w".into(), "agent-req".into(), REASON.into())
            .await
            .unwrap();
        gate.resolve(a.id, "arb-1".into(), Resolution::Split, None)
            .await
            .unwrap();

        let all = gate.list(DisputeFilter::default()).await;
        assert_eq!(all.len(), 2);

        let open = gate
            .list(DisputeFilter {
                status: Some(DisputeStatus::Open),
                ..Default::default()
            })
            .await;
        assert_eq!(open.len(), 1);
        assert_eq!(open[0].id, b.id);

        let for_task = gate
            .list(DisputeFilter {
                task: Some(task_a),
                ..Default::default()
            })
            .await;
        assert_eq!(for_task.len(), 1);
        assert_eq!(for_task[0].id, a.id);

        let by_initiator = gate
            .list(DisputeFilter {
                initiator: Some("agent-w".into()),
                ..Default::default()
            })
            .await;
        assert_eq!(by_initiator.len(), 1);
        assert_eq!(by_initiator[0].id, b.id);
    }
}
