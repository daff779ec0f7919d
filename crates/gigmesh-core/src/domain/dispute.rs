//! Dispute records: a formal disagreement that freezes escrow release.
//!
//! Records are append-only from the outside world's point of view: a dispute
//! is created, collects evidence, and is resolved exactly once. Resolved
//! disputes are kept forever as an audit trail.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::ids::{DisputeId, TaskId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisputeStatus {
    Open,
    UnderReview,
    Resolved,
}

/// Arbitrator ruling. `Split` is recorded only; partial payment is the
/// settlement ledger's business, not the engine's.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    RefundRequester,
    PayWorker,
    Split,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    Message,
    Delivery,
    Screenshot,
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Evidence {
    pub party: String,
    pub kind: EvidenceKind,
    pub content: String,
    pub submitted_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisputeRecord {
    pub id: DisputeId,
    pub task: TaskId,
    pub initiator: String,
    pub respondent: String,
    pub reason: String,
    pub status: DisputeStatus,
    pub resolution: Option<Resolution>,
    pub arbitrator: Option<String>,
    pub resolution_reason: Option<String>,
    pub evidence: Vec<Evidence>,
    pub created_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

impl DisputeRecord {
    pub fn new(
        id: DisputeId,
        task: TaskId,
        initiator: String,
        respondent: String,
        reason: String,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            task,
            initiator,
            respondent,
            reason,
            status: DisputeStatus::Open,
            resolution: None,
            arbitrator: None,
            resolution_reason: None,
            evidence: Vec::new(),
            created_at: now,
            resolved_at: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.status == DisputeStatus::Resolved
    }

    /// Is this party one of the two counterparties?
    pub fn involves(&self, party: &str) -> bool {
        self.initiator == party || self.respondent == party
    }

    pub fn add_evidence(
        &mut self,
        party: String,
        kind: EvidenceKind,
        content: String,
        now: DateTime<Utc>,
    ) {
        self.evidence.push(Evidence {
            party,
            kind,
            content,
            submitted_at: now,
        });
    }

    pub fn begin_review(&mut self, arbitrator: String) {
        self.status = DisputeStatus::UnderReview;
        self.arbitrator = Some(arbitrator);
    }

    /// Terminal transition: a resolved dispute never reopens.
    pub fn resolve(
        &mut self,
        arbitrator: String,
        outcome: Resolution,
        reason: Option<String>,
        now: DateTime<Utc>,
    ) {
        self.status = DisputeStatus::Resolved;
        self.resolution = Some(outcome);
        self.arbitrator = Some(arbitrator);
        self.resolution_reason = reason;
        self.resolved_at = Some(now);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    fn dispute() -> DisputeRecord {
        DisputeRecord::new(
            DisputeId::from_ulid(Ulid::new()),
            TaskId::from_ulid(Ulid::new()),
            "agent-req".into(),
            "agent-worker".into(),
            "delivery does not match the description".into(),
            Utc::now(),
        )
    }

    #[test]
    fn new_dispute_is_open_and_unresolved() {
        let d = dispute();
        assert_eq!(d.status, DisputeStatus::Open);
        assert!(d.resolution.is_none());
        assert!(!d.is_resolved());
    }

    #[test]
    fn involves_matches_both_counterparties_only() {
        let d = dispute();
        assert!(d.involves("agent-req"));
        assert!(d.involves("agent-worker"));
        assert!(!d.involves("agent-bystander"));
    }

    #[test]
    fn resolve_is_terminal_and_records_the_ruling() {
        let mut d = dispute();
        d.resolve(
            "arb-1".into(),
            Resolution::PayWorker,
            Some("delivery was adequate".into()),
            Utc::now(),
        );

        assert!(d.is_resolved());
        assert_eq!(d.resolution, Some(Resolution::PayWorker));
        assert_eq!(d.arbitrator.as_deref(), Some("arb-1"));
        assert!(d.resolved_at.is_some());
    }

    #[test]
    fn evidence_appends_in_order() {
        let mut d = dispute();
        let now = Utc::now();
        d.add_evidence("agent-req".into(), EvidenceKind::Screenshot, "s1".into(), now);
        d.add_evidence("agent-worker".into(), EvidenceKind::Delivery, "d1".into(), now);

        assert_eq!(d.evidence.len(), 2);
        assert_eq!(d.evidence[0].content, "s1");
        assert!(matches!(d.evidence[1].kind, EvidenceKind::Delivery));
    }
}
