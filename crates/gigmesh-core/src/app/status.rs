//! Serializable status views for API surfaces.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{LedgerState, TaskId, TaskRecord, TaskStatus};
use crate::escrow::EscrowConfig;

/// Escrow position of one task: what is held, what was paid, and whether a
/// timer is expected to fire.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscrowStatus {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// The budget is still logically locked.
    pub held: bool,
    pub amount: Option<f64>,
    pub release_scheduled: bool,
    pub released_at: Option<DateTime<Utc>>,
    pub payment_ref: Option<String>,
    pub ledger_state: LedgerState,
}

impl EscrowStatus {
    pub(crate) fn derive(record: &TaskRecord, config: &EscrowConfig) -> Self {
        let held = !record.payment_released
            && !matches!(record.status, TaskStatus::Cancelled | TaskStatus::Expired);
        Self {
            task_id: record.id,
            status: record.status,
            held,
            amount: record.accepted_amount(),
            release_scheduled: record.status == TaskStatus::Verified
                && !record.payment_released
                && config.enabled,
            released_at: record.payment_released_at,
            payment_ref: record.payment_ref.clone(),
            ledger_state: record.ledger_state,
        }
    }
}
