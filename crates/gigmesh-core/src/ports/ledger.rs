//! SettlementLedger port: the external system of record for fund movement.
//!
//! The engine treats the ledger as a best-effort, write-behind target. Both
//! operations may fail; a failure degrades the task (local settlement,
//! ledger state marked failed and logged as an operational alert) but never
//! aborts the in-store transition.

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::ids::TaskId;

#[derive(Debug, Error)]
#[error("ledger: {0}")]
pub struct LedgerError(pub String);

#[async_trait]
pub trait SettlementLedger: Send + Sync {
    /// Lock the budget for a task on the ledger. Returns an opaque escrow
    /// reference used later for release.
    async fn create_escrow_entry(
        &self,
        task_id: TaskId,
        amount: f64,
        payer: &str,
    ) -> Result<String, LedgerError>;

    /// Release a previously created entry. Returns a confirmation reference
    /// (transaction hash or equivalent).
    async fn release_escrow_entry(&self, reference: &str) -> Result<String, LedgerError>;
}
