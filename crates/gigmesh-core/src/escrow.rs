//! Escrow release scheduler.
//!
//! Converts a "task verified" event into a delayed, idempotent payment
//! action. The delay is the dispute window; zero means immediate.
//!
//! Design:
//! - Due releases sit in a min-heap keyed by `run_at`; one background loop
//!   pops what is due and sleeps until the next entry or a `Notify` wake.
//! - The heap entry is a reminder, not a command: the action re-reads task
//!   and dispute state at execution time and proceeds only if everything
//!   still holds. Anything else is a silent, logged skip; the manual or
//!   maintenance path is the only way to resume.
//! - The payment flip itself is the store's check-and-set, so a fired timer
//!   and a concurrent manual trigger can never both pay.

use std::collections::BinaryHeap;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{Notify, watch};
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::domain::{
    EngineError, LedgerState, LifecycleEvent, TaskId, TaskRecord, TaskStatus,
};
use crate::gate::DisputeGate;
use crate::ports::{EventBus, SettlementLedger};
use crate::store::{ReleaseKind, TaskStore};

/// Auto-release configuration. Runtime-mutable.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscrowConfig {
    pub enabled: bool,
    /// Dispute window before an auto-release fires. 0 = immediate.
    pub delay_ms: u64,
    pub min_amount: f64,
    pub max_amount: f64,
}

impl Default for EscrowConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay_ms: 0,
            min_amount: 0.1,
            max_amount: 10_000.0,
        }
    }
}

/// Partial config update; unset fields keep their current value.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EscrowConfigUpdate {
    pub enabled: Option<bool>,
    pub delay_ms: Option<u64>,
    pub min_amount: Option<f64>,
    pub max_amount: Option<f64>,
}

/// Heap entry. Reverse ordering so `BinaryHeap` acts as a min-heap
/// (earliest `run_at` first).
#[derive(Debug, Clone, PartialEq, Eq)]
struct ScheduledRelease {
    run_at: Instant,
    task: TaskId,
}

impl PartialOrd for ScheduledRelease {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledRelease {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        other.run_at.cmp(&self.run_at)
    }
}

enum Wait {
    Due(TaskId),
    Until(Instant),
    Idle,
}

pub struct EscrowScheduler {
    store: Arc<dyn TaskStore>,
    gate: Arc<DisputeGate>,
    ledger: Option<Arc<dyn SettlementLedger>>,
    bus: Arc<EventBus>,
    config: RwLock<EscrowConfig>,
    queue: Mutex<BinaryHeap<ScheduledRelease>>,
    notify: Notify,
}

impl EscrowScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        gate: Arc<DisputeGate>,
        ledger: Option<Arc<dyn SettlementLedger>>,
        bus: Arc<EventBus>,
        config: EscrowConfig,
    ) -> Self {
        Self {
            store,
            gate,
            ledger,
            bus,
            config: RwLock::new(config),
            queue: Mutex::new(BinaryHeap::new()),
            notify: Notify::new(),
        }
    }

    pub fn config(&self) -> EscrowConfig {
        self.config.read().expect("escrow config poisoned").clone()
    }

    pub fn update_config(&self, update: EscrowConfigUpdate) -> EscrowConfig {
        let mut config = self.config.write().expect("escrow config poisoned");
        if let Some(enabled) = update.enabled {
            config.enabled = enabled;
        }
        if let Some(delay_ms) = update.delay_ms {
            config.delay_ms = delay_ms;
        }
        if let Some(min_amount) = update.min_amount {
            config.min_amount = min_amount;
        }
        if let Some(max_amount) = update.max_amount {
            config.max_amount = max_amount;
        }
        info!(?config, "escrow config updated");
        config.clone()
    }

    /// Register a release for a freshly verified task.
    ///
    /// Bounds are pre-checked here to save a pointless timer; the binding
    /// check happens again at execution time.
    pub fn schedule(&self, task: &TaskRecord) {
        let config = self.config();
        if !config.enabled {
            info!(task_id = %task.id, "auto-escrow disabled, not scheduling release");
            return;
        }

        let Some(amount) = task.accepted_amount() else {
            warn!(task_id = %task.id, "no accepted bid, not scheduling release");
            return;
        };
        if amount < config.min_amount || amount > config.max_amount {
            warn!(
                task_id = %task.id,
                amount,
                min = config.min_amount,
                max = config.max_amount,
                "escrow amount outside auto-release bounds"
            );
            return;
        }

        let run_at = Instant::now() + Duration::from_millis(config.delay_ms);
        info!(
            task_id = %task.id,
            worker = task.assigned_worker.as_deref().unwrap_or(""),
            amount,
            delay_ms = config.delay_ms,
            "scheduling escrow release"
        );

        self.queue
            .lock()
            .expect("escrow queue poisoned")
            .push(ScheduledRelease {
                run_at,
                task: task.id,
            });
        self.notify.notify_one();
    }

    /// Arbitrator/admin release: same one-shot guard, no delay, no status
    /// or bounds gate.
    pub async fn manual_release(
        &self,
        task: TaskId,
        arbitrator: &str,
        reason: &str,
    ) -> Result<TaskRecord, EngineError> {
        let record = self.store.settle_payment(task, ReleaseKind::Manual).await?;
        info!(
            task_id = %task,
            arbitrator,
            reason,
            amount = record.accepted_amount().unwrap_or(0.0),
            "escrow manually released"
        );
        Ok(self.finish_release(record, false).await)
    }

    /// Maintenance/startup path: schedule every verified, unreleased,
    /// undisputed task. Safe to call repeatedly; a double-fired entry
    /// loses the check-and-set.
    pub async fn reschedule_pending(&self) -> usize {
        let verified = self.store.list_by_status(TaskStatus::Verified).await;
        let mut scheduled = 0;
        for task in verified {
            if task.payment_released || self.gate.release_blocked(task.id).await {
                continue;
            }
            self.schedule(&task);
            scheduled += 1;
        }
        if scheduled > 0 {
            info!(scheduled, "rescheduled pending escrow releases");
        }
        scheduled
    }

    /// Release loop. Runs until shutdown; ticks are driven by the heap and
    /// `Notify`, not a fixed interval.
    pub(crate) async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        loop {
            if *shutdown.borrow() {
                break;
            }

            let wait = {
                let mut queue = self.queue.lock().expect("escrow queue poisoned");
                match queue.peek() {
                    Some(entry) if entry.run_at <= Instant::now() => {
                        let entry = queue.pop().expect("peeked entry vanished");
                        Wait::Due(entry.task)
                    }
                    Some(entry) => Wait::Until(entry.run_at),
                    None => Wait::Idle,
                }
            };

            match wait {
                Wait::Due(task) => self.execute_release(task).await,
                Wait::Until(run_at) => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            // sender gone means the engine is gone
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = tokio::time::sleep_until(run_at) => {}
                    }
                }
                Wait::Idle => {
                    tokio::select! {
                        changed = shutdown.changed() => {
                            if changed.is_err() {
                                break;
                            }
                        }
                        _ = self.notify.notified() => {}
                    }
                }
            }
        }
    }

    /// The release action. Re-reads everything; skips are silent (logged,
    /// never retried).
    async fn execute_release(&self, task: TaskId) {
        // Dispute state is consulted at execution time, not capture time: a
        // dispute opened after scheduling must win.
        if self.gate.release_blocked(task).await {
            info!(task_id = %task, "escrow release blocked, active dispute");
            return;
        }

        let config = self.config();
        if !config.enabled {
            info!(task_id = %task, "auto-escrow disabled, skipping release");
            return;
        }

        let result = self
            .store
            .settle_payment(
                task,
                ReleaseKind::Auto {
                    min_amount: config.min_amount,
                    max_amount: config.max_amount,
                },
            )
            .await;

        match result {
            Ok(record) => {
                info!(
                    task_id = %task,
                    worker = record.assigned_worker.as_deref().unwrap_or(""),
                    amount = record.accepted_amount().unwrap_or(0.0),
                    payment_ref = record.payment_ref.as_deref().unwrap_or(""),
                    "escrow auto-released"
                );
                self.finish_release(record, true).await;
            }
            Err(EngineError::TaskNotFound(_)) => {
                error!(task_id = %task, "task vanished before escrow release");
            }
            Err(e) => {
                info!(task_id = %task, reason = %e, "escrow release skipped");
            }
        }
    }

    /// Write-behind ledger release plus the `payment.released` event.
    /// Ledger failures degrade the task, they never undo the settlement.
    async fn finish_release(&self, record: TaskRecord, auto: bool) -> TaskRecord {
        if let Some(ledger) = &self.ledger {
            match record.escrow_ref.as_deref() {
                Some(reference) => match ledger.release_escrow_entry(reference).await {
                    Ok(confirmation) => {
                        info!(task_id = %record.id, confirmation = %confirmation, "ledger escrow entry released");
                        let _ = self
                            .store
                            .update_ledger(record.id, LedgerState::Released, None)
                            .await;
                    }
                    Err(e) => {
                        error!(
                            task_id = %record.id,
                            error = %e,
                            "ledger release failed; task is settled locally, needs operator attention"
                        );
                        let _ = self
                            .store
                            .update_ledger(record.id, LedgerState::Failed, None)
                            .await;
                    }
                },
                None => {
                    warn!(
                        task_id = %record.id,
                        "no ledger escrow entry on file, payment settled locally only"
                    );
                }
            }
        }

        self.bus.publish(LifecycleEvent::PaymentReleased {
            task_id: record.id,
            worker: record.assigned_worker.clone().unwrap_or_default(),
            amount: record.accepted_amount().unwrap_or(0.0),
            payment_ref: record.payment_ref.clone().unwrap_or_default(),
            auto,
        });

        record
    }
}
