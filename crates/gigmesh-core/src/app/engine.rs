//! Engine: wiring and the public operation surface.
//!
//! `EngineBuilder` assembles the store, dispute gate, webhook machinery,
//! escrow scheduler and sweeper, starts every background loop, and hands
//! back an `Engine` whose methods are the external interface. One watch
//! channel stops all loops; `shutdown_and_join` waits them out.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::warn;

use super::status::EscrowStatus;
use crate::domain::{
    Bid, BidDraft, BidId, CancelReason, DeliveryId, DisputeId, DisputeRecord, EngineError,
    EvidenceKind, LedgerState, LifecycleEvent, Resolution, SubscriptionId, TaskDraft, TaskId,
    TaskRecord,
};
use crate::escrow::{EscrowConfig, EscrowConfigUpdate, EscrowScheduler};
use crate::gate::{DisputeFilter, DisputeGate};
use crate::ports::{
    Clock, EventBus, EventSink, FixedReputation, HttpTransport, IdGenerator, ReputationOracle,
    SettlementLedger, SystemClock, TransportError, UlidGenerator, WebhookTransport,
};
use crate::store::{InMemoryTaskStore, StoreCounts, TaskStore};
use crate::sweeper::{ExpirySweeper, SweeperConfig};
use crate::webhook::{
    DEFAULT_FAILURE_THRESHOLD, DeliveryRecord, DispatcherConfig, RegisteredWebhook,
    RegistrationReceipt, WebhookDispatcher, WebhookRegistry,
};

#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub escrow: EscrowConfig,
    pub sweeper: SweeperConfig,
    pub webhooks: DispatcherConfig,
    /// Consecutive final delivery failures before a subscription is
    /// switched off.
    pub failure_threshold: u32,
    /// Bid admission floor; `None` admits everyone.
    pub min_bid_reputation: Option<f64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            escrow: EscrowConfig::default(),
            sweeper: SweeperConfig::default(),
            webhooks: DispatcherConfig::default(),
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            min_bid_reputation: None,
        }
    }
}

#[derive(Debug, Error)]
pub enum BuildError {
    #[error("webhook transport init failed: {0}")]
    Transport(#[from] TransportError),
}

#[derive(Default)]
pub struct EngineBuilder {
    config: EngineConfig,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    store: Option<Arc<dyn TaskStore>>,
    ledger: Option<Arc<dyn SettlementLedger>>,
    reputation: Option<Arc<dyn ReputationOracle>>,
    transport: Option<Arc<dyn WebhookTransport>>,
    extra_sinks: Vec<Arc<dyn EventSink>>,
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn ids(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    pub fn store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Optional settlement ledger; without one the engine settles locally.
    pub fn ledger(mut self, ledger: Arc<dyn SettlementLedger>) -> Self {
        self.ledger = Some(ledger);
        self
    }

    pub fn reputation(mut self, oracle: Arc<dyn ReputationOracle>) -> Self {
        self.reputation = Some(oracle);
        self
    }

    pub fn transport(mut self, transport: Arc<dyn WebhookTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Extra event consumer beside the webhook dispatcher.
    pub fn add_sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.extra_sinks.push(sink);
        self
    }

    /// Wire everything and start the background loops.
    pub fn start(self) -> Result<Engine, BuildError> {
        let config = self.config;
        let clock: Arc<dyn Clock> = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let ids: Arc<dyn IdGenerator> = self
            .ids
            .unwrap_or_else(|| Arc::new(UlidGenerator::new(clock.clone())));
        let store: Arc<dyn TaskStore> = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new(clock.clone(), ids.clone())));
        let gate = Arc::new(DisputeGate::new(clock.clone(), ids.clone()));
        let registry = Arc::new(WebhookRegistry::new(
            clock.clone(),
            ids.clone(),
            config.failure_threshold,
        ));
        let reputation: Arc<dyn ReputationOracle> = self
            .reputation
            .unwrap_or_else(|| Arc::new(FixedReputation(0.0)));
        let transport: Arc<dyn WebhookTransport> = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(config.webhooks.request_timeout)?),
        };

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let (dispatcher, mut joins) = WebhookDispatcher::spawn(
            registry.clone(),
            transport,
            ids.clone(),
            clock.clone(),
            config.webhooks.clone(),
            shutdown_rx.clone(),
        );

        let mut sinks: Vec<Arc<dyn EventSink>> = vec![dispatcher.clone()];
        sinks.extend(self.extra_sinks);
        let bus = Arc::new(EventBus::new(sinks));

        let scheduler = Arc::new(EscrowScheduler::new(
            store.clone(),
            gate.clone(),
            self.ledger.clone(),
            bus.clone(),
            config.escrow.clone(),
        ));
        {
            let scheduler = scheduler.clone();
            let shutdown_rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                scheduler.run(shutdown_rx).await;
            }));
        }

        let sweeper = Arc::new(ExpirySweeper::new(
            store.clone(),
            bus.clone(),
            config.sweeper.clone(),
        ));
        {
            let sweeper = sweeper.clone();
            let shutdown_rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                sweeper.run(shutdown_rx).await;
            }));
        }
        {
            let sweeper = sweeper.clone();
            let shutdown_rx = shutdown_rx.clone();
            joins.push(tokio::spawn(async move {
                sweeper.run_retention(shutdown_rx).await;
            }));
        }

        Ok(Engine {
            store,
            gate,
            registry,
            dispatcher,
            scheduler,
            sweeper,
            bus,
            ledger: self.ledger,
            reputation,
            min_bid_reputation: config.min_bid_reputation,
            shutdown_tx,
            joins,
        })
    }
}

pub struct Engine {
    store: Arc<dyn TaskStore>,
    gate: Arc<DisputeGate>,
    registry: Arc<WebhookRegistry>,
    dispatcher: Arc<WebhookDispatcher>,
    scheduler: Arc<EscrowScheduler>,
    sweeper: Arc<ExpirySweeper>,
    bus: Arc<EventBus>,
    ledger: Option<Arc<dyn SettlementLedger>>,
    reputation: Arc<dyn ReputationOracle>,
    min_bid_reputation: Option<f64>,
    shutdown_tx: watch::Sender<bool>,
    joins: Vec<JoinHandle<()>>,
}

impl Engine {
    pub fn builder() -> EngineBuilder {
        EngineBuilder::new()
    }

    /// Stop every background loop and wait for them.
    pub async fn shutdown_and_join(self) {
        // ignore send error: receivers may already be dropped
        let _ = self.shutdown_tx.send(true);
        for join in self.joins {
            let _ = join.await;
        }
    }

    // ---- task lifecycle ----------------------------------------------

    pub async fn create_task(&self, draft: TaskDraft) -> Result<TaskRecord, EngineError> {
        let record = self.store.create_task(draft).await?;
        self.bus.publish(LifecycleEvent::TaskCreated {
            task_id: record.id,
            requester: record.requester.clone(),
            budget: record.budget,
        });
        Ok(record)
    }

    pub async fn list_open_tasks(&self) -> Vec<TaskRecord> {
        self.store.list_open().await
    }

    pub async fn get_task(&self, task: TaskId) -> Result<TaskRecord, EngineError> {
        self.store.get_task(task).await
    }

    pub async fn place_bid(&self, task: TaskId, draft: BidDraft) -> Result<Bid, EngineError> {
        if let Some(floor) = self.min_bid_reputation {
            let score = self.reputation.reputation(&draft.bidder).await;
            if score < floor {
                return Err(EngineError::Forbidden(format!(
                    "reputation {score} below bidding floor {floor}"
                )));
            }
        }

        let bidder = draft.bidder.clone();
        let bid = self.store.place_bid(task, draft).await?;
        self.bus.publish(LifecycleEvent::BidPlaced {
            task_id: task,
            bid_id: bid.id,
            bidder,
            amount: bid.amount,
        });
        Ok(bid)
    }

    pub async fn accept_bid(&self, task: TaskId, bid: BidId) -> Result<TaskRecord, EngineError> {
        let mut record = self.store.accept_bid(task, bid).await?;

        // Write-behind escrow lock on the ledger. Failure degrades, never
        // aborts: the assignment above is already committed.
        if let Some(ledger) = &self.ledger {
            let amount = record.accepted_amount().unwrap_or(0.0);
            match ledger
                .create_escrow_entry(task, amount, &record.requester)
                .await
            {
                Ok(reference) => {
                    self.store
                        .update_ledger(task, LedgerState::Held, Some(reference))
                        .await?;
                }
                Err(e) => {
                    warn!(task_id = %task, error = %e, "ledger escrow entry failed, continuing locally");
                    self.store
                        .update_ledger(task, LedgerState::Failed, None)
                        .await?;
                }
            }
            record = self.store.get_task(task).await?;
        }

        self.bus.publish(LifecycleEvent::TaskAssigned {
            task_id: task,
            bid_id: bid,
            worker: record.assigned_worker.clone().unwrap_or_default(),
            amount: record.accepted_amount().unwrap_or(0.0),
        });
        Ok(record)
    }

    pub async fn complete_task(
        &self,
        task: TaskId,
        worker: &str,
        delivery: Option<String>,
    ) -> Result<TaskRecord, EngineError> {
        let record = self.store.complete_task(task, worker, delivery).await?;
        self.bus.publish(LifecycleEvent::TaskCompleted {
            task_id: task,
            worker: worker.to_string(),
            delivery: record.delivery.clone(),
        });
        Ok(record)
    }

    /// Verification is the trigger: the release timer starts here.
    pub async fn verify_task(&self, task: TaskId) -> Result<TaskRecord, EngineError> {
        let record = self.store.verify_task(task).await?;
        self.bus
            .publish(LifecycleEvent::TaskVerified { task_id: task });
        self.scheduler.schedule(&record);
        Ok(record)
    }

    pub async fn cancel_task(
        &self,
        task: TaskId,
        requester: &str,
    ) -> Result<TaskRecord, EngineError> {
        let record = self.store.cancel_task(task, requester).await?;
        self.bus.publish(LifecycleEvent::TaskCancelled {
            task_id: task,
            reason: CancelReason::RequesterCancelled,
            requester: requester.to_string(),
        });
        Ok(record)
    }

    // ---- disputes ----------------------------------------------------

    pub async fn open_dispute(
        &self,
        task: TaskId,
        initiator: String,
        respondent: String,
        reason: String,
    ) -> Result<DisputeRecord, EngineError> {
        let record = self.store.get_task(task).await?;
        let is_party = |id: &str| {
            record.requester == id || record.assigned_worker.as_deref() == Some(id)
        };
        if !is_party(&initiator) {
            return Err(EngineError::Forbidden(format!(
                "{initiator} is not a counterparty of task {task}"
            )));
        }
        if !is_party(&respondent) {
            return Err(EngineError::Validation(format!(
                "{respondent} is not a counterparty of task {task}"
            )));
        }

        let dispute = self
            .gate
            .open(task, initiator.clone(), respondent, reason)
            .await?;

        // The task-side mark re-validates under the store lock; if payment
        // slipped through first, roll the gate record back.
        if let Err(e) = self.store.mark_disputed(task, dispute.id).await {
            self.gate.discard(dispute.id).await;
            return Err(e);
        }

        self.bus.publish(LifecycleEvent::DisputeOpened {
            task_id: task,
            dispute_id: dispute.id,
            initiator,
        });
        Ok(dispute)
    }

    pub async fn submit_evidence(
        &self,
        dispute: DisputeId,
        party: String,
        kind: EvidenceKind,
        content: String,
    ) -> Result<DisputeRecord, EngineError> {
        self.gate.submit_evidence(dispute, party, kind, content).await
    }

    pub async fn review_dispute(
        &self,
        dispute: DisputeId,
        arbitrator: String,
    ) -> Result<DisputeRecord, EngineError> {
        self.gate.begin_review(dispute, arbitrator).await
    }

    pub async fn resolve_dispute(
        &self,
        dispute: DisputeId,
        arbitrator: String,
        outcome: Resolution,
        reason: Option<String>,
    ) -> Result<DisputeRecord, EngineError> {
        let resolved = self
            .gate
            .resolve(dispute, arbitrator.clone(), outcome, reason)
            .await?;

        if let Err(e) = self
            .store
            .resolve_dispute_status(resolved.task, outcome)
            .await
        {
            warn!(
                dispute_id = %dispute,
                task_id = %resolved.task,
                error = %e,
                "dispute resolved but task status did not follow"
            );
        }

        self.bus.publish(LifecycleEvent::DisputeResolved {
            task_id: resolved.task,
            dispute_id: dispute,
            outcome,
        });

        if outcome == Resolution::PayWorker
            && let Err(e) = self
                .scheduler
                .manual_release(resolved.task, &arbitrator, "dispute resolved for the worker")
                .await
        {
            warn!(
                task_id = %resolved.task,
                error = %e,
                "release after pay-worker ruling did not fire"
            );
        }

        Ok(resolved)
    }

    pub async fn get_dispute(&self, dispute: DisputeId) -> Result<DisputeRecord, EngineError> {
        self.gate.get(dispute).await
    }

    pub async fn list_disputes(&self, filter: DisputeFilter) -> Vec<DisputeRecord> {
        self.gate.list(filter).await
    }

    // ---- webhooks ----------------------------------------------------

    pub async fn register_webhook(
        &self,
        owner: String,
        url: String,
        events: Vec<String>,
    ) -> Result<RegistrationReceipt, EngineError> {
        self.registry.register(owner, url, events).await
    }

    pub async fn test_webhook(
        &self,
        subscription: SubscriptionId,
    ) -> Result<DeliveryId, EngineError> {
        self.dispatcher.send_test(subscription).await
    }

    pub async fn list_webhooks(&self, owner: &str) -> Vec<RegisteredWebhook> {
        self.registry.list(owner).await
    }

    pub async fn delete_webhook(
        &self,
        owner: &str,
        subscription: SubscriptionId,
    ) -> Result<(), EngineError> {
        self.registry.delete(owner, subscription).await
    }

    pub async fn set_webhook_active(
        &self,
        owner: &str,
        subscription: SubscriptionId,
        active: bool,
    ) -> Result<RegisteredWebhook, EngineError> {
        self.registry.set_active(owner, subscription, active).await
    }

    pub fn list_deliveries(&self, subscription: SubscriptionId) -> Vec<DeliveryRecord> {
        self.dispatcher.deliveries(subscription)
    }

    // ---- escrow ------------------------------------------------------

    pub async fn escrow_status(&self, task: TaskId) -> Result<EscrowStatus, EngineError> {
        let record = self.store.get_task(task).await?;
        Ok(EscrowStatus::derive(&record, &self.scheduler.config()))
    }

    pub async fn manual_release(
        &self,
        task: TaskId,
        arbitrator: &str,
        reason: &str,
    ) -> Result<TaskRecord, EngineError> {
        self.scheduler.manual_release(task, arbitrator, reason).await
    }

    pub fn escrow_config(&self) -> EscrowConfig {
        self.scheduler.config()
    }

    pub fn update_escrow_config(&self, update: EscrowConfigUpdate) -> EscrowConfig {
        self.scheduler.update_config(update)
    }

    /// Maintenance path: re-arm releases for verified, unreleased,
    /// undisputed tasks (startup recovery, operator re-trigger).
    pub async fn reschedule_pending_releases(&self) -> usize {
        self.scheduler.reschedule_pending().await
    }

    // ---- maintenance / observability ---------------------------------

    /// Force one sweep pass outside the interval.
    pub async fn sweep_now(&self) -> usize {
        self.sweeper.sweep_once().await
    }

    pub async fn counts(&self) -> StoreCounts {
        self.store.counts().await
    }
}
