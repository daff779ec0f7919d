//! Webhook dispatcher: at-least-once fan-out with retry and backoff.
//!
//! Design:
//! - One fan-out loop expands each published event into delivery jobs (one
//!   per matching active subscription) with the body rendered and signed up
//!   front, so every retry ships byte-identical content.
//! - A fixed pool of delivery workers drains the job queue; pool size, not
//!   queue size, bounds concurrent outbound connections.
//! - The delivery log is append-only bookkeeping; it shares no lock with
//!   the task store.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use serde_json::json;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::registry::{SubscriptionRecord, WebhookRegistry};
use super::retry::RetryPolicy;
use super::signer;
use crate::domain::{DeliveryId, EngineError, LifecycleEvent, SubscriptionId};
use crate::ports::{Clock, EventSink, IdGenerator, WebhookRequest, WebhookTransport};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryStatus {
    Pending,
    Success,
    Failed,
}

/// Append-only audit record: one per fan-out, updated across retries.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryRecord {
    pub id: DeliveryId,
    pub subscription: SubscriptionId,
    pub event: String,
    pub url: String,
    pub attempts: u32,
    pub status: DeliveryStatus,
    pub last_http_status: Option<u16>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Delivery worker pool size; bounds concurrent outbound requests.
    pub workers: usize,
    pub retry: RetryPolicy,
    /// Per-attempt network timeout, applied by the transport.
    pub request_timeout: std::time::Duration,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            retry: RetryPolicy::default(),
            request_timeout: std::time::Duration::from_secs(5),
        }
    }
}

struct DeliveryJob {
    delivery_id: DeliveryId,
    subscription: SubscriptionId,
    request: WebhookRequest,
}

pub struct WebhookDispatcher {
    registry: Arc<WebhookRegistry>,
    transport: Arc<dyn WebhookTransport>,
    ids: Arc<dyn IdGenerator>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
    log: Mutex<HashMap<DeliveryId, DeliveryRecord>>,
    events_tx: mpsc::UnboundedSender<LifecycleEvent>,
    jobs_tx: mpsc::UnboundedSender<DeliveryJob>,
}

impl WebhookDispatcher {
    /// Build the dispatcher and start its fan-out loop plus the delivery
    /// worker pool. Everything stops when `shutdown` flips to true.
    pub fn spawn(
        registry: Arc<WebhookRegistry>,
        transport: Arc<dyn WebhookTransport>,
        ids: Arc<dyn IdGenerator>,
        clock: Arc<dyn Clock>,
        config: DispatcherConfig,
        shutdown: watch::Receiver<bool>,
    ) -> (Arc<Self>, Vec<JoinHandle<()>>) {
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let (jobs_tx, jobs_rx) = mpsc::unbounded_channel();

        let dispatcher = Arc::new(Self {
            registry,
            transport,
            ids,
            clock,
            retry: config.retry.clone(),
            log: Mutex::new(HashMap::new()),
            events_tx,
            jobs_tx,
        });

        let mut joins = Vec::with_capacity(config.workers + 1);

        let fanout = Arc::clone(&dispatcher);
        let mut fanout_shutdown = shutdown.clone();
        joins.push(tokio::spawn(async move {
            fanout.fanout_loop(events_rx, &mut fanout_shutdown).await;
        }));

        let jobs_rx = Arc::new(tokio::sync::Mutex::new(jobs_rx));
        for worker_id in 0..config.workers {
            let worker = Arc::clone(&dispatcher);
            let rx = Arc::clone(&jobs_rx);
            let mut rx_shutdown = shutdown.clone();
            joins.push(tokio::spawn(async move {
                worker.worker_loop(worker_id, rx, &mut rx_shutdown).await;
            }));
        }

        (dispatcher, joins)
    }

    /// Push one synthetic delivery through the full pipeline to a single
    /// subscription, regardless of its event set or active flag. Lets an
    /// owner verify an endpoint before (re)activating it.
    pub async fn send_test(&self, id: SubscriptionId) -> Result<DeliveryId, EngineError> {
        let record = self.registry.get(id).await?;
        let event = LifecycleEvent::WebhookTest {
            subscription_id: id,
        };
        let job = self.render_job(&event, &record);
        let delivery_id = job.delivery_id;
        // ignore send error: only fails when the engine is shutting down
        let _ = self.jobs_tx.send(job);
        Ok(delivery_id)
    }

    /// Delivery log for one subscription, newest first.
    pub fn deliveries(&self, subscription: SubscriptionId) -> Vec<DeliveryRecord> {
        let log = self.log.lock().expect("delivery log poisoned");
        let mut records: Vec<DeliveryRecord> = log
            .values()
            .filter(|r| r.subscription == subscription)
            .cloned()
            .collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        records
    }

    /// Render body + signature once; retries ship the same bytes.
    fn render_job(&self, event: &LifecycleEvent, sub: &SubscriptionRecord) -> DeliveryJob {
        let delivery_id = self.ids.delivery_id();
        let now = self.clock.now();
        let body = json!({
            "event": event.name(),
            "timestamp": now.timestamp_millis(),
            "deliveryId": delivery_id.to_string(),
            "payload": event.payload(),
        });
        let body = serde_json::to_vec(&body).unwrap_or_default();
        let signature = signer::sign(&sub.secret, &body);

        let record = DeliveryRecord {
            id: delivery_id,
            subscription: sub.id,
            event: event.name().to_string(),
            url: sub.url.clone(),
            attempts: 0,
            status: DeliveryStatus::Pending,
            last_http_status: None,
            created_at: now,
            updated_at: now,
        };
        self.log
            .lock()
            .expect("delivery log poisoned")
            .insert(delivery_id, record);

        DeliveryJob {
            delivery_id,
            subscription: sub.id,
            request: WebhookRequest {
                url: sub.url.clone(),
                event: event.name().to_string(),
                delivery_id,
                signature,
                body,
            },
        }
    }

    async fn fanout_loop(
        &self,
        mut events_rx: mpsc::UnboundedReceiver<LifecycleEvent>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            let event = tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    continue;
                }
                event = events_rx.recv() => event,
            };
            let Some(event) = event else {
                break;
            };

            for sub in self.registry.matching(event.name()).await {
                let job = self.render_job(&event, &sub);
                let _ = self.jobs_tx.send(job);
            }
        }
    }

    async fn worker_loop(
        &self,
        worker_id: usize,
        jobs_rx: Arc<tokio::sync::Mutex<mpsc::UnboundedReceiver<DeliveryJob>>>,
        shutdown: &mut watch::Receiver<bool>,
    ) {
        loop {
            if *shutdown.borrow() {
                break;
            }
            // ワーカー間で共有する受信側は短くロックする
            let job = {
                let mut rx = jobs_rx.lock().await;
                tokio::select! {
                    changed = shutdown.changed() => {
                        if changed.is_err() {
                            break;
                        }
                        continue;
                    }
                    job = rx.recv() => job,
                }
            };
            let Some(job) = job else {
                break;
            };

            debug!(
                worker_id,
                delivery = %job.delivery_id,
                url = %job.request.url,
                "webhook delivery picked up"
            );
            self.process(job).await;
        }
    }

    /// One delivery: up to `max_attempts` tries with backoff in between,
    /// then final success/failure accounting on the subscription.
    async fn process(&self, job: DeliveryJob) {
        let max_attempts = self.retry.max_attempts;

        for attempt in 1..=max_attempts {
            let outcome = self.transport.deliver(&job.request).await;

            let (http_status, ok) = match outcome {
                Ok(status) => (Some(status), (200..300).contains(&status)),
                Err(ref e) => {
                    debug!(
                        delivery = %job.delivery_id,
                        url = %job.request.url,
                        attempt,
                        error = %e,
                        "webhook endpoint unreachable"
                    );
                    (None, false)
                }
            };

            self.update_record(job.delivery_id, attempt, http_status, ok, attempt == max_attempts);

            if ok {
                self.registry.record_success(job.subscription).await;
                return;
            }

            warn!(
                delivery = %job.delivery_id,
                url = %job.request.url,
                attempt,
                max_attempts,
                status = http_status.unwrap_or(0),
                "webhook delivery attempt failed"
            );

            if attempt < max_attempts {
                tokio::time::sleep(self.retry.next_delay(attempt)).await;
            }
        }

        self.registry.record_failure(job.subscription).await;
    }

    fn update_record(
        &self,
        id: DeliveryId,
        attempts: u32,
        http_status: Option<u16>,
        ok: bool,
        last: bool,
    ) {
        let mut log = self.log.lock().expect("delivery log poisoned");
        if let Some(record) = log.get_mut(&id) {
            record.attempts = attempts;
            record.last_http_status = http_status;
            record.status = if ok {
                DeliveryStatus::Success
            } else if last {
                DeliveryStatus::Failed
            } else {
                DeliveryStatus::Pending
            };
            record.updated_at = self.clock.now();
        }
    }
}

/// Publishing is enqueue-and-return; the caller never blocks on delivery
/// and never sees its outcome.
impl EventSink for WebhookDispatcher {
    fn publish(&self, event: LifecycleEvent) {
        // ignore send error: only fails when the engine is shutting down
        let _ = self.events_tx.send(event);
    }
}
