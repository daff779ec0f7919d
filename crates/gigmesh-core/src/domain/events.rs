//! Lifecycle events: one tagged variant per event kind.
//!
//! Each variant carries only the fields relevant to that event, so the
//! dispatcher boundary never sees an ambiguous payload shape. The serde
//! representation is `{"event": "<wire name>", "payload": {...}}`, which is
//! exactly the body fragment the webhook dispatcher signs and ships.

use serde::{Deserialize, Serialize};

use super::dispute::Resolution;
use super::ids::{BidId, DisputeId, SubscriptionId, TaskId};
use super::task::CancelReason;

/// Wire names a subscription may register for. `"*"` subscribes to all.
pub const EVENT_NAMES: &[&str] = &[
    "task.created",
    "task.bid",
    "task.assigned",
    "task.completed",
    "task.verified",
    "task.cancelled",
    "dispute.opened",
    "dispute.resolved",
    "payment.released",
];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload")]
pub enum LifecycleEvent {
    #[serde(rename = "task.created")]
    TaskCreated {
        task_id: TaskId,
        requester: String,
        budget: f64,
    },

    #[serde(rename = "task.bid")]
    BidPlaced {
        task_id: TaskId,
        bid_id: BidId,
        bidder: String,
        amount: f64,
    },

    #[serde(rename = "task.assigned")]
    TaskAssigned {
        task_id: TaskId,
        bid_id: BidId,
        worker: String,
        amount: f64,
    },

    #[serde(rename = "task.completed")]
    TaskCompleted {
        task_id: TaskId,
        worker: String,
        delivery: Option<String>,
    },

    #[serde(rename = "task.verified")]
    TaskVerified { task_id: TaskId },

    #[serde(rename = "task.cancelled")]
    TaskCancelled {
        task_id: TaskId,
        reason: CancelReason,
        requester: String,
    },

    #[serde(rename = "dispute.opened")]
    DisputeOpened {
        task_id: TaskId,
        dispute_id: DisputeId,
        initiator: String,
    },

    #[serde(rename = "dispute.resolved")]
    DisputeResolved {
        task_id: TaskId,
        dispute_id: DisputeId,
        outcome: Resolution,
    },

    #[serde(rename = "payment.released")]
    PaymentReleased {
        task_id: TaskId,
        worker: String,
        amount: f64,
        payment_ref: String,
        auto: bool,
    },

    /// Synthetic event used by the webhook test endpoint; never emitted by
    /// the state machine and not registrable.
    #[serde(rename = "webhook.test")]
    WebhookTest { subscription_id: SubscriptionId },
}

impl LifecycleEvent {
    /// Wire name, as matched against subscription event sets.
    pub fn name(&self) -> &'static str {
        match self {
            LifecycleEvent::TaskCreated { .. } => "task.created",
            LifecycleEvent::BidPlaced { .. } => "task.bid",
            LifecycleEvent::TaskAssigned { .. } => "task.assigned",
            LifecycleEvent::TaskCompleted { .. } => "task.completed",
            LifecycleEvent::TaskVerified { .. } => "task.verified",
            LifecycleEvent::TaskCancelled { .. } => "task.cancelled",
            LifecycleEvent::DisputeOpened { .. } => "dispute.opened",
            LifecycleEvent::DisputeResolved { .. } => "dispute.resolved",
            LifecycleEvent::PaymentReleased { .. } => "payment.released",
            LifecycleEvent::WebhookTest { .. } => "webhook.test",
        }
    }

    /// The payload object alone (the `payload` half of the serde form).
    pub fn payload(&self) -> serde_json::Value {
        match serde_json::to_value(self) {
            Ok(serde_json::Value::Object(mut map)) => map
                .remove("payload")
                .unwrap_or(serde_json::Value::Object(Default::default())),
            _ => serde_json::Value::Object(Default::default()),
        }
    }

    /// Task this event belongs to, when there is one.
    pub fn task_id(&self) -> Option<TaskId> {
        match self {
            LifecycleEvent::TaskCreated { task_id, .. }
            | LifecycleEvent::BidPlaced { task_id, .. }
            | LifecycleEvent::TaskAssigned { task_id, .. }
            | LifecycleEvent::TaskCompleted { task_id, .. }
            | LifecycleEvent::TaskVerified { task_id }
            | LifecycleEvent::TaskCancelled { task_id, .. }
            | LifecycleEvent::DisputeOpened { task_id, .. }
            | LifecycleEvent::DisputeResolved { task_id, .. }
            | LifecycleEvent::PaymentReleased { task_id, .. } => Some(*task_id),
            LifecycleEvent::WebhookTest { .. } => None,
        }
    }
}
