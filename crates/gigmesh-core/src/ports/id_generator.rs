//! IdGenerator port: id and opaque-reference creation.
//!
//! Abstracted behind a trait for testability; the production implementation
//! builds ULIDs from the injected clock plus fresh entropy, so ids stay
//! sortable by creation time even under a pinned test clock.

use ulid::Ulid;

use crate::domain::ids::{BidId, DeliveryId, DisputeId, SubscriptionId, TaskId};
use crate::ports::Clock;

pub trait IdGenerator: Send + Sync {
    fn task_id(&self) -> TaskId;
    fn bid_id(&self) -> BidId;
    fn dispute_id(&self) -> DisputeId;
    fn subscription_id(&self) -> SubscriptionId;
    fn delivery_id(&self) -> DeliveryId;

    /// Opaque reference string, e.g. a locally generated payment reference
    /// when the settlement ledger is unavailable. `kind` becomes the prefix.
    fn reference(&self, kind: &str) -> String;
}

/// ULID-based generator driven by a [`Clock`].
pub struct UlidGenerator<C> {
    clock: C,
}

impl<C: Clock> UlidGenerator<C> {
    pub fn new(clock: C) -> Self {
        Self { clock }
    }

    fn next_ulid(&self) -> Ulid {
        let timestamp_ms = self.clock.now().timestamp_millis() as u64;
        Ulid::from_parts(timestamp_ms, rand::random())
    }
}

impl<C: Clock> IdGenerator for UlidGenerator<C> {
    fn task_id(&self) -> TaskId {
        TaskId::from(self.next_ulid())
    }

    fn bid_id(&self) -> BidId {
        BidId::from(self.next_ulid())
    }

    fn dispute_id(&self) -> DisputeId {
        DisputeId::from(self.next_ulid())
    }

    fn subscription_id(&self) -> SubscriptionId {
        SubscriptionId::from(self.next_ulid())
    }

    fn delivery_id(&self) -> DeliveryId {
        DeliveryId::from(self.next_ulid())
    }

    fn reference(&self, kind: &str) -> String {
        format!("{kind}-{}", self.next_ulid().to_string().to_lowercase())
    }
}
