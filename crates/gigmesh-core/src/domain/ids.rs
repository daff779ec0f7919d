//! Domain identifiers (strongly-typed IDs).
//!
//! Every entity id is a ULID wrapped in a phantom-typed `Id<T>` so a
//! `TaskId` and a `BidId` can never be mixed up at compile time, while the
//! implementation exists only once.
//!
//! ULIDs sort by creation time, which keeps "newest first" listings cheap
//! and makes ids usable as audit-log ordering keys.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::marker::PhantomData;
use ulid::Ulid;

/// Marker trait for id families.
///
/// Provides the prefix used by Display ("task-", "bid-", ...).
pub trait IdMarker: Send + Sync + 'static {
    fn prefix() -> &'static str;
}

/// Generic id type.
///
/// `T` is a zero-sized marker; it costs nothing at runtime and keeps the
/// id families distinct at compile time.
#[repr(transparent)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Id<T: IdMarker> {
    ulid: Ulid,
    #[serde(skip)]
    _marker: PhantomData<T>,
}

impl<T: IdMarker> Id<T> {
    pub fn from_ulid(ulid: Ulid) -> Self {
        Self {
            ulid,
            _marker: PhantomData,
        }
    }

    pub fn as_ulid(&self) -> Ulid {
        self.ulid
    }
}

impl<T: IdMarker> From<Ulid> for Id<T> {
    fn from(ulid: Ulid) -> Self {
        Self::from_ulid(ulid)
    }
}

impl<T: IdMarker> fmt::Display for Id<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", T::prefix(), self.ulid)
    }
}

// ========================================
// Marker types
// ========================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Task {}

impl IdMarker for Task {
    fn prefix() -> &'static str {
        "task-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Bid {}

impl IdMarker for Bid {
    fn prefix() -> &'static str {
        "bid-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Dispute {}

impl IdMarker for Dispute {
    fn prefix() -> &'static str {
        "dispute-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Subscription {}

impl IdMarker for Subscription {
    fn prefix() -> &'static str {
        "hook-"
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Delivery {}

impl IdMarker for Delivery {
    fn prefix() -> &'static str {
        "delivery-"
    }
}

// ========================================
// Type aliases
// ========================================

/// Identifier of a Task (the unit of posted work).
pub type TaskId = Id<Task>;

/// Identifier of a Bid (scoped to one task).
pub type BidId = Id<Bid>;

/// Identifier of a Dispute.
pub type DisputeId = Id<Dispute>;

/// Identifier of a webhook subscription.
pub type SubscriptionId = Id<Subscription>;

/// Identifier of a single webhook delivery (one fan-out, up to N attempts).
pub type DeliveryId = Id<Delivery>;
