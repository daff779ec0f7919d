//! Domain model (ids, records, events, errors).

pub mod dispute;
pub mod errors;
pub mod events;
pub mod ids;
pub mod task;

pub use dispute::{DisputeRecord, DisputeStatus, Evidence, EvidenceKind, Resolution};
pub use errors::EngineError;
pub use events::{EVENT_NAMES, LifecycleEvent};
pub use ids::{BidId, DeliveryId, DisputeId, SubscriptionId, TaskId};
pub use task::{Bid, BidDraft, CancelReason, LedgerState, TaskDraft, TaskRecord, TaskStatus};
