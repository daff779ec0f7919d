//! Ports: the engine's seams to the outside world.
//!
//! Each trait hides one external concern (time, id entropy, the settlement
//! ledger, the scoring stack, event consumers, the HTTP client) so the core
//! stays testable and the implementations swappable.

pub mod clock;
pub mod event_sink;
pub mod id_generator;
pub mod ledger;
pub mod reputation;
pub mod transport;

pub use clock::{Clock, FixedClock, SystemClock};
pub use event_sink::{CollectingSink, EventBus, EventSink, NoopSink};
pub use id_generator::{IdGenerator, UlidGenerator};
pub use ledger::{LedgerError, SettlementLedger};
pub use reputation::{FixedReputation, ReputationOracle};
pub use transport::{
    DELIVERY_HEADER, EVENT_HEADER, HttpTransport, SIGNATURE_HEADER, TransportError,
    WebhookRequest, WebhookTransport,
};
