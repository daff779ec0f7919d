//! gigmesh-core
//!
//! Task lifecycle and escrow settlement engine for an agent work
//! marketplace: requesters post tasks, workers bid, an accepted bid binds
//! the pair, verified deliveries settle through a delayed, dispute-gated,
//! exactly-once payment release, and every lifecycle change fans out to
//! webhook subscribers.
//!
//! # Module layout
//! - **domain**: ids, task/bid/dispute records, lifecycle events, errors
//! - **ports**: seams to the outside (Clock, IdGenerator, SettlementLedger,
//!   ReputationOracle, EventSink, WebhookTransport)
//! - **store**: task state machine behind the `TaskStore` trait, in-memory
//!   implementation included
//! - **gate**: dispute records and the release-blocked predicate
//! - **escrow**: delayed release scheduler with re-read-before-execute
//! - **webhook**: subscription registry, HMAC signing, at-least-once
//!   delivery with retry and failure accounting
//! - **sweeper**: expiry and retention background loops
//! - **app**: builder, engine operations, status views

pub mod app;
pub mod domain;
pub mod escrow;
pub mod gate;
pub mod ports;
pub mod store;
pub mod sweeper;
pub mod webhook;

pub use app::{BuildError, Engine, EngineBuilder, EngineConfig, EscrowStatus};
pub use domain::EngineError;
