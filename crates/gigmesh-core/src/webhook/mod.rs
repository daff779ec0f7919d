//! Webhook subsystem: subscriptions, signing, and at-least-once delivery.
//!
//! The dispatcher is fully asynchronous to the request path: publishing an
//! event enqueues and returns, and no delivery outcome ever reaches the
//! caller that caused the event.

mod dispatcher;
mod registry;
mod retry;
pub mod signer;

pub use dispatcher::{
    DeliveryRecord, DeliveryStatus, DispatcherConfig, WebhookDispatcher,
};
pub use registry::{
    DEFAULT_FAILURE_THRESHOLD, RegisteredWebhook, RegistrationReceipt, SubscriptionRecord,
    WebhookRegistry,
};
pub use retry::RetryPolicy;
