//! WebhookTransport port: one HTTP push of a signed payload.
//!
//! The dispatcher owns retry, backoff and failure accounting; the transport
//! does exactly one attempt and reports the HTTP status. Tests swap in a
//! recording fake, production uses the reqwest client.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

use crate::domain::ids::DeliveryId;

/// Header carrying the event wire name.
pub const EVENT_HEADER: &str = "x-gigmesh-event";
/// Header carrying `sha256=<hex hmac>` over the exact body bytes.
pub const SIGNATURE_HEADER: &str = "x-gigmesh-signature";
/// Header carrying the delivery id, for receiver-side deduplication.
pub const DELIVERY_HEADER: &str = "x-gigmesh-delivery";

/// One outbound push, fully rendered: the body bytes are final (the
/// signature was computed over exactly these bytes).
#[derive(Debug, Clone)]
pub struct WebhookRequest {
    pub url: String,
    pub event: String,
    pub delivery_id: DeliveryId,
    pub signature: String,
    pub body: Vec<u8>,
}

/// Network-level failure: nothing reached the endpoint, or the connection
/// died before a status came back. An HTTP error status is NOT a
/// `TransportError`; it is a delivered response the dispatcher judges.
#[derive(Debug, Error)]
#[error("webhook transport: {0}")]
pub struct TransportError(pub String);

#[async_trait]
pub trait WebhookTransport: Send + Sync {
    async fn deliver(&self, request: &WebhookRequest) -> Result<u16, TransportError>;
}

/// reqwest-backed transport with a per-attempt timeout.
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    pub fn new(timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError(format!("client init: {e}")))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl WebhookTransport for HttpTransport {
    async fn deliver(&self, request: &WebhookRequest) -> Result<u16, TransportError> {
        let response = self
            .client
            .post(&request.url)
            .header("content-type", "application/json")
            .header(EVENT_HEADER, request.event.as_str())
            .header(SIGNATURE_HEADER, request.signature.as_str())
            .header(DELIVERY_HEADER, request.delivery_id.to_string())
            .body(request.body.clone())
            .send()
            .await
            .map_err(|e| TransportError(e.to_string()))?;

        Ok(response.status().as_u16())
    }
}
