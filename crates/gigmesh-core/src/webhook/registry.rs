//! Subscription registry.
//!
//! Owns `WebhookSubscription` records: registration (secret minted once),
//! owner-scoped listing and deletion, manual activation, and the
//! consecutive-failure accounting that auto-deactivates a subscription at
//! the threshold. Subscriptions are never auto-deleted.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tracing::warn;

use crate::domain::{EVENT_NAMES, EngineError, SubscriptionId};
use crate::ports::{Clock, IdGenerator};

/// Consecutive final failures before a subscription is switched off.
pub const DEFAULT_FAILURE_THRESHOLD: u32 = 10;

/// Full record, secret included. Stays inside the crate; callers see
/// [`RegisteredWebhook`].
#[derive(Debug, Clone)]
pub struct SubscriptionRecord {
    pub id: SubscriptionId,
    pub owner: String,
    pub url: String,
    pub events: Vec<String>,
    pub secret: String,
    pub active: bool,
    pub consecutive_failures: u32,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl SubscriptionRecord {
    /// Does this subscription want `event`? `"*"` matches everything.
    pub fn wants(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event || e == "*")
    }
}

/// Owner-facing view; the secret is redacted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisteredWebhook {
    pub id: SubscriptionId,
    pub owner: String,
    pub url: String,
    pub events: Vec<String>,
    pub active: bool,
    pub consecutive_failures: u32,
    pub last_delivered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl From<&SubscriptionRecord> for RegisteredWebhook {
    fn from(record: &SubscriptionRecord) -> Self {
        Self {
            id: record.id,
            owner: record.owner.clone(),
            url: record.url.clone(),
            events: record.events.clone(),
            active: record.active,
            consecutive_failures: record.consecutive_failures,
            last_delivered_at: record.last_delivered_at,
            created_at: record.created_at,
        }
    }
}

/// Returned from registration. The only time the secret leaves the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegistrationReceipt {
    pub id: SubscriptionId,
    pub secret: String,
    pub events: Vec<String>,
}

pub struct WebhookRegistry {
    state: Mutex<HashMap<SubscriptionId, SubscriptionRecord>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    failure_threshold: u32,
}

impl WebhookRegistry {
    pub fn new(clock: Arc<dyn Clock>, ids: Arc<dyn IdGenerator>, failure_threshold: u32) -> Self {
        Self {
            state: Mutex::new(HashMap::new()),
            clock,
            ids,
            failure_threshold,
        }
    }

    pub async fn register(
        &self,
        owner: String,
        url: String,
        events: Vec<String>,
    ) -> Result<RegistrationReceipt, EngineError> {
        if owner.trim().is_empty() {
            return Err(EngineError::Validation("owner must not be empty".into()));
        }
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(EngineError::Validation(format!(
                "target url must be http(s), got {url}"
            )));
        }
        if events.is_empty() {
            return Err(EngineError::Validation(
                "at least one event required".into(),
            ));
        }
        for event in &events {
            if event != "*" && !EVENT_NAMES.contains(&event.as_str()) {
                return Err(EngineError::Validation(format!(
                    "unknown event type: {event}"
                )));
            }
        }

        let record = SubscriptionRecord {
            id: self.ids.subscription_id(),
            owner,
            url,
            events,
            secret: hex::encode(rand::random::<[u8; 32]>()),
            active: true,
            consecutive_failures: 0,
            last_delivered_at: None,
            created_at: self.clock.now(),
        };

        let receipt = RegistrationReceipt {
            id: record.id,
            secret: record.secret.clone(),
            events: record.events.clone(),
        };

        let mut state = self.state.lock().await;
        state.insert(record.id, record);
        Ok(receipt)
    }

    /// Owner's subscriptions, secrets redacted.
    pub async fn list(&self, owner: &str) -> Vec<RegisteredWebhook> {
        let state = self.state.lock().await;
        let mut hooks: Vec<RegisteredWebhook> = state
            .values()
            .filter(|r| r.owner == owner)
            .map(RegisteredWebhook::from)
            .collect();
        hooks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        hooks
    }

    pub async fn delete(&self, owner: &str, id: SubscriptionId) -> Result<(), EngineError> {
        let mut state = self.state.lock().await;
        let record = state
            .get(&id)
            .ok_or(EngineError::SubscriptionNotFound(id))?;
        if record.owner != owner {
            return Err(EngineError::Forbidden(format!(
                "{owner} does not own subscription {id}"
            )));
        }
        state.remove(&id);
        Ok(())
    }

    /// Flip the active flag. Re-activation clears the failure counter,
    /// otherwise the next final failure would switch it straight off again.
    pub async fn set_active(
        &self,
        owner: &str,
        id: SubscriptionId,
        active: bool,
    ) -> Result<RegisteredWebhook, EngineError> {
        let mut state = self.state.lock().await;
        let record = state
            .get_mut(&id)
            .ok_or(EngineError::SubscriptionNotFound(id))?;
        if record.owner != owner {
            return Err(EngineError::Forbidden(format!(
                "{owner} does not own subscription {id}"
            )));
        }
        record.active = active;
        if active {
            record.consecutive_failures = 0;
        }
        Ok(RegisteredWebhook::from(&*record))
    }

    pub(crate) async fn get(
        &self,
        id: SubscriptionId,
    ) -> Result<SubscriptionRecord, EngineError> {
        let state = self.state.lock().await;
        state
            .get(&id)
            .cloned()
            .ok_or(EngineError::SubscriptionNotFound(id))
    }

    /// Active subscriptions whose event set covers `event`.
    pub(crate) async fn matching(&self, event: &str) -> Vec<SubscriptionRecord> {
        let state = self.state.lock().await;
        state
            .values()
            .filter(|r| r.active && r.wants(event))
            .cloned()
            .collect()
    }

    /// A delivery (any attempt) succeeded: counter resets, timestamp moves.
    pub(crate) async fn record_success(&self, id: SubscriptionId) {
        let mut state = self.state.lock().await;
        if let Some(record) = state.get_mut(&id) {
            record.consecutive_failures = 0;
            record.last_delivered_at = Some(self.clock.now());
        }
    }

    /// A delivery exhausted all attempts. Returns true when this failure
    /// tripped the threshold and switched the subscription off.
    pub(crate) async fn record_failure(&self, id: SubscriptionId) -> bool {
        let mut state = self.state.lock().await;
        let Some(record) = state.get_mut(&id) else {
            return false;
        };
        record.consecutive_failures += 1;
        if record.active && record.consecutive_failures >= self.failure_threshold {
            record.active = false;
            warn!(
                subscription = %id,
                url = %record.url,
                failures = record.consecutive_failures,
                "webhook subscription deactivated after repeated failures"
            );
            return true;
        }
        false
    }
}
