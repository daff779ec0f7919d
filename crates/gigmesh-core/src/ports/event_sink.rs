//! EventSink port: where lifecycle events go.
//!
//! Design intent:
//! - `publish` is synchronous and must not block: implementations enqueue
//!   and return (the webhook dispatcher pushes into an unbounded channel).
//! - The caller that caused the event never learns whether downstream
//!   consumers succeeded.

use std::sync::{Arc, Mutex};

use crate::domain::LifecycleEvent;

pub trait EventSink: Send + Sync {
    fn publish(&self, event: LifecycleEvent);
}

/// Fan-out over every registered sink.
#[derive(Default)]
pub struct EventBus {
    sinks: Vec<Arc<dyn EventSink>>,
}

impl EventBus {
    pub fn new(sinks: Vec<Arc<dyn EventSink>>) -> Self {
        Self { sinks }
    }

    pub fn publish(&self, event: LifecycleEvent) {
        for sink in &self.sinks {
            sink.publish(event.clone());
        }
    }
}

/// Sink that drops everything.
pub struct NoopSink;

impl EventSink for NoopSink {
    fn publish(&self, _event: LifecycleEvent) {}
}

/// Sink that keeps every event in memory. Test helper.
#[derive(Default)]
pub struct CollectingSink {
    events: Mutex<Vec<LifecycleEvent>>,
}

impl CollectingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> Vec<LifecycleEvent> {
        self.events.lock().expect("sink mutex poisoned").clone()
    }

    /// Events with a given wire name, in publish order.
    pub fn named(&self, name: &str) -> Vec<LifecycleEvent> {
        self.snapshot()
            .into_iter()
            .filter(|e| e.name() == name)
            .collect()
    }
}

impl EventSink for CollectingSink {
    fn publish(&self, event: LifecycleEvent) {
        self.events.lock().expect("sink mutex poisoned").push(event);
    }
}
