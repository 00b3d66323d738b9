//! Named publish/subscribe channels and the monitor's domain events.
//!
//! Each channel is a `tokio::sync::broadcast` channel. Publishing is
//! best-effort: lagging or absent subscribers never affect the publisher.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::{debug, trace};

use crate::{Error, Result};

/// Channel carrying one [`MonitorEvent::ExecutionCompleted`] per firing.
pub const EXECUTION_CHANNEL: &str = "monitor.execution";

/// Channel carrying [`MonitorEvent::FailureEntered`].
pub const FAILURE_CHANNEL: &str = "monitor.failure";

/// Default per-channel capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 256;

/// Events published by the failure supervisor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum MonitorEvent {
    ExecutionCompleted {
        service_id: String,
        process_id: String,
        trigger: String,
        fired_at: DateTime<Utc>,
        failed: bool,
    },
    FailureEntered {
        service_id: String,
        process_id: String,
        at: DateTime<Utc>,
    },
}

impl MonitorEvent {
    pub fn process_id(&self) -> &str {
        match self {
            Self::ExecutionCompleted { process_id, .. } | Self::FailureEntered { process_id, .. } => {
                process_id
            }
        }
    }
}

/// Broadcast channels keyed by name.
pub struct EventBus<T> {
    channels: RwLock<HashMap<String, broadcast::Sender<T>>>,
    capacity: usize,
}

impl<T: Clone + Send + 'static> EventBus<T> {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_EVENT_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Create a channel. Registering an existing name keeps the old channel.
    pub fn register_channel(&self, name: &str) {
        let mut channels = self.channels.write();
        if !channels.contains_key(name) {
            let (sender, _) = broadcast::channel(self.capacity);
            channels.insert(name.to_string(), sender);
            debug!(channel = name, "Event channel registered");
        }
    }

    pub fn has_channel(&self, name: &str) -> bool {
        self.channels.read().contains_key(name)
    }

    /// Publish to a registered channel. Returns the number of receivers.
    pub fn publish(&self, name: &str, event: T) -> Result<usize> {
        let channels = self.channels.read();
        let sender = channels
            .get(name)
            .ok_or_else(|| Error::not_found("Event channel", name))?;
        let receivers = sender.send(event).unwrap_or(0);
        trace!(channel = name, receivers, "Event published");
        Ok(receivers)
    }

    pub fn subscribe(&self, name: &str) -> Result<broadcast::Receiver<T>> {
        self.channels
            .read()
            .get(name)
            .map(broadcast::Sender::subscribe)
            .ok_or_else(|| Error::not_found("Event channel", name))
    }
}

impl<T: Clone + Send + 'static> Default for EventBus<T> {
    fn default() -> Self {
        Self::new()
    }
}

/// Event bus for [`MonitorEvent`]s with both monitor channels registered.
pub fn monitor_event_bus(capacity: usize) -> EventBus<MonitorEvent> {
    let bus = EventBus::with_capacity(capacity);
    bus.register_channel(EXECUTION_CHANNEL);
    bus.register_channel(FAILURE_CHANNEL);
    bus
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_publish_requires_registration() {
        let bus: EventBus<u32> = EventBus::new();
        assert!(bus.publish("numbers", 1).unwrap_err().is_not_found());

        bus.register_channel("numbers");
        assert_eq!(bus.publish("numbers", 1).unwrap(), 0);
    }

    #[tokio::test]
    async fn test_register_is_idempotent() {
        let bus: EventBus<u32> = EventBus::new();
        bus.register_channel("numbers");
        let mut rx = bus.subscribe("numbers").unwrap();

        bus.register_channel("numbers");
        assert_eq!(bus.publish("numbers", 7).unwrap(), 1);
        assert_eq!(rx.recv().await.unwrap(), 7);
    }

    #[test]
    fn test_monitor_event_serialization() {
        let bus = monitor_event_bus(8);
        assert!(bus.has_channel(EXECUTION_CHANNEL));
        assert!(bus.has_channel(FAILURE_CHANNEL));

        let event = MonitorEvent::FailureEntered {
            service_id: "wps-1".into(),
            process_id: "Execute".into(),
            at: Utc::now(),
        };
        let json = serde_json::to_string(&event).unwrap();
        assert!(json.contains("\"type\":\"failure_entered\""));
        assert_eq!(event.process_id(), "Execute");
    }
}
