//! Event bus for inter-component communication
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! The poller, dispatcher, notification center and modal manager publish
//! here; the SSE endpoint and tests subscribe.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::notify::ToastKind;

/// Event types that can be published on the bus
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum DashboardEvent {
    // Registry lifecycle
    PrintersLoaded { count: usize },
    PrintersLoadFailed { message: String },

    // Polling
    StatusUpdated { printers: Vec<String> },
    StatusPollFailed { message: String },

    // Control actions
    ActionSent { printer: String, action: String },
    ActionFailed { printer: String, action: String, error: String },

    // Notifications
    Notification { id: u64, kind: ToastKind, message: String },
    NotificationDismissed { id: u64 },

    // Modals
    ModalOpened { kind: String, printer: Option<String> },
    ModalClosed { kind: String },
    CameraSnapshot { printer: String, snapshot_url: String },
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<DashboardEvent>,
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: DashboardEvent) {
        // Ignore send errors (no subscribers)
        let _ = self.sender.send(event);
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<DashboardEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    /// Default capacity of 256 events
    fn default() -> Self {
        Self::new(256)
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_pubsub() {
        let bus = create_bus();
        let mut rx = bus.subscribe();

        bus.publish(DashboardEvent::PrintersLoaded { count: 3 });

        let event = rx.recv().await.unwrap();
        match event {
            DashboardEvent::PrintersLoaded { count } => assert_eq!(count, 3),
            _ => panic!("Wrong event type"),
        }
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let bus = create_bus();
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();

        bus.publish(DashboardEvent::ModalClosed {
            kind: "camera".to_string(),
        });

        assert!(matches!(
            rx1.recv().await.unwrap(),
            DashboardEvent::ModalClosed { .. }
        ));
        assert!(matches!(
            rx2.recv().await.unwrap(),
            DashboardEvent::ModalClosed { .. }
        ));
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(DashboardEvent::StatusPollFailed {
            message: "HTTP 502: Bad Gateway".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "StatusPollFailed");
        assert_eq!(json["payload"]["message"], "HTTP 502: Bad Gateway");
    }
}
