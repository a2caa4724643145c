//! Event bus between the player core and its host layer
//!
//! Uses tokio::sync::broadcast for pub/sub pattern.
//! Snapshots, diagnostics and power hooks are published here; the host
//! entity layer subscribes.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::broadcast;

use crate::model::PlaybackSnapshot;

/// Event types that can be published on the bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload")]
pub enum BusEvent {
    // State resolution
    SnapshotUpdated { snapshot: PlaybackSnapshot },
    RefreshFailed { error: String },
    DevicesRefreshed { count: usize },

    // Commands
    CommandCompleted { command: String, success: bool },
    SourceChanged { device: Option<String> },

    // Diagnostics for swallowed failures and fallback paths
    BestEffortFailed { step: String, error: String },
    PartialDegradation { operation: String, reason: String },

    // Host hooks
    PowerHook { hook: String },
    ShuttingDown,
}

/// Event bus handle for publishing and subscribing
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BusEvent>,
}

impl Default for EventBus {
    /// Default capacity (256 events)
    fn default() -> Self {
        Self::new(256)
    }
}

impl EventBus {
    /// Create a new event bus with specified capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Publish an event to all subscribers
    pub fn publish(&self, event: BusEvent) {
        if self.sender.send(event).is_err() {
            tracing::trace!("bus event dropped: no subscribers");
        }
    }

    /// Subscribe to all events
    pub fn subscribe(&self) -> broadcast::Receiver<BusEvent> {
        self.sender.subscribe()
    }

    /// Get the number of current subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

/// Shared event bus wrapped in Arc for thread-safe sharing
pub type SharedBus = Arc<EventBus>;

/// Create a new shared event bus
pub fn create_bus() -> SharedBus {
    Arc::new(EventBus::default())
}
