//! In-process publish/subscribe fan-out keyed by conversation id

use super::Publisher;
use async_trait::async_trait;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tracing::trace;

/// Event delivered to subscribers of a conversation
#[derive(Debug, Clone, PartialEq)]
pub struct PublishedEvent {
    pub event: String,
    pub payload: serde_json::Value,
}

/// Publisher backed by one broadcast channel per conversation
pub struct BroadcastPublisher {
    channels: DashMap<String, broadcast::Sender<PublishedEvent>>,
    capacity: usize,
}

impl BroadcastPublisher {
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Subscribe to a conversation's events
    pub fn subscribe(&self, conversation_id: &str) -> broadcast::Receiver<PublishedEvent> {
        self.channels
            .entry(conversation_id.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl Default for BroadcastPublisher {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl Publisher for BroadcastPublisher {
    async fn publish(&self, conversation_id: &str, event: &str, payload: serde_json::Value) {
        let Some(sender) = self.channels.get(conversation_id) else {
            trace!("No subscribers for conversation {}", conversation_id);
            return;
        };
        // No receivers left is not an error for fire-and-forget delivery
        let _ = sender.send(PublishedEvent {
            event: event.to_string(),
            payload,
        });
    }
}
