use dashmap::DashMap;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Per-vendor broadcast hub. The engine publishes every committed event on
/// the channel of the vendor it touches; subscribers that lag past the
/// channel capacity miss events rather than block writers.
pub struct NotifyHub {
    channels: DashMap<Uuid, broadcast::Sender<Event>>,
}

impl Default for NotifyHub {
    fn default() -> Self {
        Self::new()
    }
}

impl NotifyHub {
    pub fn new() -> Self {
        Self {
            channels: DashMap::new(),
        }
    }

    /// Subscribe to a vendor's events, creating the channel if needed.
    pub fn subscribe(&self, vendor_id: Uuid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(vendor_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Publish an event. No-op without subscribers.
    pub fn send(&self, vendor_id: Uuid, event: &Event) {
        if let Some(sender) = self.channels.get(&vendor_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a vendor's channel.
    #[allow(dead_code)]
    pub fn remove(&self, vendor_id: &Uuid) {
        self.channels.remove(vendor_id);
    }
}

/// Render an event as the JSON payload handed to delivery surfaces.
pub fn payload_json(event: &Event) -> String {
    serde_json::to_string(event).unwrap_or_else(|_| "{}".into())
}
