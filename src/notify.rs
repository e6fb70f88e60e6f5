use dashmap::DashMap;
use tokio::sync::broadcast;
use ulid::Ulid;

use crate::model::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub for committed engine events, one channel per location.
/// The notification dispatcher (out of scope here) subscribes to these.
pub struct NotifyHub {
    channels: DashMap<Ulid, broadcast::Sender<Event>>,
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

    /// Subscribe to events for a location. Creates the channel if needed.
    pub fn subscribe(&self, location_id: Ulid) -> broadcast::Receiver<Event> {
        self.channels
            .entry(location_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    /// Send an event. No-op if nobody is listening.
    pub fn send(&self, location_id: Ulid, event: &Event) {
        if let Some(sender) = self.channels.get(&location_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop a location's channel.
    pub fn remove(&self, location_id: &Ulid) {
        self.channels.remove(location_id);
    }
}
