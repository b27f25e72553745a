use dashmap::DashMap;
use tokio::sync::broadcast;

use crate::model::{Event, VehicleId};

const CHANNEL_CAPACITY: usize = 256;

/// Broadcast hub of committed events, one channel per vehicle.
///
/// Notification and activity-log collaborators subscribe here; the engine
/// never waits on them.
pub struct NotifyHub {
    channels: DashMap<VehicleId, broadcast::Sender<Event>>,
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

    /// Subscribe to events for a vehicle. Creates the channel if needed.
    pub fn subscribe(&self, vehicle_id: VehicleId) -> broadcast::Receiver<Event> {
        let sender = self
            .channels
            .entry(vehicle_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0);
        sender.subscribe()
    }

    /// Send a notification. No-op if nobody is listening.
    pub fn send(&self, vehicle_id: VehicleId, event: &Event) {
        if let Some(sender) = self.channels.get(&vehicle_id) {
            let _ = sender.send(event.clone());
        }
    }

    /// Drop the vehicle's channel. Current receivers see `Closed`; a later
    /// `subscribe` starts a fresh channel.
    pub fn remove(&self, vehicle_id: &VehicleId) {
        self.channels.remove(vehicle_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ulid::Ulid;

    #[tokio::test]
    async fn subscribe_and_receive() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);

        let event = Event::ReservationPurged {
            id: Ulid::new(),
            vehicle_id: vid,
        };
        hub.send(vid, &event);

        assert_eq!(rx.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn send_without_subscribers_is_noop() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        hub.send(
            vid,
            &Event::ReservationPurged {
                id: Ulid::new(),
                vehicle_id: vid,
            },
        );
    }

    #[tokio::test]
    async fn removed_channel_stops_delivery() {
        let hub = NotifyHub::new();
        let vid = Ulid::new();
        let mut rx = hub.subscribe(vid);
        hub.remove(&vid);
        hub.send(
            vid,
            &Event::ReservationPurged {
                id: Ulid::new(),
                vehicle_id: vid,
            },
        );
        assert!(matches!(
            rx.try_recv(),
            Err(broadcast::error::TryRecvError::Closed)
        ));
    }
}
