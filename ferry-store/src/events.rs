use ferry_core::events::EventSink;
use ferry_shared::BookingEvent;
use tokio::sync::broadcast;
use tracing::{debug, info};

/// In-process fan-out of domain events. Subscribers that fall behind lose
/// the oldest events; publishing never blocks the booking path.
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<BookingEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<BookingEvent> {
        self.sender.subscribe()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl EventSink for EventBus {
    fn publish(&self, event: BookingEvent) {
        let name = event.name();
        let schedule_id = event.schedule_id();
        match self.sender.send(event) {
            Ok(receivers) => {
                info!("Published {} for schedule {} to {} subscriber(s)", name, schedule_id, receivers)
            }
            // No live subscribers is not an error for the publisher.
            Err(_) => debug!("Dropped {} for schedule {}: no subscribers", name, schedule_id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ferry_shared::SeatsChangedEvent;
    use uuid::Uuid;

    #[tokio::test]
    async fn test_subscribers_receive_published_events() {
        let bus = EventBus::new(8);
        let mut rx = bus.subscribe();
        let schedule_id = Uuid::new_v4();

        bus.publish(BookingEvent::SeatsChanged(SeatsChangedEvent {
            schedule_id,
            available_seats: 4,
            total_capacity: 10,
            version: 3,
            changed_at: 0,
        }));

        let event = rx.recv().await.unwrap();
        assert_eq!(event.schedule_id(), schedule_id);
        assert_eq!(event.name(), "seats_changed");
    }

    #[test]
    fn test_publish_without_subscribers_is_harmless() {
        let bus = EventBus::default();
        bus.publish(BookingEvent::SeatsChanged(SeatsChangedEvent {
            schedule_id: Uuid::new_v4(),
            available_seats: 0,
            total_capacity: 1,
            version: 1,
            changed_at: 0,
        }));
    }
}
