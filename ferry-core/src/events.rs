use ferry_shared::BookingEvent;

/// Fire-and-forget outlet for domain events. Publishing never fails the
/// operation that produced the event.
pub trait EventSink: Send + Sync {
    fn publish(&self, event: BookingEvent);
}

pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, event: BookingEvent) {
        tracing::trace!("Dropping event {}", event.name());
    }
}
