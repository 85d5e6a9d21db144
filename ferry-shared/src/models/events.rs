use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Seat counter moved on a schedule (reserve, release, or reconciliation).
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct SeatsChangedEvent {
    pub schedule_id: Uuid,
    pub available_seats: i32,
    pub total_capacity: i32,
    pub version: i64,
    pub changed_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub booking_reference: String,
    pub schedule_id: Uuid,
    pub customer_id: Uuid,
    pub passenger_count: i32,
    pub total_amount: i64,
    pub confirmed_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct BookingCancelledEvent {
    pub booking_id: Uuid,
    pub booking_reference: String,
    pub schedule_id: Uuid,
    pub seats_released: i32,
    pub reason: String,
    pub cancelled_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
pub struct TicketCheckedInEvent {
    pub ticket_id: Uuid,
    pub booking_id: Uuid,
    pub schedule_id: Uuid,
    pub checked_in_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq, Eq)]
#[serde(tag = "type", content = "data", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingEvent {
    SeatsChanged(SeatsChangedEvent),
    BookingConfirmed(BookingConfirmedEvent),
    BookingCancelled(BookingCancelledEvent),
    TicketCheckedIn(TicketCheckedInEvent),
}

impl BookingEvent {
    pub fn schedule_id(&self) -> Uuid {
        match self {
            BookingEvent::SeatsChanged(e) => e.schedule_id,
            BookingEvent::BookingConfirmed(e) => e.schedule_id,
            BookingEvent::BookingCancelled(e) => e.schedule_id,
            BookingEvent::TicketCheckedIn(e) => e.schedule_id,
        }
    }

    /// Event name used for SSE frames and topic routing.
    pub fn name(&self) -> &'static str {
        match self {
            BookingEvent::SeatsChanged(_) => "seats_changed",
            BookingEvent::BookingConfirmed(_) => "booking_confirmed",
            BookingEvent::BookingCancelled(_) => "booking_cancelled",
            BookingEvent::TicketCheckedIn(_) => "ticket_checked_in",
        }
    }
}
