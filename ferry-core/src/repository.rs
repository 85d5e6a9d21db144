use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::fmt;
use uuid::Uuid;

use crate::models::{
    Booking, BookingState, ManifestLine, PaymentStatus, Payment, Route, Schedule, Ticket, Vessel,
};
use crate::search::{BookingFilter, ScheduleSearch};

/// Unique constraints the core reacts to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UniqueField {
    BookingReference,
    TicketCode,
    Other(String),
}

impl fmt::Display for UniqueField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UniqueField::BookingReference => f.write_str("booking_reference"),
            UniqueField::TicketCode => f.write_str("qr_code"),
            UniqueField::Other(name) => f.write_str(name),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("duplicate value for unique field {0}")]
    Duplicate(UniqueField),

    #[error("constraint violated: {0}")]
    ConstraintViolation(String),

    #[error("record not found: {0}")]
    NotFound(String),

    #[error("storage backend error: {0}")]
    Backend(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Seat counters of a schedule right after a write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeatCounts {
    pub available_seats: i32,
    pub total_capacity: i32,
    pub version: i64,
}

/// A refund to write together with the booking state it produces.
#[derive(Debug, Clone)]
pub struct RefundRecord<'a> {
    pub booking_id: Uuid,
    /// The charge being reversed; marked `refunded`.
    pub charge_id: Uuid,
    /// Negative payment row; `None` for a zero-amount charge.
    pub refund_row: Option<&'a Payment>,
    pub from: BookingState,
    pub to: BookingState,
}

/// Schedule persistence. Seat counters change only through
/// `compare_and_set_seats` and `release_seats`; every other write goes
/// through `update_schedule`.
#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()>;

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>>;

    /// Sets `available_seats` and bumps the version, only if the stored
    /// version still equals `expected_version`. Returns the new version, or
    /// `None` when another writer got there first. A value outside
    /// `0..=total_capacity` is a `ConstraintViolation`.
    async fn compare_and_set_seats(
        &self,
        id: Uuid,
        expected_version: i64,
        available_seats: i32,
    ) -> StoreResult<Option<i64>>;

    /// Adds `seats` back to `available_seats` in one statement, with no
    /// version precondition, and bumps the version. Returns `None` when the
    /// schedule is missing or the result would exceed `total_capacity`.
    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<SeatCounts>>;

    /// Writes times, fare, status and cancellation reason (not seats) under
    /// the same version guard.
    async fn update_schedule(
        &self,
        schedule: &Schedule,
        expected_version: i64,
    ) -> StoreResult<Option<i64>>;

    /// Returns `false` when the schedule does not exist.
    async fn delete_schedule(&self, id: Uuid) -> StoreResult<bool>;

    /// One page of matches in departure order, plus the total match count.
    async fn search_schedules(
        &self,
        criteria: &ScheduleSearch,
    ) -> StoreResult<(Vec<Schedule>, i64)>;
}

/// Booking aggregate persistence (booking + tickets + payments).
#[async_trait]
pub trait BookingRepository: Send + Sync {
    /// Writes the booking with its tickets and payments atomically.
    /// A reference or ticket-code collision yields `StoreError::Duplicate`
    /// and nothing is written.
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()>;

    /// Loads the booking with tickets and payments attached.
    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>>;

    async fn get_booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>>;

    /// One page of bookings matching the filter, newest first, plus the
    /// total number of matches.
    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<(Vec<Booking>, i64)>;

    /// Bookings currently in `state` whose last change is older than
    /// `unchanged_since`, least recently changed first.
    async fn list_bookings_in_state(
        &self,
        state: BookingState,
        unchanged_since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Booking>>;

    /// Moves the booking from `from` to `to` only if it is still in `from`.
    /// Returns whether the transition was applied.
    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingState,
        to: BookingState,
        cancellation_reason: Option<&str>,
    ) -> StoreResult<bool>;

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()>;

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        gateway_transaction_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()>;

    /// Writes a completed refund in one atomic step: the negative row, the
    /// charge marked `refunded` and the booking moved `from` → `to`. Nothing
    /// is written and `false` is returned when the booking is no longer in
    /// `from`.
    async fn record_refund(&self, refund: &RefundRecord<'_>) -> StoreResult<bool>;

    async fn get_ticket_by_code(&self, code: &str) -> StoreResult<Option<Ticket>>;

    /// Marks the ticket checked in only if it is still pending.
    async fn check_in_ticket(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool>;

    /// Tickets of confirmed bookings on the schedule, in no particular order.
    async fn manifest_lines(&self, schedule_id: Uuid) -> StoreResult<Vec<ManifestLine>>;

    /// Bookings of any status that reference the schedule.
    async fn count_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<i64>;

    /// Sum of passenger counts over bookings that still hold seats.
    async fn held_passenger_count(&self, schedule_id: Uuid) -> StoreResult<i64>;
}

/// Read-mostly reference data: routes and vessels.
#[async_trait]
pub trait CatalogRepository: Send + Sync {
    async fn get_route(&self, id: Uuid) -> StoreResult<Option<Route>>;

    async fn get_vessel(&self, id: Uuid) -> StoreResult<Option<Vessel>>;
}
