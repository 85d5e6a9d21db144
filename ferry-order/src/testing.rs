//! Store wrapper for exercising the orchestrator against slow or failing storage.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::models::{
    Booking, BookingState, ManifestLine, Payment, PaymentStatus, Schedule, Ticket,
};
use ferry_core::repository::{
    BookingRepository, RefundRecord, ScheduleRepository, SeatCounts, StoreError, StoreResult,
};
use ferry_core::search::{BookingFilter, ScheduleSearch};
use ferry_store::MemoryStore;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Delegates to a [`MemoryStore`], optionally sleeping before schedule reads
/// (a database round-trip) and failing a set number of seat releases or
/// refund writes.
pub(crate) struct FaultyStore {
    pub inner: Arc<MemoryStore>,
    read_delay: Option<Duration>,
    failing_releases: AtomicU32,
    failing_refund_writes: AtomicU32,
}

impl FaultyStore {
    pub fn new(inner: Arc<MemoryStore>) -> Self {
        Self {
            inner,
            read_delay: None,
            failing_releases: AtomicU32::new(0),
            failing_refund_writes: AtomicU32::new(0),
        }
    }

    pub fn with_read_delay(mut self, delay: Duration) -> Self {
        self.read_delay = Some(delay);
        self
    }

    pub fn fail_next_releases(&self, count: u32) {
        self.failing_releases.store(count, Ordering::SeqCst);
    }

    pub fn fail_next_refund_writes(&self, count: u32) {
        self.failing_refund_writes.store(count, Ordering::SeqCst);
    }
}

fn take_one(counter: &AtomicU32) -> bool {
    counter
        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
        .is_ok()
}

#[async_trait]
impl ScheduleRepository for FaultyStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        self.inner.insert_schedule(schedule).await
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        if let Some(delay) = self.read_delay {
            tokio::time::sleep(delay).await;
        }
        self.inner.get_schedule(id).await
    }

    async fn compare_and_set_seats(
        &self,
        id: Uuid,
        expected_version: i64,
        available_seats: i32,
    ) -> StoreResult<Option<i64>> {
        self.inner
            .compare_and_set_seats(id, expected_version, available_seats)
            .await
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<SeatCounts>> {
        if take_one(&self.failing_releases) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.release_seats(id, seats).await
    }

    async fn update_schedule(
        &self,
        schedule: &Schedule,
        expected_version: i64,
    ) -> StoreResult<Option<i64>> {
        self.inner.update_schedule(schedule, expected_version).await
    }

    async fn delete_schedule(&self, id: Uuid) -> StoreResult<bool> {
        self.inner.delete_schedule(id).await
    }

    async fn search_schedules(
        &self,
        criteria: &ScheduleSearch,
    ) -> StoreResult<(Vec<Schedule>, i64)> {
        self.inner.search_schedules(criteria).await
    }
}

#[async_trait]
impl BookingRepository for FaultyStore {
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        self.inner.insert_booking(booking).await
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        self.inner.get_booking(id).await
    }

    async fn get_booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>> {
        self.inner.get_booking_by_reference(reference).await
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<(Vec<Booking>, i64)> {
        self.inner.list_bookings(filter).await
    }

    async fn list_bookings_in_state(
        &self,
        state: BookingState,
        unchanged_since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Booking>> {
        self.inner
            .list_bookings_in_state(state, unchanged_since, limit)
            .await
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingState,
        to: BookingState,
        cancellation_reason: Option<&str>,
    ) -> StoreResult<bool> {
        self.inner
            .transition_booking(id, from, to, cancellation_reason)
            .await
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        self.inner.insert_payment(payment).await
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        gateway_transaction_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        self.inner
            .update_payment(payment_id, status, gateway_transaction_id, processed_at)
            .await
    }

    async fn record_refund(&self, refund: &RefundRecord<'_>) -> StoreResult<bool> {
        if take_one(&self.failing_refund_writes) {
            return Err(StoreError::Backend("connection reset".into()));
        }
        self.inner.record_refund(refund).await
    }

    async fn get_ticket_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        self.inner.get_ticket_by_code(code).await
    }

    async fn check_in_ticket(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        self.inner.check_in_ticket(ticket_id, at).await
    }

    async fn manifest_lines(&self, schedule_id: Uuid) -> StoreResult<Vec<ManifestLine>> {
        self.inner.manifest_lines(schedule_id).await
    }

    async fn count_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<i64> {
        self.inner.count_bookings_for_schedule(schedule_id).await
    }

    async fn held_passenger_count(&self, schedule_id: Uuid) -> StoreResult<i64> {
        self.inner.held_passenger_count(schedule_id).await
    }
}
