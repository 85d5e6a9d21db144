use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ferry_core::identity::CustomerDirectory;
use ferry_core::models::{
    Booking, BookingState, BookingStatus, CheckInStatus, Customer, ManifestLine, Payment,
    PaymentStatus, Route, Schedule, Ticket, Vessel,
};
use ferry_core::repository::{
    BookingRepository, CatalogRepository, RefundRecord, ScheduleRepository, SeatCounts,
    StoreError, StoreResult, UniqueField,
};
use ferry_core::search::{BookingFilter, ScheduleSearch};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    schedules: HashMap<Uuid, Schedule>,
    routes: HashMap<Uuid, Route>,
    vessels: HashMap<Uuid, Vessel>,
    customers: HashMap<Uuid, Customer>,
    bookings: HashMap<Uuid, Booking>,
    references: HashMap<String, Uuid>,
    // qr code -> booking id
    ticket_codes: HashMap<String, Uuid>,
    // payment id -> booking id
    payment_owners: HashMap<Uuid, Uuid>,
}

/// Process-local store with the same atomicity guarantees as the Postgres
/// repositories: every trait call is applied under one lock, so a
/// compare-and-set or a multi-row insert is all-or-nothing.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> StoreResult<MutexGuard<'_, Inner>> {
        self.inner
            .lock()
            .map_err(|_| StoreError::Backend("memory store lock poisoned".to_string()))
    }

    pub fn add_route(&self, route: Route) -> StoreResult<()> {
        self.lock()?.routes.insert(route.id, route);
        Ok(())
    }

    pub fn add_vessel(&self, vessel: Vessel) -> StoreResult<()> {
        self.lock()?.vessels.insert(vessel.id, vessel);
        Ok(())
    }

    pub fn add_customer(&self, customer: Customer) -> StoreResult<()> {
        self.lock()?.customers.insert(customer.id, customer);
        Ok(())
    }
}

#[async_trait]
impl ScheduleRepository for MemoryStore {
    async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
        if schedule.available_seats < 0 || schedule.available_seats > schedule.total_capacity {
            return Err(StoreError::ConstraintViolation(
                "available_seats must be within 0..=total_capacity".to_string(),
            ));
        }
        let mut inner = self.lock()?;
        if inner.schedules.contains_key(&schedule.id) {
            return Err(StoreError::Duplicate(UniqueField::Other("schedule_id".to_string())));
        }
        inner.schedules.insert(schedule.id, schedule.clone());
        Ok(())
    }

    async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
        Ok(self.lock()?.schedules.get(&id).cloned())
    }

    async fn compare_and_set_seats(
        &self,
        id: Uuid,
        expected_version: i64,
        available_seats: i32,
    ) -> StoreResult<Option<i64>> {
        let mut inner = self.lock()?;
        let schedule = inner
            .schedules
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", id)))?;

        if schedule.version != expected_version {
            return Ok(None);
        }
        if available_seats < 0 || available_seats > schedule.total_capacity {
            return Err(StoreError::ConstraintViolation(format!(
                "available_seats {} outside 0..={}",
                available_seats, schedule.total_capacity
            )));
        }

        schedule.available_seats = available_seats;
        schedule.version += 1;
        schedule.updated_at = Utc::now();
        Ok(Some(schedule.version))
    }

    async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<SeatCounts>> {
        let mut inner = self.lock()?;
        let Some(schedule) = inner.schedules.get_mut(&id) else {
            return Ok(None);
        };
        let restored = schedule.available_seats.saturating_add(seats);
        if restored > schedule.total_capacity {
            return Ok(None);
        }

        schedule.available_seats = restored;
        schedule.version += 1;
        schedule.updated_at = Utc::now();
        Ok(Some(SeatCounts {
            available_seats: restored,
            total_capacity: schedule.total_capacity,
            version: schedule.version,
        }))
    }

    async fn update_schedule(
        &self,
        schedule: &Schedule,
        expected_version: i64,
    ) -> StoreResult<Option<i64>> {
        let mut inner = self.lock()?;
        let stored = inner
            .schedules
            .get_mut(&schedule.id)
            .ok_or_else(|| StoreError::NotFound(format!("schedule {}", schedule.id)))?;

        if stored.version != expected_version {
            return Ok(None);
        }

        stored.departure_time = schedule.departure_time;
        stored.arrival_time = schedule.arrival_time;
        stored.base_fare = schedule.base_fare;
        stored.status = schedule.status;
        stored.cancellation_reason = schedule.cancellation_reason.clone();
        stored.version += 1;
        stored.updated_at = Utc::now();
        Ok(Some(stored.version))
    }

    async fn delete_schedule(&self, id: Uuid) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        if inner.bookings.values().any(|b| b.schedule_id == id) {
            return Err(StoreError::ConstraintViolation(format!(
                "schedule {} is referenced by bookings",
                id
            )));
        }
        Ok(inner.schedules.remove(&id).is_some())
    }

    async fn search_schedules(
        &self,
        criteria: &ScheduleSearch,
    ) -> StoreResult<(Vec<Schedule>, i64)> {
        let inner = self.lock()?;
        let mut found: Vec<Schedule> = inner
            .schedules
            .values()
            .filter(|s| {
                inner.routes.get(&s.route_id).is_some_and(|r| {
                    r.departure_port_id == criteria.departure_port
                        && r.arrival_port_id == criteria.arrival_port
                })
            })
            .filter(|s| criteria.accepts(s))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.departure_time);
        Ok(paginate(found, criteria.page()))
    }
}

#[async_trait]
impl BookingRepository for MemoryStore {
    async fn insert_booking(&self, booking: &Booking) -> StoreResult<()> {
        let mut inner = self.lock()?;

        if inner.references.contains_key(&booking.booking_reference) {
            return Err(StoreError::Duplicate(UniqueField::BookingReference));
        }
        let mut seen = std::collections::HashSet::new();
        for ticket in &booking.tickets {
            if inner.ticket_codes.contains_key(&ticket.qr_code) || !seen.insert(&ticket.qr_code) {
                return Err(StoreError::Duplicate(UniqueField::TicketCode));
            }
        }

        inner
            .references
            .insert(booking.booking_reference.clone(), booking.id);
        for ticket in &booking.tickets {
            inner.ticket_codes.insert(ticket.qr_code.clone(), booking.id);
        }
        for payment in &booking.payments {
            inner.payment_owners.insert(payment.id, booking.id);
        }
        inner.bookings.insert(booking.id, booking.clone());
        Ok(())
    }

    async fn get_booking(&self, id: Uuid) -> StoreResult<Option<Booking>> {
        Ok(self.lock()?.bookings.get(&id).cloned())
    }

    async fn get_booking_by_reference(&self, reference: &str) -> StoreResult<Option<Booking>> {
        let inner = self.lock()?;
        Ok(inner
            .references
            .get(reference)
            .and_then(|id| inner.bookings.get(id))
            .cloned())
    }

    async fn list_bookings(&self, filter: &BookingFilter) -> StoreResult<(Vec<Booking>, i64)> {
        let inner = self.lock()?;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| filter.accepts(b))
            .cloned()
            .collect();
        bookings.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(a.id.cmp(&b.id)));
        Ok(paginate(bookings, filter.page()))
    }

    async fn list_bookings_in_state(
        &self,
        state: BookingState,
        unchanged_since: DateTime<Utc>,
        limit: i64,
    ) -> StoreResult<Vec<Booking>> {
        let inner = self.lock()?;
        let mut bookings: Vec<Booking> = inner
            .bookings
            .values()
            .filter(|b| b.state() == state && b.updated_at < unchanged_since)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.updated_at);
        bookings.truncate(limit.max(0) as usize);
        Ok(bookings)
    }

    async fn transition_booking(
        &self,
        id: Uuid,
        from: BookingState,
        to: BookingState,
        cancellation_reason: Option<&str>,
    ) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let booking = inner
            .bookings
            .get_mut(&id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", id)))?;

        if booking.state() != from {
            return Ok(false);
        }
        booking.apply(to);
        if let Some(reason) = cancellation_reason {
            booking.cancellation_reason = Some(reason.to_string());
        }
        Ok(true)
    }

    async fn insert_payment(&self, payment: &Payment) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let booking = inner
            .bookings
            .get_mut(&payment.booking_id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", payment.booking_id)))?;
        booking.payments.push(payment.clone());
        inner.payment_owners.insert(payment.id, payment.booking_id);
        Ok(())
    }

    async fn update_payment(
        &self,
        payment_id: Uuid,
        status: PaymentStatus,
        gateway_transaction_id: Option<&str>,
        processed_at: Option<DateTime<Utc>>,
    ) -> StoreResult<()> {
        let mut inner = self.lock()?;
        let booking_id = *inner
            .payment_owners
            .get(&payment_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment_id)))?;
        let payment = inner
            .bookings
            .get_mut(&booking_id)
            .and_then(|b| b.payments.iter_mut().find(|p| p.id == payment_id))
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", payment_id)))?;

        payment.status = status;
        if let Some(txn) = gateway_transaction_id {
            payment.gateway_transaction_id = Some(txn.to_string());
        }
        if processed_at.is_some() {
            payment.processed_at = processed_at;
        }
        Ok(())
    }

    async fn record_refund(&self, refund: &RefundRecord<'_>) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let booking = inner
            .bookings
            .get_mut(&refund.booking_id)
            .ok_or_else(|| StoreError::NotFound(format!("booking {}", refund.booking_id)))?;

        if booking.state() != refund.from {
            return Ok(false);
        }
        let charge = booking
            .payments
            .iter_mut()
            .find(|p| p.id == refund.charge_id)
            .ok_or_else(|| StoreError::NotFound(format!("payment {}", refund.charge_id)))?;

        charge.status = PaymentStatus::Refunded;
        if let Some(row) = refund.refund_row {
            booking.payments.push(row.clone());
        }
        booking.apply(refund.to);
        if let Some(row) = refund.refund_row {
            inner.payment_owners.insert(row.id, refund.booking_id);
        }
        Ok(true)
    }

    async fn get_ticket_by_code(&self, code: &str) -> StoreResult<Option<Ticket>> {
        let inner = self.lock()?;
        Ok(inner
            .ticket_codes
            .get(code)
            .and_then(|booking_id| inner.bookings.get(booking_id))
            .and_then(|b| b.tickets.iter().find(|t| t.qr_code == code))
            .cloned())
    }

    async fn check_in_ticket(&self, ticket_id: Uuid, at: DateTime<Utc>) -> StoreResult<bool> {
        let mut inner = self.lock()?;
        let ticket = inner
            .bookings
            .values_mut()
            .flat_map(|b| b.tickets.iter_mut())
            .find(|t| t.id == ticket_id)
            .ok_or_else(|| StoreError::NotFound(format!("ticket {}", ticket_id)))?;

        if ticket.check_in_status != CheckInStatus::Pending {
            return Ok(false);
        }
        ticket.check_in_status = CheckInStatus::CheckedIn;
        ticket.check_in_time = Some(at);
        Ok(true)
    }

    async fn manifest_lines(&self, schedule_id: Uuid) -> StoreResult<Vec<ManifestLine>> {
        let inner = self.lock()?;
        Ok(inner
            .bookings
            .values()
            .filter(|b| b.schedule_id == schedule_id && b.booking_status == BookingStatus::Confirmed)
            .flat_map(|b| {
                b.tickets.iter().map(move |t| ManifestLine {
                    ticket: t.clone(),
                    booking_id: b.id,
                    booking_reference: b.booking_reference.clone(),
                    customer_id: b.customer_id,
                })
            })
            .collect())
    }

    async fn count_bookings_for_schedule(&self, schedule_id: Uuid) -> StoreResult<i64> {
        let inner = self.lock()?;
        Ok(inner
            .bookings
            .values()
            .filter(|b| b.schedule_id == schedule_id)
            .count() as i64)
    }

    async fn held_passenger_count(&self, schedule_id: Uuid) -> StoreResult<i64> {
        let inner = self.lock()?;
        Ok(inner
            .bookings
            .values()
            .filter(|b| b.schedule_id == schedule_id && b.holds_seats())
            .map(|b| b.passenger_count as i64)
            .sum())
    }
}

#[async_trait]
impl CatalogRepository for MemoryStore {
    async fn get_route(&self, id: Uuid) -> StoreResult<Option<Route>> {
        Ok(self.lock()?.routes.get(&id).cloned())
    }

    async fn get_vessel(&self, id: Uuid) -> StoreResult<Option<Vessel>> {
        Ok(self.lock()?.vessels.get(&id).cloned())
    }
}

#[async_trait]
impl CustomerDirectory for MemoryStore {
    async fn get_customer(&self, id: Uuid) -> StoreResult<Option<Customer>> {
        Ok(self.lock()?.customers.get(&id).cloned())
    }
}

fn paginate<T>(mut rows: Vec<T>, (limit, offset): (i64, i64)) -> (Vec<T>, i64) {
    let total = rows.len() as i64;
    let start = (offset.max(0) as usize).min(rows.len());
    let end = start.saturating_add(limit.max(0) as usize).min(rows.len());
    (rows.drain(start..end).collect(), total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn schedule(capacity: i32) -> Schedule {
        let departure = Utc::now() + Duration::days(3);
        Schedule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            departure,
            departure + Duration::hours(1),
            2500,
            "USD".to_string(),
            capacity,
        )
    }

    #[tokio::test]
    async fn test_compare_and_set_rejects_stale_version() {
        let store = MemoryStore::new();
        let s = schedule(10);
        store.insert_schedule(&s).await.unwrap();

        assert_eq!(store.compare_and_set_seats(s.id, 0, 7).await.unwrap(), Some(1));
        // Second writer still holds version 0
        assert_eq!(store.compare_and_set_seats(s.id, 0, 5).await.unwrap(), None);

        let stored = store.get_schedule(s.id).await.unwrap().unwrap();
        assert_eq!(stored.available_seats, 7);
        assert_eq!(stored.version, 1);
    }

    #[tokio::test]
    async fn test_compare_and_set_enforces_seat_bounds() {
        let store = MemoryStore::new();
        let s = schedule(4);
        store.insert_schedule(&s).await.unwrap();

        let over = store.compare_and_set_seats(s.id, 0, 5).await;
        assert!(matches!(over, Err(StoreError::ConstraintViolation(_))));

        let under = store.compare_and_set_seats(s.id, 0, -1).await;
        assert!(matches!(under, Err(StoreError::ConstraintViolation(_))));
    }

    #[tokio::test]
    async fn test_transition_is_conditional() {
        let store = MemoryStore::new();
        let now = Utc::now();
        let booking = Booking {
            id: Uuid::new_v4(),
            booking_reference: "FFTESTREF1".to_string(),
            schedule_id: Uuid::new_v4(),
            customer_id: Uuid::new_v4(),
            passenger_count: 1,
            total_amount: 1000,
            currency: "USD".to_string(),
            booking_status: BookingStatus::Confirmed,
            payment_status: PaymentStatus::Completed,
            channel: Default::default(),
            special_requirements: None,
            booking_agent_id: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
            tickets: vec![],
            payments: vec![],
        };
        store.insert_booking(&booking).await.unwrap();

        let from = BookingState::new(BookingStatus::Confirmed, PaymentStatus::Completed);
        let to = BookingState::new(BookingStatus::Cancelled, PaymentStatus::Completed);
        assert!(store.transition_booking(booking.id, from, to, Some("weather")).await.unwrap());
        assert!(!store.transition_booking(booking.id, from, to, Some("again")).await.unwrap());

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.cancellation_reason.as_deref(), Some("weather"));

        let dup = store.insert_booking(&booking).await;
        assert!(matches!(dup, Err(StoreError::Duplicate(UniqueField::BookingReference))));
    }

    fn booking_on(schedule_id: Uuid, state: BookingState, created_at: DateTime<Utc>) -> Booking {
        let id = Uuid::new_v4();
        let mut charge = Payment::pending(id, "card", 2000, "USD");
        charge.status = state.payment;
        charge.gateway_transaction_id = Some(format!("txn_{}", id.simple()));
        Booking {
            id,
            booking_reference: format!("FF{}", &id.simple().to_string()[..8].to_uppercase()),
            schedule_id,
            customer_id: Uuid::new_v4(),
            passenger_count: 1,
            total_amount: 2000,
            currency: "USD".to_string(),
            booking_status: state.booking,
            payment_status: state.payment,
            channel: Default::default(),
            special_requirements: None,
            booking_agent_id: None,
            cancellation_reason: None,
            created_at,
            updated_at: created_at,
            tickets: vec![],
            payments: vec![charge],
        }
    }

    #[tokio::test]
    async fn test_release_seats_ignores_version_but_not_capacity() {
        let store = MemoryStore::new();
        let s = schedule(10);
        store.insert_schedule(&s).await.unwrap();
        store.compare_and_set_seats(s.id, 0, 6).await.unwrap();

        let counts = store.release_seats(s.id, 3).await.unwrap().unwrap();
        assert_eq!(counts.available_seats, 9);
        assert_eq!(counts.total_capacity, 10);
        assert_eq!(counts.version, 2);

        assert_eq!(store.release_seats(s.id, 2).await.unwrap(), None);
        assert_eq!(store.release_seats(Uuid::new_v4(), 1).await.unwrap(), None);
        assert_eq!(store.get_schedule(s.id).await.unwrap().unwrap().available_seats, 9);
    }

    #[tokio::test]
    async fn test_record_refund_is_all_or_nothing() {
        let store = MemoryStore::new();
        let owed = BookingState::new(BookingStatus::Cancelled, PaymentStatus::Completed);
        let refunded = BookingState::new(BookingStatus::Cancelled, PaymentStatus::Refunded);
        let booking = booking_on(Uuid::new_v4(), owed, Utc::now());
        store.insert_booking(&booking).await.unwrap();

        let charge = booking.payments[0].clone();
        let row = Payment::refund_for(&charge, Some("rf_1".to_string()));
        let record = RefundRecord {
            booking_id: booking.id,
            charge_id: charge.id,
            refund_row: Some(&row),
            from: owed,
            to: refunded,
        };

        assert!(store.record_refund(&record).await.unwrap());
        // The booking has moved on, so a second write changes nothing
        assert!(!store.record_refund(&record).await.unwrap());

        let stored = store.get_booking(booking.id).await.unwrap().unwrap();
        assert_eq!(stored.state(), refunded);
        let rows: Vec<(i64, PaymentStatus)> =
            stored.payments.iter().map(|p| (p.amount, p.status)).collect();
        assert_eq!(
            rows,
            vec![(2000, PaymentStatus::Refunded), (-2000, PaymentStatus::Refunded)]
        );
    }

    #[tokio::test]
    async fn test_list_bookings_filters_and_pages() {
        let store = MemoryStore::new();
        let schedule_id = Uuid::new_v4();
        let confirmed = BookingState::new(BookingStatus::Confirmed, PaymentStatus::Completed);
        let declined = BookingState::new(BookingStatus::Cancelled, PaymentStatus::Failed);
        let start = Utc::now() - Duration::hours(10);

        for i in 0..5 {
            let b = booking_on(schedule_id, confirmed, start + Duration::hours(i));
            store.insert_booking(&b).await.unwrap();
        }
        let failed = booking_on(schedule_id, declined, start + Duration::hours(6));
        store.insert_booking(&failed).await.unwrap();
        let elsewhere = booking_on(Uuid::new_v4(), confirmed, start);
        store.insert_booking(&elsewhere).await.unwrap();

        let on_schedule = BookingFilter {
            schedule_id: Some(schedule_id),
            limit: Some(2),
            ..Default::default()
        };
        let (page, total) = store.list_bookings(&on_schedule).await.unwrap();
        assert_eq!(total, 6);
        assert_eq!(page.len(), 2);
        assert_eq!(page[0].id, failed.id);
        assert!(page[0].created_at >= page[1].created_at);

        let last_page = BookingFilter { offset: Some(4), ..on_schedule.clone() };
        let (page, total) = store.list_bookings(&last_page).await.unwrap();
        assert_eq!((page.len(), total), (2, 6));

        let only_failed = BookingFilter {
            payment_status: Some(PaymentStatus::Failed),
            ..Default::default()
        };
        let (page, total) = store.list_bookings(&only_failed).await.unwrap();
        assert_eq!(total, 1);
        assert_eq!(page[0].id, failed.id);

        let window = BookingFilter {
            schedule_id: Some(schedule_id),
            booking_status: Some(BookingStatus::Confirmed),
            created_from: Some(start + Duration::hours(1)),
            created_to: Some(start + Duration::hours(3)),
            ..Default::default()
        };
        let (_, total) = store.list_bookings(&window).await.unwrap();
        assert_eq!(total, 3);
    }
}
