use chrono::{DateTime, Duration, Utc};
use ferry_core::models::{BookingState, BookingStatus, PaymentStatus, Schedule};
use ferry_core::repository::{BookingRepository, ScheduleRepository};
use ferry_core::CoreResult;
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, Mutex};
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::orchestrator::{BookingOrchestrator, Settlement};

const BATCH_SIZE: i64 = 100;

const STALE_STATES: [BookingState; 2] = [
    BookingState::new(BookingStatus::Pending, PaymentStatus::Pending),
    BookingState::new(BookingStatus::Cancelled, PaymentStatus::Pending),
];
const OWED_REFUND: BookingState =
    BookingState::new(BookingStatus::Cancelled, PaymentStatus::Completed);

#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub confirmed: usize,
    pub cancelled: usize,
    pub refunded: usize,
    pub failures: usize,
    /// Schedules whose seat counter disagrees with their bookings.
    pub drifted_schedules: Vec<Uuid>,
    /// Schedules whose counter was reset from their bookings.
    pub repaired_schedules: Vec<Uuid>,
}

enum SeatCheck {
    Balanced,
    Drifted,
    Repaired,
}

/// Background pass that settles what the request path had to leave open:
/// bookings stuck `pending` after an unanswered charge, cancelled bookings
/// whose refund failed, and seat counters a failed release left short.
///
/// A drifted counter is only reset once two consecutive passes saw the same
/// drift at the same schedule version, and the schedule has been quiet for
/// the pending TTL. A hold or release landing between passes moves the
/// version and postpones the reset.
pub struct Reconciler {
    orchestrator: Arc<BookingOrchestrator>,
    bookings: Arc<dyn BookingRepository>,
    schedules: Arc<dyn ScheduleRepository>,
    pending_ttl: Duration,
    // schedule -> (version, drift) seen on the previous pass
    suspects: Mutex<HashMap<Uuid, (i64, i64)>>,
}

impl Reconciler {
    pub fn new(
        orchestrator: Arc<BookingOrchestrator>,
        bookings: Arc<dyn BookingRepository>,
        schedules: Arc<dyn ScheduleRepository>,
        pending_ttl: Duration,
    ) -> Self {
        Self {
            orchestrator,
            bookings,
            schedules,
            pending_ttl,
            suspects: Mutex::new(HashMap::new()),
        }
    }

    /// One pass. A failing booking is logged and skipped.
    pub async fn run_once(&self) -> CoreResult<ReconcileReport> {
        let mut report = ReconcileReport::default();
        let mut touched = BTreeSet::new();
        let stale_before = Utc::now() - self.pending_ttl;

        for state in STALE_STATES {
            let stale = self
                .bookings
                .list_bookings_in_state(state, stale_before, BATCH_SIZE)
                .await?;
            for booking in stale {
                let (id, reference) = (booking.id, booking.booking_reference.clone());
                touched.insert(booking.schedule_id);
                match self.orchestrator.settle(booking).await {
                    Ok(Settlement::Confirmed) => report.confirmed += 1,
                    Ok(Settlement::Cancelled) => report.cancelled += 1,
                    Ok(Settlement::Refunded) => report.refunded += 1,
                    Ok(Settlement::Unchanged) => {}
                    Err(e) => {
                        report.failures += 1;
                        warn!("Could not settle booking {} ({}): {}", reference, id, e);
                    }
                }
            }
        }

        let owed = self
            .bookings
            .list_bookings_in_state(OWED_REFUND, stale_before, BATCH_SIZE)
            .await?;
        for booking in owed {
            touched.insert(booking.schedule_id);
            match self.orchestrator.retry_refund(booking.id).await {
                Ok(_) => report.refunded += 1,
                Err(e) => {
                    report.failures += 1;
                    warn!("Refund retry failed for booking {}: {}", booking.booking_reference, e);
                }
            }
        }

        touched.extend(self.orchestrator.take_unreleased());
        touched.extend(self.suspect_ids());

        for schedule_id in touched {
            match self.check_seats(schedule_id, stale_before).await {
                Ok(SeatCheck::Balanced) => {}
                Ok(SeatCheck::Drifted) => report.drifted_schedules.push(schedule_id),
                Ok(SeatCheck::Repaired) => report.repaired_schedules.push(schedule_id),
                Err(e) => warn!("Seat audit failed for schedule {}: {}", schedule_id, e),
            }
        }

        if report != ReconcileReport::default() {
            info!(
                "Reconciliation: {} confirmed, {} cancelled, {} refunded, {} failed, {} drifted, {} repaired",
                report.confirmed,
                report.cancelled,
                report.refunded,
                report.failures,
                report.drifted_schedules.len(),
                report.repaired_schedules.len()
            );
        }
        Ok(report)
    }

    /// Compares the seat counter with the passengers of bookings that still
    /// hold seats. Returns the difference (positive: seats missing from the
    /// counter). Read-only.
    pub async fn audit_schedule(&self, schedule_id: Uuid) -> CoreResult<i64> {
        Ok(self
            .measure(schedule_id)
            .await?
            .map_or(0, |(schedule, held)| drift_of(&schedule, held)))
    }

    async fn check_seats(
        &self,
        schedule_id: Uuid,
        quiet_since: DateTime<Utc>,
    ) -> CoreResult<SeatCheck> {
        let Some((schedule, held)) = self.measure(schedule_id).await? else {
            self.forget(schedule_id);
            return Ok(SeatCheck::Balanced);
        };
        let drift = drift_of(&schedule, held);
        if drift == 0 {
            self.forget(schedule_id);
            return Ok(SeatCheck::Balanced);
        }
        error!(
            "Seat drift on schedule {}: counter says {} booked, bookings hold {}",
            schedule_id,
            schedule.booked_seats(),
            held
        );

        let previous = self.remember(schedule_id, (schedule.version, drift));
        let stable =
            previous == Some((schedule.version, drift)) && schedule.updated_at <= quiet_since;
        let expected = i64::from(schedule.total_capacity) - held;
        let Ok(expected) = i32::try_from(expected) else {
            return Ok(SeatCheck::Drifted);
        };
        if !stable || expected < 0 {
            // An oversold counter is left for an operator
            return Ok(SeatCheck::Drifted);
        }

        match self
            .orchestrator
            .ledger()
            .restore(schedule_id, schedule.version, expected)
            .await?
        {
            Some(_) => {
                self.forget(schedule_id);
                Ok(SeatCheck::Repaired)
            }
            None => Ok(SeatCheck::Drifted),
        }
    }

    /// Bookings are counted before the schedule is read, so a release that
    /// lands in between shows up as a version change.
    async fn measure(&self, schedule_id: Uuid) -> CoreResult<Option<(Schedule, i64)>> {
        let held = self.bookings.held_passenger_count(schedule_id).await?;
        Ok(self
            .schedules
            .get_schedule(schedule_id)
            .await?
            .map(|schedule| (schedule, held)))
    }

    fn suspect_ids(&self) -> Vec<Uuid> {
        self.suspects
            .lock()
            .map(|s| s.keys().copied().collect())
            .unwrap_or_default()
    }

    fn remember(&self, schedule_id: Uuid, seen: (i64, i64)) -> Option<(i64, i64)> {
        self.suspects
            .lock()
            .ok()
            .and_then(|mut s| s.insert(schedule_id, seen))
    }

    fn forget(&self, schedule_id: Uuid) {
        if let Ok(mut s) = self.suspects.lock() {
            s.remove(&schedule_id);
        }
    }
}

fn drift_of(schedule: &Schedule, held: i64) -> i64 {
    i64::from(schedule.booked_seats()) - held
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gateway::{MockPaymentGateway, ScriptedCharge};
    use crate::orchestrator::CreateBookingRequest;
    use crate::references::RandomReferences;
    use crate::testing::FaultyStore;
    use crate::ticketing::TicketingEngine;
    use ferry_catalog::{FareTable, SeatLedger};
    use ferry_core::events::{EventSink, NoopEventSink};
    use ferry_core::models::{BookingChannel, PassengerInfo, Schedule};
    use ferry_store::MemoryStore;
    use std::time::Duration as StdDuration;

    struct Harness {
        store: Arc<MemoryStore>,
        faults: Arc<FaultyStore>,
        gateway: Arc<MockPaymentGateway>,
        orchestrator: Arc<BookingOrchestrator>,
        reconciler: Reconciler,
        schedule: Schedule,
    }

    async fn harness() -> Harness {
        let store = Arc::new(MemoryStore::new());
        let departure = Utc::now() + Duration::days(1);
        let schedule = Schedule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            departure,
            departure + Duration::hours(1),
            1500,
            "USD".into(),
            10,
        );
        store.insert_schedule(&schedule).await.unwrap();
        let faults = Arc::new(FaultyStore::new(store.clone()));

        let events: Arc<dyn EventSink> = Arc::new(NoopEventSink);
        let gateway = Arc::new(MockPaymentGateway::new());
        let references = Arc::new(RandomReferences);
        let orchestrator = Arc::new(
            BookingOrchestrator::new(
                faults.clone(),
                faults.clone(),
                Arc::new(SeatLedger::new(faults.clone(), events.clone())),
                TicketingEngine::new(FareTable::default(), references.clone()),
                references,
                gateway.clone(),
                events,
            )
            .with_deadline(StdDuration::from_millis(100)),
        );
        // Zero TTL: everything open is stale
        let reconciler = Reconciler::new(
            orchestrator.clone(),
            store.clone(),
            store.clone(),
            Duration::zero(),
        );

        Harness {
            store,
            faults,
            gateway,
            orchestrator,
            reconciler,
            schedule,
        }
    }

    fn request(h: &Harness, seats: usize) -> CreateBookingRequest {
        CreateBookingRequest {
            customer_id: Uuid::new_v4(),
            schedule_id: h.schedule.id,
            passengers: (0..seats)
                .map(|i| PassengerInfo::new(&format!("P{}", i), "adult"))
                .collect(),
            payment_method: "card".into(),
            channel: BookingChannel::Online,
            special_requirements: None,
            booking_agent_id: None,
        }
    }

    #[tokio::test]
    async fn test_settles_stale_pending_bookings() {
        let h = harness().await;
        h.gateway.script(ScriptedCharge::LostResponse);
        h.gateway.script(ScriptedCharge::Unavailable("gateway down".into()));

        let charged = h.orchestrator.create_booking(request(&h, 2)).await.unwrap();
        let never_charged = h.orchestrator.create_booking(request(&h, 3)).await.unwrap();
        assert_eq!(charged.booking_status, BookingStatus::Pending);
        assert_eq!(never_charged.booking_status, BookingStatus::Pending);

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let report = h.reconciler.run_once().await.unwrap();

        assert_eq!(report.confirmed, 1);
        assert_eq!(report.cancelled, 1);
        assert_eq!(report.failures, 0);
        assert!(report.drifted_schedules.is_empty());

        let schedule = h.store.get_schedule(h.schedule.id).await.unwrap().unwrap();
        assert_eq!(schedule.available_seats, 8);

        // Nothing left to do
        let second = h.reconciler.run_once().await.unwrap();
        assert_eq!(second, ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_retries_failed_refunds() {
        let h = harness().await;
        let booking = h.orchestrator.create_booking(request(&h, 1)).await.unwrap();
        h.gateway.fail_next_refunds(1);
        h.orchestrator.cancel_booking(booking.id, "weather").await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let report = h.reconciler.run_once().await.unwrap();
        assert_eq!(report.refunded, 1);

        let stored = h.orchestrator.get_booking(booking.id).await.unwrap();
        assert_eq!(stored.payment_status, PaymentStatus::Refunded);
        assert_eq!(stored.net_charged(), 0);
    }

    #[tokio::test]
    async fn test_audit_reports_leaked_seats() {
        let h = harness().await;
        h.orchestrator.create_booking(request(&h, 2)).await.unwrap();
        assert_eq!(h.reconciler.audit_schedule(h.schedule.id).await.unwrap(), 0);

        // A hold whose booking was never written
        let s = h.store.get_schedule(h.schedule.id).await.unwrap().unwrap();
        h.store
            .compare_and_set_seats(s.id, s.version, s.available_seats - 1)
            .await
            .unwrap();

        assert_eq!(h.reconciler.audit_schedule(h.schedule.id).await.unwrap(), 1);
    }

    async fn available(h: &Harness) -> i32 {
        h.store
            .get_schedule(h.schedule.id)
            .await
            .unwrap()
            .unwrap()
            .available_seats
    }

    #[tokio::test]
    async fn test_repairs_seats_a_failed_release_left_behind() {
        let h = harness().await;
        let booking = h.orchestrator.create_booking(request(&h, 3)).await.unwrap();
        h.faults.fail_next_releases(1);
        h.orchestrator.cancel_booking(booking.id, "weather").await.unwrap();
        assert_eq!(available(&h).await, 7);

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let first = h.reconciler.run_once().await.unwrap();
        assert_eq!(first.drifted_schedules, vec![h.schedule.id]);
        assert!(first.repaired_schedules.is_empty());
        assert_eq!(available(&h).await, 7);

        let second = h.reconciler.run_once().await.unwrap();
        assert_eq!(second.repaired_schedules, vec![h.schedule.id]);
        assert_eq!(available(&h).await, 10);
        assert_eq!(h.reconciler.audit_schedule(h.schedule.id).await.unwrap(), 0);

        assert_eq!(h.reconciler.run_once().await.unwrap(), ReconcileReport::default());
    }

    #[tokio::test]
    async fn test_drift_is_not_reset_while_the_schedule_keeps_moving() {
        let h = harness().await;
        let booking = h.orchestrator.create_booking(request(&h, 2)).await.unwrap();
        h.faults.fail_next_releases(1);
        h.orchestrator.cancel_booking(booking.id, "weather").await.unwrap();

        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let first = h.reconciler.run_once().await.unwrap();
        assert_eq!(first.drifted_schedules, vec![h.schedule.id]);

        // New hold between passes: version moves, reset waits a pass
        h.orchestrator.create_booking(request(&h, 1)).await.unwrap();
        tokio::time::sleep(StdDuration::from_millis(5)).await;
        let second = h.reconciler.run_once().await.unwrap();
        assert_eq!(second.drifted_schedules, vec![h.schedule.id]);
        assert_eq!(available(&h).await, 7);

        let third = h.reconciler.run_once().await.unwrap();
        assert_eq!(third.repaired_schedules, vec![h.schedule.id]);
        assert_eq!(available(&h).await, 9);
    }
}
