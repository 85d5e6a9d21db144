use chrono::Utc;
use ferry_core::events::EventSink;
use ferry_core::models::Schedule;
use ferry_core::repository::ScheduleRepository;
use ferry_core::{CoreError, CoreResult};
use ferry_shared::{BookingEvent, SeatsChangedEvent};
use std::sync::Arc;
use tracing::{debug, warn};
use uuid::Uuid;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Seat inventory for schedules.
///
/// The ledger keeps no state of its own, so any number of ledger instances
/// may run against one store. A reservation reads `(available_seats,
/// version)` and writes with a compare-and-set guarded by that version; a
/// lost race re-reads and tries again, at most `max_attempts` times. A
/// release is a single bounded increment and has no attempt limit.
pub struct SeatLedger {
    schedules: Arc<dyn ScheduleRepository>,
    events: Arc<dyn EventSink>,
    max_attempts: u32,
}

impl SeatLedger {
    pub fn new(schedules: Arc<dyn ScheduleRepository>, events: Arc<dyn EventSink>) -> Self {
        Self {
            schedules,
            events,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Takes `seats` off the schedule's available count. Returns the
    /// schedule version written by the successful update.
    pub async fn reserve(&self, schedule_id: Uuid, seats: i32) -> CoreResult<i64> {
        if seats < 1 {
            return Err(CoreError::ValidationError(format!(
                "seats to reserve must be at least 1, got {}",
                seats
            )));
        }

        for attempt in 1..=self.max_attempts {
            let schedule = self.load(schedule_id).await?;

            if !schedule.is_bookable() {
                return Err(CoreError::InvalidState(format!(
                    "schedule {} is {}",
                    schedule_id, schedule.status
                )));
            }
            if schedule.available_seats < seats {
                return Err(CoreError::InsufficientCapacity {
                    requested: seats,
                    available: schedule.available_seats,
                });
            }

            let remaining = schedule.available_seats - seats;
            match self
                .schedules
                .compare_and_set_seats(schedule_id, schedule.version, remaining)
                .await?
            {
                Some(version) => {
                    debug!(
                        "Reserved {} seat(s) on schedule {} ({} left, v{})",
                        seats, schedule_id, remaining, version
                    );
                    self.publish(schedule.id, remaining, schedule.total_capacity, version);
                    return Ok(version);
                }
                None => debug!(
                    "Version conflict reserving on schedule {} (attempt {}/{})",
                    schedule_id, attempt, self.max_attempts
                ),
            }
        }

        warn!(
            "Giving up reserve on schedule {} after {} conflicting attempts",
            schedule_id, self.max_attempts
        );
        Err(CoreError::Conflict {
            entity: "schedule",
            id: schedule_id,
            attempts: self.max_attempts,
        })
    }

    /// Returns `seats` to the schedule. Releasing past `total_capacity` is
    /// refused: it means more seats are coming back than were ever taken.
    ///
    /// A release is one relative increment in the store, so it cannot lose a
    /// version race and never returns `Conflict`.
    pub async fn release(&self, schedule_id: Uuid, seats: i32) -> CoreResult<i64> {
        if seats < 1 {
            return Err(CoreError::ValidationError(format!(
                "seats to release must be at least 1, got {}",
                seats
            )));
        }

        match self.schedules.release_seats(schedule_id, seats).await? {
            Some(counts) => {
                debug!(
                    "Released {} seat(s) on schedule {} ({} left, v{})",
                    seats, schedule_id, counts.available_seats, counts.version
                );
                self.publish(
                    schedule_id,
                    counts.available_seats,
                    counts.total_capacity,
                    counts.version,
                );
                Ok(counts.version)
            }
            None => {
                let schedule = self.load(schedule_id).await?;
                Err(CoreError::InvalidState(format!(
                    "releasing {} seat(s) on schedule {} would exceed capacity {} ({} booked)",
                    seats,
                    schedule_id,
                    schedule.total_capacity,
                    schedule.booked_seats()
                )))
            }
        }
    }

    /// Overwrites the seat counter with `available_seats` if the schedule is
    /// still at `expected_version`. Used to repair a counter that disagrees
    /// with the bookings; `None` means the schedule moved and nothing was written.
    pub async fn restore(
        &self,
        schedule_id: Uuid,
        expected_version: i64,
        available_seats: i32,
    ) -> CoreResult<Option<i64>> {
        let schedule = self.load(schedule_id).await?;
        let written = self
            .schedules
            .compare_and_set_seats(schedule_id, expected_version, available_seats)
            .await?;
        if let Some(version) = written {
            warn!(
                "Seat counter on schedule {} reset to {} (v{})",
                schedule_id, available_seats, version
            );
            self.publish(schedule_id, available_seats, schedule.total_capacity, version);
        }
        Ok(written)
    }

    pub async fn snapshot(&self, schedule_id: Uuid) -> CoreResult<Schedule> {
        self.load(schedule_id).await
    }

    async fn load(&self, schedule_id: Uuid) -> CoreResult<Schedule> {
        self.schedules
            .get_schedule(schedule_id)
            .await?
            .ok_or_else(|| CoreError::not_found("schedule", schedule_id))
    }

    fn publish(&self, schedule_id: Uuid, available_seats: i32, total_capacity: i32, version: i64) {
        self.events.publish(BookingEvent::SeatsChanged(SeatsChangedEvent {
            schedule_id,
            available_seats,
            total_capacity,
            version,
            changed_at: Utc::now().timestamp(),
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use ferry_core::events::NoopEventSink;
    use ferry_core::models::ScheduleStatus;
    use ferry_core::repository::{SeatCounts, StoreResult};
    use ferry_core::search::ScheduleSearch;
    use ferry_store::MemoryStore;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn schedule(capacity: i32) -> Schedule {
        let departure = Utc::now() + Duration::days(2);
        Schedule::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            departure,
            departure + Duration::minutes(90),
            10000,
            "USD".to_string(),
            capacity,
        )
    }

    async fn ledger_with(capacity: i32) -> (SeatLedger, Arc<MemoryStore>, Uuid) {
        let store = Arc::new(MemoryStore::new());
        let s = schedule(capacity);
        store.insert_schedule(&s).await.unwrap();
        let ledger = SeatLedger::new(store.clone(), Arc::new(NoopEventSink));
        (ledger, store, s.id)
    }

    #[tokio::test]
    async fn test_reserve_and_release() {
        let (ledger, store, id) = ledger_with(10).await;

        let v1 = ledger.reserve(id, 3).await.unwrap();
        assert_eq!(v1, 1);
        assert_eq!(store.get_schedule(id).await.unwrap().unwrap().available_seats, 7);

        ledger.release(id, 3).await.unwrap();
        let s = store.get_schedule(id).await.unwrap().unwrap();
        assert_eq!(s.available_seats, 10);
        assert_eq!(s.version, 2);
    }

    #[tokio::test]
    async fn test_zero_seats_rejected() {
        let (ledger, _store, id) = ledger_with(10).await;

        assert!(matches!(ledger.reserve(id, 0).await, Err(CoreError::ValidationError(_))));
        assert!(matches!(ledger.release(id, 0).await, Err(CoreError::ValidationError(_))));
    }

    #[tokio::test]
    async fn test_insufficient_capacity() {
        let (ledger, _store, id) = ledger_with(4).await;

        match ledger.reserve(id, 5).await {
            Err(CoreError::InsufficientCapacity { requested, available }) => {
                assert_eq!(requested, 5);
                assert_eq!(available, 4);
            }
            other => panic!("expected InsufficientCapacity, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_release_beyond_capacity_rejected() {
        let (ledger, store, id) = ledger_with(10).await;
        ledger.reserve(id, 2).await.unwrap();

        assert!(matches!(ledger.release(id, 3).await, Err(CoreError::InvalidState(_))));
        assert_eq!(store.get_schedule(id).await.unwrap().unwrap().available_seats, 8);
    }

    #[tokio::test]
    async fn test_reserve_on_cancelled_schedule_rejected() {
        let store = Arc::new(MemoryStore::new());
        let mut s = schedule(10);
        s.status = ScheduleStatus::Cancelled;
        store.insert_schedule(&s).await.unwrap();
        let ledger = SeatLedger::new(store, Arc::new(NoopEventSink));

        assert!(matches!(ledger.reserve(s.id, 1).await, Err(CoreError::InvalidState(_))));
    }

    #[tokio::test]
    async fn test_unknown_schedule_is_not_found() {
        let (ledger, _store, _id) = ledger_with(10).await;
        assert!(matches!(
            ledger.reserve(Uuid::new_v4(), 1).await,
            Err(CoreError::NotFound { entity: "schedule", .. })
        ));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_two_concurrent_six_seat_reservations_on_ten_seats() {
        let (ledger, store, id) = ledger_with(10).await;
        let ledger = Arc::new(ledger);

        let a = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.reserve(id, 6).await }
        });
        let b = tokio::spawn({
            let ledger = ledger.clone();
            async move { ledger.reserve(id, 6).await }
        });
        let results = vec![a.await.unwrap(), b.await.unwrap()];

        let successes = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(successes, 1);
        assert!(results.iter().any(|r| matches!(
            r,
            Err(CoreError::InsufficientCapacity { .. }) | Err(CoreError::Conflict { .. })
        )));
        assert_eq!(store.get_schedule(id).await.unwrap().unwrap().available_seats, 4);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_many_concurrent_reservations_never_oversell() {
        let (ledger, store, id) = ledger_with(25).await;
        let ledger = Arc::new(ledger.with_max_attempts(50));

        let mut handles = Vec::new();
        for _ in 0..40 {
            let ledger = ledger.clone();
            handles.push(tokio::spawn(async move { ledger.reserve(id, 2).await }));
        }

        let mut granted = 0;
        for handle in handles {
            if handle.await.unwrap().is_ok() {
                granted += 2;
            }
        }

        let s = store.get_schedule(id).await.unwrap().unwrap();
        assert!(granted <= 25);
        assert_eq!(s.available_seats + granted, s.total_capacity);
    }

    /// Loses every compare-and-set, as if another writer always got there first.
    struct AlwaysStale {
        inner: MemoryStore,
        attempts: AtomicU32,
    }

    #[async_trait]
    impl ScheduleRepository for AlwaysStale {
        async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
            self.inner.insert_schedule(schedule).await
        }
        async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
            self.inner.get_schedule(id).await
        }
        async fn compare_and_set_seats(&self, _: Uuid, _: i64, _: i32) -> StoreResult<Option<i64>> {
            self.attempts.fetch_add(1, Ordering::SeqCst);
            Ok(None)
        }
        async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<SeatCounts>> {
            self.inner.release_seats(id, seats).await
        }
        async fn update_schedule(&self, s: &Schedule, v: i64) -> StoreResult<Option<i64>> {
            self.inner.update_schedule(s, v).await
        }
        async fn delete_schedule(&self, id: Uuid) -> StoreResult<bool> {
            self.inner.delete_schedule(id).await
        }
        async fn search_schedules(&self, c: &ScheduleSearch) -> StoreResult<(Vec<Schedule>, i64)> {
            self.inner.search_schedules(c).await
        }
    }

    #[tokio::test]
    async fn test_conflict_after_bounded_attempts() {
        let repo = Arc::new(AlwaysStale {
            inner: MemoryStore::new(),
            attempts: AtomicU32::new(0),
        });
        let s = schedule(10);
        repo.insert_schedule(&s).await.unwrap();
        let ledger = SeatLedger::new(repo.clone(), Arc::new(NoopEventSink));

        let err = ledger.reserve(s.id, 1).await.unwrap_err();
        assert!(matches!(err, CoreError::Conflict { attempts: 3, .. }));
        assert!(err.is_retryable());
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_release_does_not_depend_on_winning_a_version_race() {
        let repo = Arc::new(AlwaysStale {
            inner: MemoryStore::new(),
            attempts: AtomicU32::new(0),
        });
        let mut s = schedule(10);
        s.available_seats = 4;
        repo.insert_schedule(&s).await.unwrap();
        let ledger = SeatLedger::new(repo.clone(), Arc::new(NoopEventSink));

        ledger.release(s.id, 6).await.unwrap();
        assert_eq!(repo.get_schedule(s.id).await.unwrap().unwrap().available_seats, 10);
        assert_eq!(repo.attempts.load(Ordering::SeqCst), 0);
    }

    /// Adds a round-trip delay to every schedule read, so reads and writes
    /// from concurrent tasks interleave the way they do against a database.
    struct SlowReads {
        inner: MemoryStore,
        delay: std::time::Duration,
    }

    #[async_trait]
    impl ScheduleRepository for SlowReads {
        async fn insert_schedule(&self, schedule: &Schedule) -> StoreResult<()> {
            self.inner.insert_schedule(schedule).await
        }
        async fn get_schedule(&self, id: Uuid) -> StoreResult<Option<Schedule>> {
            tokio::time::sleep(self.delay).await;
            self.inner.get_schedule(id).await
        }
        async fn compare_and_set_seats(&self, id: Uuid, v: i64, n: i32) -> StoreResult<Option<i64>> {
            self.inner.compare_and_set_seats(id, v, n).await
        }
        async fn release_seats(&self, id: Uuid, seats: i32) -> StoreResult<Option<SeatCounts>> {
            self.inner.release_seats(id, seats).await
        }
        async fn update_schedule(&self, s: &Schedule, v: i64) -> StoreResult<Option<i64>> {
            self.inner.update_schedule(s, v).await
        }
        async fn delete_schedule(&self, id: Uuid) -> StoreResult<bool> {
            self.inner.delete_schedule(id).await
        }
        async fn search_schedules(&self, c: &ScheduleSearch) -> StoreResult<(Vec<Schedule>, i64)> {
            self.inner.search_schedules(c).await
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_releases_under_contention_are_never_dropped() {
        let repo = Arc::new(SlowReads {
            inner: MemoryStore::new(),
            delay: std::time::Duration::from_millis(1),
        });
        let s = schedule(400);
        repo.insert_schedule(&s).await.unwrap();
        let ledger = Arc::new(SeatLedger::new(repo.clone(), Arc::new(NoopEventSink)));

        // 100 seats already taken
        repo.inner.compare_and_set_seats(s.id, 0, 300).await.unwrap();

        let mut releases = Vec::new();
        let mut reserves = Vec::new();
        for _ in 0..100 {
            let l = ledger.clone();
            releases.push(tokio::spawn(async move { l.release(s.id, 1).await }));
            let l = ledger.clone();
            reserves.push(tokio::spawn(async move { l.reserve(s.id, 1).await }));
        }

        for handle in releases {
            handle.await.unwrap().unwrap();
        }
        let mut granted = 0;
        for handle in reserves {
            match handle.await.unwrap() {
                Ok(_) => granted += 1,
                Err(CoreError::Conflict { .. }) => {}
                Err(other) => panic!("unexpected error {:?}", other),
            }
        }

        let stored = repo.get_schedule(s.id).await.unwrap().unwrap();
        assert_eq!(stored.available_seats, 400 - granted);
    }
}
