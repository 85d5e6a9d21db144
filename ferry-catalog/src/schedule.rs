use chrono::{DateTime, Utc};
use ferry_core::models::{Schedule, ScheduleStatus};
use ferry_core::repository::{BookingRepository, CatalogRepository, ScheduleRepository};
use ferry_core::search::{Page, ScheduleOption, ScheduleSearch};
use ferry_core::{CoreError, CoreResult, StoreError};
use serde::Deserialize;
use std::sync::Arc;
use tracing::{info, warn};
use uuid::Uuid;

use crate::ledger::DEFAULT_MAX_ATTEMPTS;
use crate::pricing::MAX_BASE_FARE;

/// Operator input for a new sailing.
#[derive(Debug, Clone, Deserialize)]
pub struct NewSchedule {
    pub route_id: Uuid,
    pub vessel_id: Uuid,
    pub departure_time: DateTime<Utc>,
    pub arrival_time: DateTime<Utc>,
    pub base_fare: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

/// Operator-side lifecycle of schedules: publish, status changes,
/// reschedule and delete, plus the public search read path.
///
/// Seat counters are never written here. Every write is guarded by the
/// schedule version, so a concurrent booking forces a re-read.
pub struct ScheduleService {
    schedules: Arc<dyn ScheduleRepository>,
    catalog: Arc<dyn CatalogRepository>,
    bookings: Arc<dyn BookingRepository>,
    default_currency: String,
}

impl ScheduleService {
    pub fn new(
        schedules: Arc<dyn ScheduleRepository>,
        catalog: Arc<dyn CatalogRepository>,
        bookings: Arc<dyn BookingRepository>,
        default_currency: &str,
    ) -> Self {
        Self {
            schedules,
            catalog,
            bookings,
            default_currency: default_currency.to_string(),
        }
    }

    pub async fn publish(&self, request: NewSchedule) -> CoreResult<Schedule> {
        validate_times(request.departure_time, request.arrival_time)?;
        validate_fare(request.base_fare)?;

        self.catalog
            .get_route(request.route_id)
            .await?
            .ok_or_else(|| CoreError::not_found("route", request.route_id))?;
        let vessel = self
            .catalog
            .get_vessel(request.vessel_id)
            .await?
            .ok_or_else(|| CoreError::not_found("vessel", request.vessel_id))?;

        if vessel.capacity < 1 {
            return Err(CoreError::ValidationError(format!(
                "vessel {} has no passenger capacity",
                vessel.id
            )));
        }

        let schedule = Schedule::new(
            request.route_id,
            request.vessel_id,
            request.departure_time,
            request.arrival_time,
            request.base_fare,
            request.currency.unwrap_or_else(|| self.default_currency.clone()),
            vessel.capacity,
        );
        self.schedules.insert_schedule(&schedule).await?;

        info!(
            "Published schedule {} on route {} with {} seats",
            schedule.id, schedule.route_id, schedule.total_capacity
        );
        Ok(schedule)
    }

    pub async fn get(&self, id: Uuid) -> CoreResult<Schedule> {
        self.schedules
            .get_schedule(id)
            .await?
            .ok_or_else(|| CoreError::not_found("schedule", id))
    }

    pub async fn update_status(
        &self,
        id: Uuid,
        status: ScheduleStatus,
        reason: Option<String>,
    ) -> CoreResult<Schedule> {
        if status == ScheduleStatus::Cancelled
            && reason.as_deref().map_or(true, |r| r.trim().is_empty())
        {
            return Err(CoreError::ValidationError(
                "a cancellation reason is required".into(),
            ));
        }

        self.modify(id, |schedule| {
            if !schedule.status.can_transition_to(status) {
                return Err(CoreError::InvalidState(format!(
                    "schedule cannot move from {} to {}",
                    schedule.status, status
                )));
            }
            schedule.status = status;
            if status == ScheduleStatus::Cancelled {
                schedule.cancellation_reason = reason.clone();
            }
            Ok(())
        })
        .await
    }

    pub async fn reschedule(
        &self,
        id: Uuid,
        departure_time: DateTime<Utc>,
        arrival_time: DateTime<Utc>,
        base_fare: Option<i64>,
    ) -> CoreResult<Schedule> {
        validate_times(departure_time, arrival_time)?;
        if let Some(fare) = base_fare {
            validate_fare(fare)?;
        }

        self.modify(id, |schedule| {
            if schedule.status != ScheduleStatus::Scheduled {
                return Err(CoreError::InvalidState(format!(
                    "only scheduled sailings can be rescheduled, this one is {}",
                    schedule.status
                )));
            }
            schedule.departure_time = departure_time;
            schedule.arrival_time = arrival_time;
            if let Some(fare) = base_fare {
                schedule.base_fare = fare;
            }
            Ok(())
        })
        .await
    }

    /// Deleting a schedule that any booking references is refused.
    pub async fn delete(&self, id: Uuid) -> CoreResult<()> {
        let referenced = self.bookings.count_bookings_for_schedule(id).await?;
        if referenced > 0 {
            return Err(CoreError::InvalidState(format!(
                "schedule {} has {} booking(s) and cannot be deleted",
                id, referenced
            )));
        }

        match self.schedules.delete_schedule(id).await {
            Ok(true) => {
                info!("Deleted schedule {}", id);
                Ok(())
            }
            Ok(false) => Err(CoreError::not_found("schedule", id)),
            // A booking landed between the count and the delete
            Err(StoreError::ConstraintViolation(msg)) => Err(CoreError::InvalidState(msg)),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn search(&self, criteria: &ScheduleSearch) -> CoreResult<Page<ScheduleOption>> {
        if criteria.departure_port == criteria.arrival_port {
            return Err(CoreError::ValidationError(
                "departure and arrival ports must differ".into(),
            ));
        }
        let (limit, offset) = criteria.page();
        let (schedules, total) = self.schedules.search_schedules(criteria).await?;
        Ok(Page {
            items: schedules.iter().map(ScheduleOption::from).collect(),
            total,
            limit,
            offset,
        })
    }

    /// Read-modify-write under the version guard, re-reading on a lost race.
    async fn modify<F>(&self, id: Uuid, mut change: F) -> CoreResult<Schedule>
    where
        F: FnMut(&mut Schedule) -> CoreResult<()>,
    {
        for _ in 0..DEFAULT_MAX_ATTEMPTS {
            let mut schedule = self.get(id).await?;
            let expected = schedule.version;
            change(&mut schedule)?;

            if let Some(version) = self.schedules.update_schedule(&schedule, expected).await? {
                schedule.version = version;
                schedule.updated_at = Utc::now();
                return Ok(schedule);
            }
        }

        warn!("Schedule {} kept changing underneath an operator update", id);
        Err(CoreError::Conflict {
            entity: "schedule",
            id,
            attempts: DEFAULT_MAX_ATTEMPTS,
        })
    }
}

fn validate_times(departure: DateTime<Utc>, arrival: DateTime<Utc>) -> CoreResult<()> {
    if arrival <= departure {
        return Err(CoreError::ValidationError(
            "arrival time must be after departure time".into(),
        ));
    }
    Ok(())
}

fn validate_fare(base_fare: i64) -> CoreResult<()> {
    if base_fare < 0 {
        return Err(CoreError::ValidationError("base fare cannot be negative".into()));
    }
    if base_fare > MAX_BASE_FARE {
        return Err(CoreError::ValidationError(format!(
            "base fare cannot exceed {}",
            MAX_BASE_FARE
        )));
    }
    Ok(())
}
